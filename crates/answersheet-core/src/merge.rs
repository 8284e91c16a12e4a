use crate::error::AnswersheetError;
use crate::geometry::Region;
use crate::llm::{ImageSource, Usage, VisionModel, VisionRequest};
use crate::prompts::PromptBook;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

/// Merged regions plus what the merge cost.
#[derive(Debug, Clone)]
pub struct MergedRegions {
    pub regions: Vec<Region>,
    pub usage: Usage,
}

/// Verification/merge fallback for pages where the detector found more
/// regions than there are questions.
#[async_trait]
pub trait RegionMerger: Send + Sync {
    async fn merge(
        &self,
        regions: &[Region],
        question_numbers: &[String],
        image: ImageSource,
    ) -> Result<MergedRegions, AnswersheetError>;
}

fn point_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "x": { "type": "integer" },
            "y": { "type": "integer" }
        },
        "required": ["x", "y"]
    })
}

/// Response schema: a list of four-corner regions.
pub fn region_list_schema() -> Value {
    json!({
        "type": "array",
        "items": {
            "type": "object",
            "properties": {
                "p1": point_schema(),
                "p2": point_schema(),
                "p3": point_schema(),
                "p4": point_schema()
            },
            "required": ["p1", "p2", "p3", "p4"]
        }
    })
}

/// Asks a general vision model to merge the over-long region list down to
/// one region per expected question.
pub struct ModelRegionMerger {
    model: Arc<dyn VisionModel>,
    prompts: Arc<PromptBook>,
}

impl ModelRegionMerger {
    pub fn new(model: Arc<dyn VisionModel>, prompts: Arc<PromptBook>) -> Self {
        ModelRegionMerger { model, prompts }
    }
}

#[async_trait]
impl RegionMerger for ModelRegionMerger {
    async fn merge(
        &self,
        regions: &[Region],
        question_numbers: &[String],
        image: ImageSource,
    ) -> Result<MergedRegions, AnswersheetError> {
        let bboxes = serde_json::to_string(regions)?;
        let questions = serde_json::to_string(question_numbers)?;
        let prompt = self.prompts.format_user(
            "verification_prompt",
            &[
                ("bboxes", bboxes.as_str()),
                ("question_numbers", questions.as_str()),
            ],
        )?;

        let request = VisionRequest::new(prompt, image);
        let structured = self
            .model
            .generate_structured(&request, &region_list_schema())
            .await?;
        let merged: Vec<Region> = serde_json::from_value(structured.value).map_err(|e| {
            AnswersheetError::Model {
                model: structured.model.clone(),
                message: format!("merged regions do not match schema: {}", e),
            }
        })?;

        debug!(
            model = %structured.model,
            before = regions.len(),
            after = merged.len(),
            "merged detector regions"
        );
        Ok(MergedRegions {
            regions: merged,
            usage: structured.usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelStructured, ModelText};
    use std::sync::Mutex;

    struct RecordingModel {
        reply: Value,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl VisionModel for RecordingModel {
        fn name(&self) -> &str {
            "verifier"
        }

        async fn generate(&self, _request: &VisionRequest) -> Result<ModelText, AnswersheetError> {
            unreachable!()
        }

        async fn generate_structured(
            &self,
            request: &VisionRequest,
            schema: &Value,
        ) -> Result<ModelStructured, AnswersheetError> {
            assert_eq!(schema["type"], "array");
            self.prompts.lock().unwrap().push(request.user_prompt.clone());
            Ok(ModelStructured {
                model: "verifier".into(),
                value: self.reply.clone(),
                usage: Usage::default(),
            })
        }
    }

    #[tokio::test]
    async fn test_merge_parses_regions_and_fills_prompt() {
        let model = Arc::new(RecordingModel {
            reply: json!([{
                "p1": {"x": 50, "y": 300}, "p2": {"x": 800, "y": 300},
                "p3": {"x": 50, "y": 1200}, "p4": {"x": 800, "y": 1200}
            }]),
            prompts: Mutex::new(Vec::new()),
        });
        let merger = ModelRegionMerger::new(model.clone(), Arc::new(PromptBook::builtin().unwrap()));

        let detected = vec![
            Region::rect(50, 300, 800, 590),
            Region::rect(50, 600, 800, 1200),
        ];
        let merged = merger
            .merge(&detected, &["7".to_string()], ImageSource::Jpeg(vec![]))
            .await
            .unwrap();

        assert_eq!(merged.regions, vec![Region::rect(50, 300, 800, 1200)]);
        let prompt = model.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("\"7\""));
        assert!(prompt.contains("\"p1\""));
    }

    #[tokio::test]
    async fn test_merge_rejects_malformed_output() {
        let model = Arc::new(RecordingModel {
            reply: json!({ "regions": [] }),
            prompts: Mutex::new(Vec::new()),
        });
        let merger = ModelRegionMerger::new(model, Arc::new(PromptBook::builtin().unwrap()));
        let result = merger
            .merge(&[], &["1".to_string()], ImageSource::Jpeg(vec![]))
            .await;
        assert!(matches!(result, Err(AnswersheetError::Model { .. })));
    }
}
