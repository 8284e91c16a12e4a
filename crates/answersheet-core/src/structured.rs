use crate::llm::{ImageSource, Usage, VisionModel, VisionRequest};
use crate::model::PageExtraction;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

/// JSON schema the extraction model must answer with.
///
/// `starts_with_continuation` is deliberately a string (`"true"`/`"false"`).
pub fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "student_id": {
                "type": "string",
                "description": "Extract the student id. if not filled, return unknown"
            },
            "student_name": {
                "type": "string",
                "description": "Extract the student name"
            },
            "page_no": {
                "type": "string",
                "description": "Extract the page no"
            },
            "question_numbers": {
                "type": "array",
                "description": "Extract the question ids seen on the left margin. In the order, top to bottom",
                "items": { "type": "string" }
            },
            "starts_with_continuation": {
                "type": "string",
                "description": "true, if the first line of content on the page is not indicated with a question number to its left margin. false, if the first line of content on the page is indicated with a question number to the left margin."
            }
        },
        "required": [
            "student_id",
            "student_name",
            "page_no",
            "question_numbers",
            "starts_with_continuation"
        ]
    })
}

/// Result of one page's metadata extraction. Failures are values, not
/// errors, so one bad page never aborts its siblings.
#[derive(Debug, Clone)]
pub enum ExtractionOutcome {
    Extracted {
        page: PageExtraction,
        model: String,
        usage: Usage,
    },
    Failed {
        error: String,
        model: String,
        usage: Usage,
    },
}

impl ExtractionOutcome {
    pub fn usage(&self) -> &Usage {
        match self {
            ExtractionOutcome::Extracted { usage, .. } | ExtractionOutcome::Failed { usage, .. } => {
                usage
            }
        }
    }
}

/// Structured-Extraction Adapter over the metadata model.
pub struct PageExtractor {
    model: Arc<dyn VisionModel>,
}

impl PageExtractor {
    pub fn new(model: Arc<dyn VisionModel>) -> Self {
        PageExtractor { model }
    }

    pub async fn extract(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        image: ImageSource,
        schema: &Value,
    ) -> ExtractionOutcome {
        let request = VisionRequest::new(user_prompt, image).with_system(system_prompt);
        let model = self.model.name().to_string();

        let structured = match self.model.generate_structured(&request, schema).await {
            Ok(s) => s,
            Err(e) => {
                error!(%model, error = %e, "structured extraction failed");
                return ExtractionOutcome::Failed {
                    error: e.to_string(),
                    model,
                    usage: Usage::default(),
                };
            }
        };

        match serde_json::from_value::<PageExtraction>(structured.value) {
            Ok(page) => {
                debug!(
                    %model,
                    student_id = %page.student_id,
                    page_no = %page.page_no,
                    questions = page.question_numbers.len(),
                    "page metadata extracted"
                );
                ExtractionOutcome::Extracted {
                    page,
                    model,
                    usage: structured.usage,
                }
            }
            Err(e) => {
                error!(%model, error = %e, "extraction output does not match schema");
                ExtractionOutcome::Failed {
                    error: format!("extraction output does not match schema: {}", e),
                    model,
                    usage: Usage::default(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AnswersheetError;
    use crate::llm::{ModelStructured, ModelText};
    use async_trait::async_trait;

    struct CannedModel(Result<Value, String>);

    #[async_trait]
    impl VisionModel for CannedModel {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _request: &VisionRequest) -> Result<ModelText, AnswersheetError> {
            unreachable!("extraction only uses structured generation")
        }

        async fn generate_structured(
            &self,
            _request: &VisionRequest,
            _schema: &Value,
        ) -> Result<ModelStructured, AnswersheetError> {
            match &self.0 {
                Ok(value) => Ok(ModelStructured {
                    model: "canned".into(),
                    value: value.clone(),
                    usage: Usage {
                        input_tokens: 100,
                        output_tokens: 20,
                        cost: Default::default(),
                    },
                }),
                Err(msg) => Err(AnswersheetError::Model {
                    model: "canned".into(),
                    message: msg.clone(),
                }),
            }
        }
    }

    async fn run(model: CannedModel) -> ExtractionOutcome {
        PageExtractor::new(Arc::new(model))
            .extract("sys", "user", ImageSource::Jpeg(vec![]), &extraction_schema())
            .await
    }

    #[test]
    fn test_schema_requires_all_fields() {
        let schema = extraction_schema();
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 5);
        assert_eq!(schema["properties"]["starts_with_continuation"]["type"], "string");
    }

    #[tokio::test]
    async fn test_extracted_page() {
        let outcome = run(CannedModel(Ok(json!({
            "student_id": "S1",
            "student_name": "Ada",
            "page_no": "1",
            "question_numbers": ["1", "2"],
            "starts_with_continuation": "false"
        }))))
        .await;

        assert_eq!(outcome.usage().input_tokens, 100);
        match outcome {
            ExtractionOutcome::Extracted { page, .. } => {
                assert_eq!(page.question_numbers, vec!["1", "2"]);
            }
            other => panic!("expected extraction, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_fault_becomes_failed_outcome() {
        let outcome = run(CannedModel(Err("quota exceeded".into()))).await;
        match outcome {
            ExtractionOutcome::Failed { error, usage, .. } => {
                assert!(error.contains("quota exceeded"));
                assert_eq!(usage, Usage::default());
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_schema_mismatch_becomes_failed_outcome() {
        let outcome = run(CannedModel(Ok(json!({ "student_id": "S1" })))).await;
        assert_eq!(outcome.usage(), &Usage::default());
        assert!(matches!(outcome, ExtractionOutcome::Failed { .. }));
    }
}
