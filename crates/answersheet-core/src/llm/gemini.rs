use crate::error::AnswersheetError;
use crate::llm::{
    ImageSource, ModelStructured, ModelText, Pricing, Usage, VisionModel, VisionRequest,
};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const MAX_OUTPUT_TOKENS: u32 = 4048;
const TEMPERATURE: f32 = 0.1;

/// Client for Google's Gemini models over the Generative Language REST API.
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    pricing: Pricing,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        pricing: Pricing,
    ) -> Result<Self, AnswersheetError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(AnswersheetError::Config(
                "Gemini API key must not be empty".into(),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()?;
        Ok(GeminiClient {
            http,
            api_key,
            model: model.into(),
            pricing,
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the client at a different API root (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn request_body(
        &self,
        request: &VisionRequest,
        schema: Option<&Value>,
    ) -> Result<Value, AnswersheetError> {
        let ImageSource::Jpeg(bytes) = &request.image else {
            return Err(AnswersheetError::Model {
                model: self.model.clone(),
                message: "Gemini requests need an inline JPEG image".into(),
            });
        };

        let mut generation_config = json!({
            "maxOutputTokens": MAX_OUTPUT_TOKENS,
            "temperature": TEMPERATURE,
        });
        if self.model == "gemini-2.5-flash" {
            generation_config["thinkingConfig"] = json!({ "thinkingBudget": 0 });
        }
        if let Some(schema) = schema {
            generation_config["responseMimeType"] = json!("application/json");
            generation_config["responseSchema"] = to_gemini_schema(schema);
        }

        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    {
                        "inlineData": {
                            "mimeType": "image/jpeg",
                            "data": base64::engine::general_purpose::STANDARD.encode(bytes),
                        }
                    },
                    { "text": request.user_prompt },
                ],
            }],
            "generationConfig": generation_config,
        });
        if let Some(system) = &request.system_prompt {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        Ok(body)
    }

    async fn call(&self, body: &Value) -> Result<(String, Usage), AnswersheetError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);
        debug!(model = %self.model, "calling Gemini");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AnswersheetError::Model {
                model: self.model.clone(),
                message: format!("HTTP {}: {}", status, text),
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&text).map_err(|e| AnswersheetError::Model {
                model: self.model.clone(),
                message: format!("unexpected response body: {}", e),
            })?;

        let output = parsed.text().ok_or_else(|| AnswersheetError::Model {
            model: self.model.clone(),
            message: "Gemini response did not contain text output".into(),
        })?;

        let usage = parsed.usage_metadata.unwrap_or_default();
        let input = usage.prompt_token_count;
        let output_tokens = usage.total_token_count.saturating_sub(input);
        Ok((output, self.pricing.usage(input, output_tokens)))
    }
}

#[async_trait]
impl VisionModel for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &VisionRequest) -> Result<ModelText, AnswersheetError> {
        let body = self.request_body(request, None)?;
        let (text, usage) = self.call(&body).await?;
        Ok(ModelText {
            model: self.model.clone(),
            text,
            usage,
        })
    }

    async fn generate_structured(
        &self,
        request: &VisionRequest,
        schema: &Value,
    ) -> Result<ModelStructured, AnswersheetError> {
        let body = self.request_body(request, Some(schema))?;
        let (text, usage) = self.call(&body).await?;
        let value = serde_json::from_str(&text).map_err(|e| AnswersheetError::Model {
            model: self.model.clone(),
            message: format!("structured output is not valid JSON: {}", e),
        })?;
        Ok(ModelStructured {
            model: self.model.clone(),
            value,
            usage,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

impl GenerateContentResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

/// Gemini's `responseSchema` is an OpenAPI subset with upper-case type names.
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let v = match (k.as_str(), v) {
                        ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                        _ => to_gemini_schema(v),
                    };
                    (k.clone(), v)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}
