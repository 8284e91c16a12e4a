pub mod gemini;
pub mod runpod;

use crate::error::AnswersheetError;
use async_trait::async_trait;
use base64::Engine as _;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Page image handed to a model, either inline or by fetchable URL.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Jpeg(Vec<u8>),
    Url(String),
}

impl ImageSource {
    /// Base64 `data:` URI for inline images, the URL itself otherwise.
    pub fn to_uri(&self) -> String {
        match self {
            ImageSource::Jpeg(bytes) => format!(
                "data:image/jpeg;base64,{}",
                base64::engine::general_purpose::STANDARD.encode(bytes)
            ),
            ImageSource::Url(url) => url.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub image: ImageSource,
}

impl VisionRequest {
    pub fn new(user_prompt: impl Into<String>, image: ImageSource) -> Self {
        VisionRequest {
            system_prompt: None,
            user_prompt: user_prompt.into(),
            image,
        }
    }

    pub fn with_system(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

/// Token accounting for one model call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: Decimal,
}

impl Usage {
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
    }
}

/// Per-model price in dollars per one million tokens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    pub input_cost: Decimal,
    pub output_cost: Decimal,
}

impl Pricing {
    pub fn usage(&self, input_tokens: u64, output_tokens: u64) -> Usage {
        let per_token = Decimal::from(1_000_000);
        Usage {
            input_tokens,
            output_tokens,
            cost: Decimal::from(input_tokens) * self.input_cost / per_token
                + Decimal::from(output_tokens) * self.output_cost / per_token,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelText {
    pub model: String,
    pub text: String,
    pub usage: Usage,
}

#[derive(Debug, Clone)]
pub struct ModelStructured {
    pub model: String,
    pub value: serde_json::Value,
    pub usage: Usage,
}

/// Capability interface shared by every vision-language backend.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Model identifier (for diagnostics and pricing lookup).
    fn name(&self) -> &str;

    /// Free-text generation over one page image.
    async fn generate(&self, request: &VisionRequest) -> Result<ModelText, AnswersheetError>;

    /// JSON generation constrained by `schema`.
    async fn generate_structured(
        &self,
        request: &VisionRequest,
        schema: &serde_json::Value,
    ) -> Result<ModelStructured, AnswersheetError>;
}
