use crate::error::AnswersheetError;
use crate::llm::Pricing;
use crate::raster::DEFAULT_DPI;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Process settings. Every section is optional in the YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub raster: RasterSettings,
    pub pipeline: PipelineSettings,
    pub models: ModelSettings,
    pub runpod: RunpodSettings,
    pub storage: StorageSettings,
    /// Prompt book overriding the built-in one.
    pub prompts: Option<PathBuf>,
    #[serde(skip)]
    pub secrets: Secrets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RasterSettings {
    pub dpi: u32,
}

impl Default for RasterSettings {
    fn default() -> Self {
        RasterSettings { dpi: DEFAULT_DPI }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound on in-flight model calls per phase.
    pub max_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        PipelineSettings { max_concurrency: 8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub extraction: String,
    pub verification: String,
    /// Dollars per one million tokens, keyed by model name.
    pub pricing: BTreeMap<String, Pricing>,
}

impl Default for ModelSettings {
    fn default() -> Self {
        let mut pricing = BTreeMap::new();
        pricing.insert(
            DEFAULT_MODEL.to_string(),
            Pricing {
                input_cost: Decimal::new(30, 2),
                output_cost: Decimal::new(250, 2),
            },
        );
        ModelSettings {
            extraction: DEFAULT_MODEL.to_string(),
            verification: DEFAULT_MODEL.to_string(),
            pricing,
        }
    }
}

impl ModelSettings {
    /// Pricing for `model`; models without an entry are free.
    pub fn pricing_for(&self, model: &str) -> Pricing {
        self.pricing.get(model).cloned().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunpodSettings {
    pub endpoint_id: Option<String>,
    pub poll_interval_ms: u64,
    pub max_retries: u32,
}

impl Default for RunpodSettings {
    fn default() -> Self {
        RunpodSettings {
            endpoint_id: None,
            poll_interval_ms: 5000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub bucket: Option<String>,
    pub region: Option<String>,
    /// S3-compatible endpoint for non-AWS object stores.
    pub endpoint: Option<String>,
}

/// Credentials. Never read from or written to the settings file.
#[derive(Clone, Default)]
pub struct Secrets {
    pub gemini_api_key: Option<String>,
    pub runpod_api_key: Option<String>,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Secrets")
            .field("gemini_api_key", &mask(&self.gemini_api_key))
            .field("runpod_api_key", &mask(&self.runpod_api_key))
            .field("s3_access_key_id", &mask(&self.s3_access_key_id))
            .field("s3_secret_access_key", &mask(&self.s3_secret_access_key))
            .finish()
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, AnswersheetError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnswersheetError::Config(format!("{}: {}", path.display(), e)))?;
        let settings = Self::from_yaml_str(&content)?;
        Ok(settings)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, AnswersheetError> {
        let settings: Settings = serde_yaml::from_str(yaml)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AnswersheetError> {
        if self.raster.dpi == 0 {
            return Err(AnswersheetError::Config("raster.dpi must be positive".into()));
        }
        if self.pipeline.max_concurrency == 0 {
            return Err(AnswersheetError::Config(
                "pipeline.max_concurrency must be positive".into(),
            ));
        }
        if self.models.extraction.is_empty() || self.models.verification.is_empty() {
            return Err(AnswersheetError::Config("model names must not be empty".into()));
        }
        Ok(())
    }

    /// Fill secrets and deployment values from the environment.
    ///
    /// `lookup` is `std::env::var` in the binary; values from the
    /// environment win over the settings file.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        self.secrets.gemini_api_key = get("GEMINI_API_KEY");
        self.secrets.runpod_api_key = get("RUNPOD_API_KEY");
        self.secrets.s3_access_key_id = get("S3_ACCESS_KEY_ID");
        self.secrets.s3_secret_access_key = get("S3_SECRET_ACCESS_KEY");

        if let Some(endpoint_id) = get("ENDPOINT_ID") {
            self.runpod.endpoint_id = Some(endpoint_id);
        }
        if let Some(region) = get("S3_REGION") {
            self.storage.region = Some(region);
        }
        if let Some(bucket) = get("S3_BUCKET_NAME") {
            self.storage.bucket = Some(bucket);
        }
    }
}
