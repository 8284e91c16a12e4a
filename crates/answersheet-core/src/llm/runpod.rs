//! Region-detection model served through RunPod's asynchronous job API.
//!
//! A request is a job: it is submitted, then polled until the service reports
//! a terminal status. Failed or timed-out jobs are resubmitted under a fresh
//! id up to `max_retries` times. Transport faults and malformed status
//! payloads end the job immediately.

use crate::error::AnswersheetError;
use crate::llm::{ModelStructured, ModelText, Usage, VisionModel, VisionRequest};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const API_BASE: &str = "https://api.runpod.ai/v2";

/// Status reported by one poll of a job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    /// `IN_QUEUE`, `IN_PROGRESS` or any other non-terminal status.
    Pending(String),
    Completed(Value),
    /// `FAILED` or `TIMED_OUT`.
    Failed(String),
}

/// Lifecycle of one job.
#[derive(Debug)]
pub enum JobState {
    Submitted { job_id: String },
    Polling { job_id: String },
    Retrying { job_id: String, reason: String },
    Completed(Value),
    Fatal(AnswersheetError),
}

/// Transport for the job endpoints.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a job, returning its id.
    async fn submit(&self, input: &Value) -> Result<String, AnswersheetError>;

    /// Fetch the current status of a job.
    async fn status(&self, job_id: &str) -> Result<JobStatus, AnswersheetError>;
}

/// Suspension between polls; injectable so tests do not wait.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Parse a status payload. Non-JSON bodies and payloads without a `status`
/// field are malformed.
pub fn parse_status(job_id: &str, body: &str) -> Result<JobStatus, AnswersheetError> {
    let malformed = |reason: String| AnswersheetError::MalformedResponse {
        job_id: job_id.to_string(),
        reason,
    };

    let payload: Value =
        serde_json::from_str(body).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed(format!("no 'status' key in {}", payload)))?;

    Ok(match status {
        "COMPLETED" => JobStatus::Completed(payload.get("output").cloned().unwrap_or(Value::Null)),
        "FAILED" | "TIMED_OUT" => JobStatus::Failed(status.to_string()),
        other => JobStatus::Pending(other.to_string()),
    })
}

/// Drives jobs through the state machine.
pub struct JobRunner {
    api: Arc<dyn JobApi>,
    sleeper: Arc<dyn Sleeper>,
    poll_interval: Duration,
    max_retries: u32,
}

impl JobRunner {
    pub fn new(
        api: Arc<dyn JobApi>,
        sleeper: Arc<dyn Sleeper>,
        poll_interval: Duration,
        max_retries: u32,
    ) -> Self {
        JobRunner {
            api,
            sleeper,
            poll_interval,
            max_retries,
        }
    }

    /// Run `input` to completion and return the job output.
    pub async fn run(&self, input: &Value) -> Result<Value, AnswersheetError> {
        let mut attempts = 1;
        let mut state = match self.api.submit(input).await {
            Ok(job_id) => JobState::Submitted { job_id },
            Err(e) => JobState::Fatal(e),
        };

        loop {
            state = match state {
                JobState::Submitted { job_id } => {
                    debug!(%job_id, attempt = attempts, "job submitted");
                    JobState::Polling { job_id }
                }
                JobState::Polling { job_id } => match self.api.status(&job_id).await {
                    Ok(JobStatus::Completed(output)) => JobState::Completed(output),
                    Ok(JobStatus::Failed(reason)) => JobState::Retrying { job_id, reason },
                    Ok(JobStatus::Pending(_)) => {
                        self.sleeper.sleep(self.poll_interval).await;
                        JobState::Polling { job_id }
                    }
                    Err(e) => JobState::Fatal(e),
                },
                JobState::Retrying { job_id, reason } => {
                    if attempts > self.max_retries {
                        JobState::Fatal(AnswersheetError::JobFailed { job_id, attempts })
                    } else {
                        warn!(%job_id, %reason, attempt = attempts, "job did not complete, resubmitting");
                        attempts += 1;
                        match self.api.submit(input).await {
                            Ok(job_id) => JobState::Submitted { job_id },
                            Err(e) => JobState::Fatal(e),
                        }
                    }
                }
                JobState::Completed(output) => return Ok(output),
                JobState::Fatal(e) => return Err(e),
            };
        }
    }
}

/// [`JobApi`] over HTTPS.
pub struct HttpJobApi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpJobApi {
    pub fn new(endpoint_id: &str, api_key: impl Into<String>) -> Result<Self, AnswersheetError> {
        let api_key = api_key.into();
        if endpoint_id.is_empty() || api_key.is_empty() {
            return Err(AnswersheetError::Config(
                "RunPod endpoint id and API key must both be set".into(),
            ));
        }
        Ok(HttpJobApi {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            base_url: format!("{}/{}", API_BASE, endpoint_id),
            api_key,
        })
    }
}

#[async_trait]
impl JobApi for HttpJobApi {
    async fn submit(&self, input: &Value) -> Result<String, AnswersheetError> {
        let response = self
            .http
            .post(format!("{}/run", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": input }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AnswersheetError::Transport(format!(
                "job submission failed with HTTP {}: {}",
                status, body
            )));
        }

        let payload: Value = serde_json::from_str(&body)?;
        payload
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AnswersheetError::MalformedResponse {
                job_id: String::new(),
                reason: format!("no job id in submission response: {}", body),
            })
    }

    async fn status(&self, job_id: &str) -> Result<JobStatus, AnswersheetError> {
        let response = self
            .http
            .get(format!("{}/status/{}", self.base_url, job_id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AnswersheetError::Transport(format!(
                "failed to poll job {}: HTTP {}: {}",
                job_id, status, body
            )));
        }
        parse_status(job_id, &body)
    }
}

/// Point-detection model (Molmo) behind a RunPod endpoint.
pub struct RunpodClient {
    runner: JobRunner,
    model: String,
}

impl RunpodClient {
    pub fn new(runner: JobRunner, model: impl Into<String>) -> Self {
        RunpodClient {
            runner,
            model: model.into(),
        }
    }
}

/// The worker wraps its text in `{"output": "..."}`; accept a bare string too.
fn output_text(output: &Value) -> Option<&str> {
    match output {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("output").and_then(Value::as_str),
        _ => None,
    }
}

#[async_trait]
impl VisionModel for RunpodClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &VisionRequest) -> Result<ModelText, AnswersheetError> {
        let input = json!({
            "image": request.image.to_uri(),
            "text": request.user_prompt,
        });
        let output = self.runner.run(&input).await?;
        let text = match output_text(&output) {
            Some(text) => text.to_string(),
            None => {
                warn!(model = %self.model, "job output carried no text");
                String::new()
            }
        };
        Ok(ModelText {
            model: self.model.clone(),
            text,
            usage: Usage::default(),
        })
    }

    async fn generate_structured(
        &self,
        _request: &VisionRequest,
        _schema: &Value,
    ) -> Result<ModelStructured, AnswersheetError> {
        Err(AnswersheetError::Model {
            model: self.model.clone(),
            message: "structured generation is not supported by the point-detection model".into(),
        })
    }
}
