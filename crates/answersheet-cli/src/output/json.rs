use answersheet_core::error::AnswersheetError;
use answersheet_core::pipeline::SubmissionResult;

pub fn format(result: &SubmissionResult) -> Result<String, AnswersheetError> {
    Ok(serde_json::to_string_pretty(result)?)
}
