use answersheet_core::error::AnswersheetError;
use answersheet_core::structured::extraction_schema;

pub fn run() -> Result<(), AnswersheetError> {
    let schema = serde_json::to_string_pretty(&extraction_schema())?;
    println!("{schema}");
    Ok(())
}
