use answersheet_core::error::AnswersheetError;
use answersheet_core::prompts::{placeholders, PromptBook};
use std::path::Path;

fn open(file: Option<&Path>) -> Result<PromptBook, AnswersheetError> {
    match file {
        Some(path) => PromptBook::load(path),
        None => PromptBook::builtin(),
    }
}

pub fn list(file: Option<&Path>) -> Result<(), AnswersheetError> {
    let book = open(file)?;

    println!("System prompts:\n");
    for name in book.system.keys() {
        println!("  {}", name);
    }

    println!("\nUser prompts:\n");
    for (name, template) in &book.user {
        let params: Vec<String> = placeholders(template).into_iter().collect();
        if params.is_empty() {
            println!("  {}", name);
        } else {
            println!("  {:<28} {{{}}}", name, params.join("}, {"));
        }
    }
    println!();
    Ok(())
}

pub fn show(name: &str, file: Option<&Path>) -> Result<(), AnswersheetError> {
    let book = open(file)?;
    let system = book.system(name).ok();
    let user = book.user(name).ok();
    if system.is_none() && user.is_none() {
        return Err(AnswersheetError::PromptNotFound(name.to_string()));
    }

    if let Some(text) = system {
        println!("--- system: {} ---\n{}", name, text.trim_end());
    }
    if let Some(text) = user {
        if system.is_some() {
            println!();
        }
        println!("--- user: {} ---\n{}", name, text.trim_end());
    }
    Ok(())
}

pub fn validate(file: &Path) -> Result<(), AnswersheetError> {
    let book = PromptBook::load(file)?;
    println!("Prompt book '{}' is valid.", file.display());
    println!("  System prompts: {}", book.system.len());
    println!("  User prompts: {}", book.user.len());
    Ok(())
}
