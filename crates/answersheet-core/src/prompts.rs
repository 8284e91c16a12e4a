use crate::error::AnswersheetError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

const DEFAULT_PROMPTS_YAML: &str = include_str!("../../../prompts/default.yaml");

/// Templates every prompt book must define, with the parameters each user
/// template has to accept.
pub const REQUIRED_SYSTEM: &[&str] = &["page_extract_prompt"];
pub const REQUIRED_USER: &[(&str, &[&str])] = &[
    ("page_extract_prompt", &[]),
    ("molmo_extraction_prompt", &["question_numbers"]),
    ("verification_prompt", &["bboxes", "question_numbers"]),
];

/// System prompts and user prompt templates, loaded from YAML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptBook {
    #[serde(default)]
    pub system: BTreeMap<String, String>,
    #[serde(default)]
    pub user: BTreeMap<String, String>,
}

impl PromptBook {
    /// The prompt book shipped with the crate.
    pub fn builtin() -> Result<Self, AnswersheetError> {
        Self::from_yaml_str(DEFAULT_PROMPTS_YAML)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, AnswersheetError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load and validate a prompt book from a YAML file.
    pub fn load(path: &Path) -> Result<Self, AnswersheetError> {
        let content = std::fs::read_to_string(path).map_err(|e| AnswersheetError::PromptLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let book: PromptBook =
            serde_yaml::from_str(&content).map_err(|e| AnswersheetError::PromptLoad {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        book.validate()?;
        Ok(book)
    }

    pub fn system(&self, name: &str) -> Result<&str, AnswersheetError> {
        self.system
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AnswersheetError::PromptNotFound(name.to_string()))
    }

    pub fn user(&self, name: &str) -> Result<&str, AnswersheetError> {
        self.user
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| AnswersheetError::PromptNotFound(name.to_string()))
    }

    /// Fill a user template. Every `{param}` in the template must be given;
    /// extra parameters are ignored.
    pub fn format_user(
        &self,
        name: &str,
        params: &[(&str, &str)],
    ) -> Result<String, AnswersheetError> {
        let template = self.user(name)?;
        render(template, params).map_err(|missing| AnswersheetError::MissingPromptParams {
            name: name.to_string(),
            params: missing,
        })
    }

    /// Check that all templates the pipeline uses exist and reference only
    /// the parameters the pipeline supplies.
    pub fn validate(&self) -> Result<(), AnswersheetError> {
        for name in REQUIRED_SYSTEM {
            self.system(name)?;
        }
        for (name, supplied) in REQUIRED_USER {
            let unknown: Vec<String> = placeholders(self.user(name)?)
                .into_iter()
                .filter(|p| !supplied.contains(&p.as_str()))
                .collect();
            if !unknown.is_empty() {
                return Err(AnswersheetError::Config(format!(
                    "prompt '{}' uses parameters the pipeline does not supply: {}",
                    name,
                    unknown.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Names of all `{param}` placeholders in a template, sorted.
pub fn placeholders(template: &str) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let _ = scan(template, |name| {
        names.insert(name.to_string());
        None
    });
    names
}

fn render(template: &str, params: &[(&str, &str)]) -> Result<String, Vec<String>> {
    let mut missing = BTreeSet::new();
    let out = scan(template, |name| {
        let value = params.iter().find(|(k, _)| *k == name).map(|(_, v)| *v);
        if value.is_none() {
            missing.insert(name.to_string());
        }
        value
    });
    if missing.is_empty() {
        Ok(out)
    } else {
        Err(missing.into_iter().collect())
    }
}

/// Walk a template, resolving `{name}` through `lookup` and unescaping
/// `{{`/`}}`. Unterminated braces are copied through.
fn scan<'a, F>(template: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for n in chars.by_ref() {
                    if n == '}' {
                        closed = true;
                        break;
                    }
                    name.push(n);
                }
                if !closed {
                    out.push('{');
                    out.push_str(&name);
                } else if let Some(value) = lookup(&name) {
                    out.push_str(value);
                }
            }
            other => out.push(other),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_book_is_valid() {
        let book = PromptBook::builtin().unwrap();
        book.validate().unwrap();
        assert!(!book.system("page_extract_prompt").unwrap().is_empty());
    }

    #[test]
    fn test_format_fills_parameters() {
        let book = PromptBook::builtin().unwrap();
        let prompt = book
            .format_user("molmo_extraction_prompt", &[("question_numbers", "1, 2, 3")])
            .unwrap();
        assert!(prompt.contains("1, 2, 3"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_missing_parameters_reported() {
        let book = PromptBook::builtin().unwrap();
        let err = book.format_user("verification_prompt", &[]).unwrap_err();
        match err {
            AnswersheetError::MissingPromptParams { name, params } => {
                assert_eq!(name, "verification_prompt");
                assert_eq!(params, vec!["bboxes", "question_numbers"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_prompt() {
        let book = PromptBook::builtin().unwrap();
        assert!(matches!(
            book.format_user("nope", &[]),
            Err(AnswersheetError::PromptNotFound(_))
        ));
    }

    #[test]
    fn test_escaped_braces() {
        let rendered = render("{{\"q\": {q}}}", &[("q", "5")]).unwrap();
        assert_eq!(rendered, "{\"q\": 5}");
        assert!(placeholders("{{literal}} {real}").contains("real"));
        assert_eq!(placeholders("{{literal}}").len(), 0);
    }

    #[test]
    fn test_validate_rejects_unsupplied_parameter() {
        let yaml = r#"
system:
  page_extract_prompt: "sys"
user:
  page_extract_prompt: "read {page}"
  molmo_extraction_prompt: "point {question_numbers}"
  verification_prompt: "{bboxes} {question_numbers}"
"#;
        let book = PromptBook::from_yaml_str(yaml).unwrap();
        assert!(matches!(book.validate(), Err(AnswersheetError::Config(_))));
    }
}
