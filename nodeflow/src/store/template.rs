//! Prompt templates rendered against the variable store.

use super::{Operand, VariableStore};
use crate::backends::ChatMessage;
use crate::errors::{NodeflowError, Result};
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_#.\-]*)\}")
            .unwrap_or_else(|e| unreachable!("placeholder pattern is valid: {e}"))
    })
}

/// The text of one prompt entry.
#[derive(Debug, Clone, PartialEq)]
enum PromptText {
    /// `$name`: the whole entry is the variable's value.
    Whole(String),
    /// Text with `{name}` placeholders.
    Template(String),
}

/// One role/text entry of a prompt template.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptEntry {
    role: String,
    text: PromptText,
}

impl PromptEntry {
    /// Parses an entry from its `{role, prompt}` configuration.
    pub fn parse(node: &str, config: &Value) -> Result<Self> {
        let role = config
            .get("role")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeflowError::invalid_config(node, "prompt entry requires a `role` string"))?;
        let prompt = config
            .get("prompt")
            .ok_or_else(|| NodeflowError::invalid_config(node, "prompt entry requires a `prompt`"))?;

        let text = match Operand::parse(node, prompt)? {
            Operand::Variable(name) => PromptText::Whole(name),
            Operand::Literal(Value::String(s)) => PromptText::Template(s),
            Operand::Literal(other) => {
                return Err(NodeflowError::invalid_config(
                    node,
                    format!("prompt must be a string, got {other}"),
                ))
            }
        };

        Ok(Self {
            role: role.to_string(),
            text,
        })
    }

    /// Returns the role.
    #[must_use]
    pub fn role(&self) -> &str {
        &self.role
    }

    fn render(&self, node: &str, store: &VariableStore) -> Result<ChatMessage> {
        let content = match &self.text {
            PromptText::Whole(name) => stringify(store.resolve(node, name)?),
            PromptText::Template(text) => render_placeholders(node, text, store)?,
        };
        Ok(ChatMessage::new(self.role.clone(), content))
    }
}

/// An ordered list of prompt entries.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    entries: Vec<PromptEntry>,
}

impl PromptTemplate {
    /// Parses a template from a list of `{role, prompt}` mappings.
    pub fn parse(node: &str, config: &Value) -> Result<Self> {
        let items = config
            .as_array()
            .ok_or_else(|| NodeflowError::invalid_config(node, "`prompts` must be a list"))?;
        if items.is_empty() {
            return Err(NodeflowError::invalid_config(node, "`prompts` must not be empty"));
        }
        let entries = items
            .iter()
            .map(|item| PromptEntry::parse(node, item))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { entries })
    }

    /// Returns the entries.
    #[must_use]
    pub fn entries(&self) -> &[PromptEntry] {
        &self.entries
    }

    /// Renders every entry against the store.
    ///
    /// History turns, when given, are placed in order right before the last entry.
    pub fn render(
        &self,
        node: &str,
        store: &VariableStore,
        history: Option<Vec<ChatMessage>>,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = self
            .entries
            .iter()
            .map(|entry| entry.render(node, store))
            .collect::<Result<Vec<_>>>()?;

        if let Some(history) = history {
            let at = messages.len().saturating_sub(1);
            messages.splice(at..at, history);
        }

        Ok(messages)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_placeholders(node: &str, text: &str, store: &VariableStore) -> Result<String> {
    let mut missing = None;
    let rendered = placeholder_pattern().replace_all(text, |caps: &Captures<'_>| {
        match caps.get(1) {
            None if &caps[0] == "{{" => "{".to_string(),
            None => "}".to_string(),
            Some(name) => match store.get(name.as_str()) {
                Some(value) => stringify(value),
                None => {
                    missing.get_or_insert_with(|| name.as_str().to_string());
                    String::new()
                }
            },
        }
    });

    match missing {
        Some(name) => Err(NodeflowError::unresolved(node, name)),
        None => Ok(rendered.into_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> VariableStore {
        let mut store = VariableStore::new();
        store.set("input", json!("what is rust?"));
        store.set("lang", json!("en"));
        store.set("count", json!(3));
        store
    }

    #[test]
    fn test_render_placeholders() {
        let template = PromptTemplate::parse(
            "llm",
            &json!([
                {"role": "system", "prompt": "Answer in {lang}, {count} lines."},
                {"role": "user", "prompt": "{input}"}
            ]),
        )
        .unwrap();

        let messages = template.render("llm", &store(), None).unwrap();
        assert_eq!(messages[0].content, "Answer in en, 3 lines.");
        assert_eq!(messages[1], ChatMessage::new("user", "what is rust?"));
    }

    #[test]
    fn test_escaped_braces() {
        let template =
            PromptTemplate::parse("llm", &json!([{"role": "user", "prompt": "{{json}} {input}"}]))
                .unwrap();
        let messages = template.render("llm", &store(), None).unwrap();
        assert_eq!(messages[0].content, "{json} what is rust?");
    }

    #[test]
    fn test_missing_placeholder_is_unresolved() {
        let template =
            PromptTemplate::parse("llm", &json!([{"role": "user", "prompt": "{question}"}]))
                .unwrap();
        let err = template.render("llm", &store(), None).unwrap_err();
        assert!(matches!(
            err,
            NodeflowError::UnresolvedVariable { ref name, .. } if name == "question"
        ));
    }

    #[test]
    fn test_whole_value_reference() {
        let template =
            PromptTemplate::parse("llm", &json!([{"role": "user", "prompt": "$input"}])).unwrap();
        let messages = template.render("llm", &store(), None).unwrap();
        assert_eq!(messages[0].content, "what is rust?");
    }

    #[test]
    fn test_history_goes_before_last_entry() {
        let template = PromptTemplate::parse(
            "llm",
            &json!([
                {"role": "system", "prompt": "be brief"},
                {"role": "user", "prompt": "{input}"}
            ]),
        )
        .unwrap();
        let history = vec![
            ChatMessage::new("user", "earlier question"),
            ChatMessage::new("ai", "earlier answer"),
        ];

        let messages = template.render("llm", &store(), Some(history)).unwrap();
        let roles: Vec<&str> = messages.iter().map(|m| m.role.as_str()).collect();
        assert_eq!(roles, vec!["system", "user", "ai", "user"]);
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[3].content, "what is rust?");
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(PromptTemplate::parse("llm", &json!([])).is_err());
        assert!(PromptTemplate::parse("llm", &json!("text")).is_err());
        assert!(PromptTemplate::parse("llm", &json!([{"prompt": "x"}])).is_err());
        assert!(PromptTemplate::parse("llm", &json!([{"role": "user", "prompt": 4}])).is_err());
    }
}
