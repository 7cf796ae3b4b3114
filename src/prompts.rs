//! Prompts registry: named, parameterized message templates.
//!
//! Loaded once at startup from the file named by `prompts.file`: a JSON
//! array of `{name, description?, arguments, template}` entries. Getting
//! a prompt stringifies each supplied argument and substitutes it into
//! the template's `{{name}}` placeholders.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::HubError;
use crate::protocol::mcp::{
    Content, PromptArgumentDescriptor, PromptDescriptor, PromptMessage, PromptsGetResult,
};

/// One prompt template as stored in the prompts file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromptEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgumentDescriptor>,
    pub template: String,
}

/// In-memory map of prompt name to template.
pub struct PromptsRegistry {
    prompts: HashMap<String, PromptEntry>,
}

impl PromptsRegistry {
    /// An empty registry, used when no prompts file is configured.
    pub fn empty() -> Self {
        Self {
            prompts: HashMap::new(),
        }
    }

    /// Load a registry from a prompts file.
    pub fn from_file(path: &Path) -> Result<Self, HubError> {
        let raw = std::fs::read_to_string(path).map_err(|e| HubError::Config {
            details: format!("cannot read prompts file {}: {}", path.display(), e),
        })?;
        let entries: Vec<PromptEntry> =
            serde_json::from_str(&raw).map_err(|e| HubError::Config {
                details: format!("prompts file {} is invalid: {}", path.display(), e),
            })?;

        let mut prompts = HashMap::new();
        for entry in entries {
            if prompts.insert(entry.name.clone(), entry).is_some() {
                return Err(HubError::Config {
                    details: format!("prompts file {} has duplicate names", path.display()),
                });
            }
        }
        Ok(Self { prompts })
    }

    /// Descriptors of every prompt, sorted by name.
    pub fn list(&self) -> Vec<PromptDescriptor> {
        let mut prompts: Vec<PromptDescriptor> = self
            .prompts
            .values()
            .map(|entry| PromptDescriptor {
                name: entry.name.clone(),
                description: entry.description.clone(),
                arguments: entry.arguments.clone(),
            })
            .collect();
        prompts.sort_by(|a, b| a.name.cmp(&b.name));
        prompts
    }

    /// Render a prompt with the given arguments.
    ///
    /// Arguments marked required must be present; every supplied value is
    /// stringified before substitution.
    pub fn get(
        &self,
        name: &str,
        arguments: &serde_json::Map<String, Value>,
    ) -> Result<PromptsGetResult, HubError> {
        let entry = self.prompts.get(name).ok_or_else(|| HubError::PromptNotFound {
            name: name.to_string(),
        })?;

        let missing: Vec<&str> = entry
            .arguments
            .iter()
            .filter(|a| a.required && !arguments.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(HubError::InvalidParams {
                details: format!(
                    "prompt '{}' is missing required arguments: {}",
                    name,
                    missing.join(", ")
                ),
            });
        }

        let mut text = entry.template.clone();
        for (key, value) in arguments {
            text = text.replace(&format!("{{{{{}}}}}", key), &stringify(value));
        }

        Ok(PromptsGetResult {
            description: entry.description.clone(),
            messages: vec![PromptMessage {
                role: "user".to_string(),
                content: Content::text(text),
            }],
        })
    }
}

/// Argument values become template text: strings verbatim, everything
/// else in its JSON form.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry_with(entries: &str) -> PromptsRegistry {
        let entries: Vec<PromptEntry> = serde_json::from_str(entries).unwrap();
        let mut prompts = HashMap::new();
        for entry in entries {
            prompts.insert(entry.name.clone(), entry);
        }
        PromptsRegistry { prompts }
    }

    fn args(value: Value) -> serde_json::Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    const REVIEW_PROMPT: &str = r#"[{
        "name": "review",
        "description": "Review a file",
        "arguments": [
            {"name": "path", "required": true},
            {"name": "focus", "description": "What to look at"}
        ],
        "template": "Review {{path}} with focus on {{focus}}."
    }]"#;

    #[test]
    fn test_render_substitutes_arguments() {
        let registry = registry_with(REVIEW_PROMPT);
        let result = registry
            .get("review", &args(json!({"path": "src/lib.rs", "focus": "errors"})))
            .unwrap();

        assert_eq!(result.description.as_deref(), Some("Review a file"));
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].role, "user");
        assert_eq!(
            result.messages[0].content,
            Content::text("Review src/lib.rs with focus on errors.")
        );
    }

    #[test]
    fn test_non_string_arguments_are_stringified() {
        let registry = registry_with(
            r#"[{"name": "count", "arguments": [{"name": "n", "required": true}],
                 "template": "Count to {{n}}"}]"#,
        );
        let result = registry.get("count", &args(json!({"n": 42}))).unwrap();
        assert_eq!(result.messages[0].content, Content::text("Count to 42"));
    }

    #[test]
    fn test_missing_required_argument_is_invalid_params() {
        let registry = registry_with(REVIEW_PROMPT);
        let result = registry.get("review", &args(json!({"focus": "errors"})));
        match result {
            Err(HubError::InvalidParams { details }) => assert!(details.contains("path")),
            other => panic!("expected invalid params, got {:?}", other),
        }
    }

    #[test]
    fn test_optional_argument_may_be_absent() {
        let registry = registry_with(REVIEW_PROMPT);
        let result = registry
            .get("review", &args(json!({"path": "src/lib.rs"})))
            .unwrap();
        // The unreplaced placeholder stays; the prompt author opted into it.
        assert_eq!(
            result.messages[0].content,
            Content::text("Review src/lib.rs with focus on {{focus}}.")
        );
    }

    #[test]
    fn test_unknown_prompt_shares_method_not_found_code() {
        let registry = PromptsRegistry::empty();
        let result = registry.get("missing", &serde_json::Map::new());
        match result {
            Err(e) => assert_eq!(e.to_jsonrpc_code(), -32601),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = registry_with(
            r#"[{"name": "zeta", "arguments": [], "template": "z"},
                {"name": "alpha", "arguments": [], "template": "a"}]"#,
        );
        let names: Vec<String> = registry.list().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(&path, REVIEW_PROMPT).unwrap();

        let registry = PromptsRegistry::from_file(&path).unwrap();
        assert_eq!(registry.list().len(), 1);
    }

    #[test]
    fn test_from_file_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompts.json");
        std::fs::write(
            &path,
            r#"[{"name": "a", "arguments": [], "template": "x"},
                {"name": "a", "arguments": [], "template": "y"}]"#,
        )
        .unwrap();

        assert!(matches!(
            PromptsRegistry::from_file(&path),
            Err(HubError::Config { .. })
        ));
    }
}
