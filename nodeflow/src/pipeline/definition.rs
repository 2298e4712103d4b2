//! Pipeline definitions and the YAML config loader.

use crate::errors::{NodeflowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory scanned when no explicit config files are given.
pub const DEFAULT_CONFIG_DIR: &str = "workflows";

/// One node of a definition: a type tag and its configuration mapping.
///
/// Written in YAML as a single-key mapping, e.g. `- LLM: {model_id: m}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct NodeConfig {
    /// The type tag, canonical or alias.
    pub node_type: String,
    /// The node's configuration fields.
    pub fields: Map<String, Value>,
}

impl NodeConfig {
    /// Creates a node config.
    #[must_use]
    pub fn new(node_type: impl Into<String>, fields: Map<String, Value>) -> Self {
        Self {
            node_type: node_type.into(),
            fields,
        }
    }

    /// Returns the optional `name` field.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.fields.get("name").and_then(Value::as_str)
    }
}

impl TryFrom<Map<String, Value>> for NodeConfig {
    type Error = String;

    fn try_from(map: Map<String, Value>) -> std::result::Result<Self, Self::Error> {
        if map.len() != 1 {
            return Err(format!(
                "a component must be a single-key mapping of type to config, got {} keys",
                map.len()
            ));
        }
        let Some((node_type, config)) = map.into_iter().next() else {
            return Err("empty component".to_string());
        };
        let fields = match config {
            Value::Object(fields) => fields,
            Value::Null => Map::new(),
            other => return Err(format!("config of '{node_type}' must be a mapping, got {other}")),
        };
        Ok(Self { node_type, fields })
    }
}

impl From<NodeConfig> for Map<String, Value> {
    fn from(node: NodeConfig) -> Self {
        let mut map = Map::new();
        map.insert(node.node_type, Value::Object(node.fields));
        map
    }
}

/// The `components` section of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Components {
    /// An ordered chain.
    Linear(Vec<NodeConfig>),
    /// A keyed tree. Parsed so it can be reported, but never built.
    Tree(Map<String, Value>),
}

/// Delivery mode of an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// One reply after the whole chain ran.
    #[default]
    Sync,
    /// One message per streamed chunk.
    Stream,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sync => "sync",
            Self::Stream => "stream",
        })
    }
}

/// An endpoint declared by a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointBinding {
    /// The route path, e.g. `/chat`.
    pub path: String,
    /// Sync or stream delivery.
    #[serde(rename = "type", default)]
    pub kind: EndpointKind,
}

/// A pipeline definition, one per config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    /// Workflow id.
    #[serde(rename = "workflow")]
    pub id: String,
    /// Optional version string.
    #[serde(default)]
    pub version: Option<String>,
    /// The node list.
    pub components: Components,
    /// Endpoint bindings.
    #[serde(default)]
    pub endpoints: Vec<EndpointBinding>,
}

impl PipelineDefinition {
    /// Parses a definition from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|e| NodeflowError::Config(e.to_string()))
    }

    /// Reads and parses a definition file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NodeflowError::Config(format!("cannot read {}: {e}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| NodeflowError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Loads pipeline definitions from explicit files or a directory.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIG_DIR)
    }
}

impl ConfigLoader {
    /// Creates a loader scanning `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
        }
    }

    /// Loads exactly these files instead of scanning the directory.
    #[must_use]
    pub fn with_files(mut self, files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.files = files.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the files that [`load`](Self::load) would read.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the directory cannot be listed.
    pub fn paths(&self) -> Result<Vec<PathBuf>> {
        if !self.files.is_empty() {
            return Ok(self.files.clone());
        }

        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            NodeflowError::Config(format!("cannot list {}: {e}", self.dir.display()))
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| ext == "yml" || ext == "yaml")
            })
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Loads every definition, skipping files that fail to parse.
    ///
    /// # Errors
    ///
    /// Returns `Config` only if the directory cannot be listed.
    pub fn load(&self) -> Result<Vec<PipelineDefinition>> {
        let paths = self.paths()?;
        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            match PipelineDefinition::from_path(&path) {
                Ok(definition) => {
                    debug!(file = %path.display(), workflow = %definition.id, "Loaded definition");
                    definitions.push(definition);
                }
                Err(e) => warn!(file = %path.display(), error = %e, "Skipping config file"),
            }
        }
        info!(count = definitions.len(), "Loaded pipeline definitions");
        Ok(definitions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    const CHAT: &str = r#"
workflow: chat
version: "2024-01-21"
components:
  - Start: {outputs: [input]}
  - Memory: {n: 4}
  - LLM:
      model_id: m
      prompts:
        - {role: user, prompt: "{input}"}
      outputs: [answer]
  - End: {final_output: $answer}
endpoints:
  - {path: /chat, type: sync}
  - {path: /chat/stream, type: stream}
"#;

    #[test]
    fn test_parses_linear_definition() {
        let def = PipelineDefinition::from_yaml_str(CHAT).unwrap();
        assert_eq!(def.id, "chat");
        assert_eq!(def.version.as_deref(), Some("2024-01-21"));

        let Components::Linear(nodes) = &def.components else {
            panic!("expected a linear chain");
        };
        let tags: Vec<&str> = nodes.iter().map(|n| n.node_type.as_str()).collect();
        assert_eq!(tags, vec!["Start", "Memory", "LLM", "End"]);
        assert_eq!(nodes[1].fields.get("n"), Some(&json!(4)));
        assert_eq!(nodes[3].fields.get("final_output"), Some(&json!("$answer")));

        assert_eq!(
            def.endpoints,
            vec![
                EndpointBinding { path: "/chat".into(), kind: EndpointKind::Sync },
                EndpointBinding { path: "/chat/stream".into(), kind: EndpointKind::Stream },
            ]
        );
    }

    #[test]
    fn test_null_config_and_tree_shape() {
        let def = PipelineDefinition::from_yaml_str(
            "workflow: w\ncomponents:\n  - Start:\n  - End: {final_output: $x}\n",
        )
        .unwrap();
        let Components::Linear(nodes) = def.components else {
            panic!("expected a linear chain");
        };
        assert!(nodes[0].fields.is_empty());
        assert!(def.endpoints.is_empty());

        let tree = PipelineDefinition::from_yaml_str(
            "workflow: t\ncomponents:\n  root: {Start: {outputs: [input]}}\n",
        )
        .unwrap();
        assert!(matches!(tree.components, Components::Tree(_)));
    }

    #[test]
    fn test_multi_key_component_is_rejected() {
        let err = PipelineDefinition::from_yaml_str(
            "workflow: w\ncomponents:\n  - {Start: {}, End: {}}\n",
        )
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG");
    }

    #[test]
    fn test_loader_scans_sorted_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.yaml"), CHAT.replace("workflow: chat", "workflow: b"))
            .unwrap();
        std::fs::write(dir.path().join("a.yml"), CHAT.replace("workflow: chat", "workflow: a"))
            .unwrap();
        std::fs::write(dir.path().join("broken.yml"), "workflow: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loader = ConfigLoader::new(dir.path());
        assert_eq!(loader.paths().unwrap().len(), 3);

        let ids: Vec<String> = loader.load().unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_loader_explicit_files_and_missing_dir() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("only.yaml");
        std::fs::write(&file, CHAT).unwrap();

        let loader = ConfigLoader::new("does-not-exist").with_files([file]);
        assert_eq!(loader.load().unwrap().len(), 1);

        assert!(ConfigLoader::new(dir.path().join("missing")).load().is_err());
    }
}
