//! Shared types exchanged between the loop and its collaborators.
//!
//! Both the model response and the sandbox observation carry an open set of fields next to
//! their required text; the extra fields travel through unchanged into the message log and the
//! templates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reply from the model collaborator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    /// Auxiliary fields returned by the backend (usage, raw payloads, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            extra: Map::new(),
        }
    }
}

/// The single command extracted from a model response.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    /// Trimmed command text.
    pub command: String,
    pub response: ModelResponse,
}

/// Result of executing an action in the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Combined command output.
    pub output: String,
    /// Any other fields reported by the environment (e.g. `returncode`) plus `action` once the
    /// loop has merged it in.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Observation {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Record the command that produced this observation.
    pub fn with_action(self, command: &str) -> Self {
        self.with_field("action", command)
    }

    pub fn action(&self) -> Option<&str> {
        self.fields.get("action").and_then(Value::as_str)
    }
}
