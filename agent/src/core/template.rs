//! Strict template rendering over layered variable sources.
//!
//! Variables come from an ordered list of named sources; later sources shadow earlier ones.
//! Before rendering, every name the template reads is checked against the merged set, so a
//! template that drifts away from its configuration fails with the full list of unresolved
//! names instead of producing a half-rendered prompt.

use std::collections::BTreeSet;

use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::TemplateError;

/// Names provided by the template engine itself; never looked up in the variable sources.
const ENGINE_GLOBALS: [&str; 5] = ["range", "dict", "namespace", "debug", "loop"];

const TEMPLATE_NAME: &str = "inline";

/// Ordered, named variable sources in increasing precedence.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    sources: Vec<(&'static str, Map<String, Value>)>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source that shadows every source added before it.
    pub fn with(mut self, name: &'static str, vars: Map<String, Value>) -> Self {
        self.sources.push((name, vars));
        self
    }

    /// Add a source built from any serializable value that serializes to a map.
    ///
    /// Values that do not serialize to a JSON object contribute nothing.
    pub fn with_serialized<T: Serialize>(self, name: &'static str, value: &T) -> Self {
        let vars = match serde_json::to_value(value) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        self.with(name, vars)
    }

    /// Flatten all sources into a single lookup map.
    pub fn merged(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for (_, vars) in &self.sources {
            for (key, value) in vars {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

/// Render `template` against `vars`.
///
/// Fails with [`TemplateError::MissingVariable`] listing every referenced name that no source
/// provides, and with [`TemplateError::Render`] for syntax errors or strict-undefined attribute
/// access during rendering.
pub fn render_template(template: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.add_template(TEMPLATE_NAME, template)?;
    let compiled = env.get_template(TEMPLATE_NAME)?;

    let merged = vars.merged();
    let missing: BTreeSet<String> = compiled
        .undeclared_variables(false)
        .into_iter()
        .filter(|name| !ENGINE_GLOBALS.contains(&name.as_str()))
        .filter(|name| !merged.contains_key(name))
        .collect();
    if !missing.is_empty() {
        return Err(TemplateError::MissingVariable {
            names: missing.into_iter().collect(),
        });
    }

    Ok(compiled.render(Value::Object(merged))?)
}
