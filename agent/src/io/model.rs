//! Model abstraction and the command-backed model.
//!
//! The [`Model`] trait is the loop's only view of the language model: a query call plus
//! read-only running totals. Each implementation owns its counters; the loop consults them
//! before every call and never changes them.
//!
//! [`CommandModel`] delegates each query to an external program, the same way the loop
//! delegates actions to a shell. The program receives one JSON document on stdin:
//!
//! ```json
//! {"model": "<name>", "messages": [{"role": "system", "content": "...", "timestamp": 0.0}]}
//! ```
//!
//! and prints either a JSON object with at least `content` (an optional numeric `cost` is
//! charged to the run; every other field is kept as auxiliary data), or plain text, which is
//! taken as the content verbatim.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::messages::Message;
use crate::core::types::ModelResponse;
use crate::io::config::ModelConfig;
use crate::io::process::run_command_with_timeout;

/// Output of the model program is bounded to this many bytes.
const MODEL_OUTPUT_LIMIT_BYTES: usize = 10_000_000;

/// Abstraction over language model backends.
pub trait Model {
    /// Send the conversation and return the model's reply.
    fn query(&mut self, messages: &[Message]) -> Result<ModelResponse>;

    /// Number of completed queries.
    fn n_calls(&self) -> u32;

    /// Accumulated cost of completed queries.
    fn cost(&self) -> f64;

    /// Variables this model contributes to template rendering.
    fn template_vars(&self) -> Map<String, Value>;
}

/// Template variables every model exposes: name and running totals.
pub fn stats_vars(name: &str, n_calls: u32, cost: f64) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("model_name".to_string(), Value::from(name));
    vars.insert("n_model_calls".to_string(), Value::from(n_calls));
    vars.insert("model_cost".to_string(), Value::from(cost));
    vars
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
}

/// Model backed by an external program invoked once per query.
#[derive(Debug, Clone)]
pub struct CommandModel {
    config: ModelConfig,
    n_calls: u32,
    cost: f64,
}

impl CommandModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        if config.command.is_empty() || config.command[0].trim().is_empty() {
            return Err(anyhow!(
                "model.command must be a non-empty array (or pass --model-command)"
            ));
        }
        Ok(Self {
            config,
            n_calls: 0,
            cost: 0.0,
        })
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.command[0]);
        cmd.args(&self.config.command[1..]);
        cmd
    }
}

impl Model for CommandModel {
    #[instrument(skip_all, fields(model = %self.config.name, messages = messages.len()))]
    fn query(&mut self, messages: &[Message]) -> Result<ModelResponse> {
        let request = serde_json::to_vec(&QueryRequest {
            model: &self.config.name,
            messages,
        })
        .context("serialize model request")?;

        let output = run_command_with_timeout(
            self.command(),
            Some(&request),
            Duration::from_secs(self.config.timeout_secs),
            MODEL_OUTPUT_LIMIT_BYTES,
        )
        .context("run model command")?;

        if output.timed_out {
            warn!(timeout_secs = self.config.timeout_secs, "model command timed out");
            return Err(anyhow!(
                "model command timed out after {}s",
                self.config.timeout_secs
            ));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "model command failed with status {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut response = parse_response(&stdout)?;
        let call_cost = take_cost(&mut response).unwrap_or(self.config.cost_per_call);

        self.n_calls += 1;
        self.cost += call_cost;
        info!(
            n_calls = self.n_calls,
            call_cost,
            total_cost = self.cost,
            "model query finished"
        );
        Ok(response)
    }

    fn n_calls(&self) -> u32 {
        self.n_calls
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn template_vars(&self) -> Map<String, Value> {
        stats_vars(&self.config.name, self.n_calls, self.cost)
    }
}

/// Interpret the program's stdout as a JSON response object or, failing that, plain content.
fn parse_response(stdout: &str) -> Result<ModelResponse> {
    match serde_json::from_str::<Value>(stdout.trim()) {
        Ok(Value::Object(map)) => {
            if !matches!(map.get("content"), Some(Value::String(_))) {
                return Err(anyhow!("model response is missing a string `content` field"));
            }
            serde_json::from_value(Value::Object(map)).context("parse model response")
        }
        _ => {
            debug!("model output is not a JSON object, using it as plain content");
            Ok(ModelResponse::new(stdout))
        }
    }
}

/// Remove a numeric `cost` field from the response extras, if present and valid.
fn take_cost(response: &mut ModelResponse) -> Option<f64> {
    let cost = response.extra.get("cost")?.as_f64()?;
    if !cost.is_finite() || cost < 0.0 {
        warn!(cost, "ignoring invalid cost reported by model");
        return None;
    }
    response.extra.remove("cost");
    Some(cost)
}
