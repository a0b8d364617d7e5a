//! Test-only scripted model and environment.
//!
//! Both replay queued results in order and record what the loop handed them, so tests can
//! drive full runs without spawning processes.

use std::collections::VecDeque;

use anyhow::{Result, anyhow};
use serde_json::{Map, Value};

use crate::core::messages::Message;
use crate::core::types::{ModelResponse, Observation};
use crate::error::ExecError;
use crate::io::config::{AgentConfig, Config};
use crate::io::environment::Environment;
use crate::io::model::{Model, stats_vars};

/// Wrap `command` in a fenced bash block the default action pattern recognizes.
pub fn bash_block(command: &str) -> String {
    format!("THOUGHT: next step\n\n```bash\n{command}\n```")
}

/// Agent config with short, deterministic templates.
pub fn test_agent_config() -> AgentConfig {
    let builtin = Config::builtin().expect("built-in config parses");
    AgentConfig {
        system_template: "system ({{ model_name }})".to_string(),
        instance_template: "task: {{ task }}".to_string(),
        timeout_template: "timed out: {{ action }}\n{{ output }}".to_string(),
        format_error_template: "expected one action, found {{ actions | length }}".to_string(),
        action_observation_template: "rc={{ output.returncode }}\n{{ output.output }}"
            .to_string(),
        ..builtin.agent
    }
}

/// Model that replays queued responses and charges a fixed cost per call.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: VecDeque<ModelResponse>,
    cost_per_call: f64,
    n_calls: u32,
    cost: f64,
    views: Vec<Vec<Message>>,
}

impl ScriptedModel {
    pub fn new(contents: Vec<String>) -> Self {
        Self::from_responses(contents.into_iter().map(ModelResponse::new).collect())
    }

    pub fn from_responses(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: responses.into(),
            ..Self::default()
        }
    }

    pub fn with_cost_per_call(mut self, cost: f64) -> Self {
        self.cost_per_call = cost;
        self
    }

    /// Length of every view the model received, in call order.
    pub fn view_lengths(&self) -> Vec<usize> {
        self.views.iter().map(Vec::len).collect()
    }

    pub fn last_view(&self) -> Option<&[Message]> {
        self.views.last().map(Vec::as_slice)
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl Model for ScriptedModel {
    fn query(&mut self, messages: &[Message]) -> Result<ModelResponse> {
        self.views.push(messages.to_vec());
        let response = self
            .responses
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no responses left"))?;
        self.n_calls += 1;
        self.cost += self.cost_per_call;
        Ok(response)
    }

    fn n_calls(&self) -> u32 {
        self.n_calls
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn template_vars(&self) -> Map<String, Value> {
        stats_vars("scripted", self.n_calls, self.cost)
    }
}

/// One queued environment result.
#[derive(Debug, Clone)]
pub enum ScriptedExec {
    Output(Observation),
    Timeout(Option<Vec<u8>>),
    Fail(String),
}

/// Environment that replays queued results.
///
/// Once the queue is empty, `fallback` (if set) is returned for every further command.
#[derive(Debug, Default)]
pub struct ScriptedEnvironment {
    queue: VecDeque<ScriptedExec>,
    fallback: Option<Observation>,
    executed: Vec<String>,
}

impl ScriptedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful command with `output` and return code 0.
    pub fn output(mut self, output: &str) -> Self {
        self.queue.push_back(ScriptedExec::Output(observation(output)));
        self
    }

    pub fn timeout(mut self, partial_output: Option<Vec<u8>>) -> Self {
        self.queue.push_back(ScriptedExec::Timeout(partial_output));
        self
    }

    pub fn fail(mut self, message: &str) -> Self {
        self.queue.push_back(ScriptedExec::Fail(message.to_string()));
        self
    }

    pub fn push(mut self, exec: ScriptedExec) -> Self {
        self.queue.push_back(exec);
        self
    }

    /// Answer every command past the queue with `output`.
    pub fn repeat_output(mut self, output: &str) -> Self {
        self.fallback = Some(observation(output));
        self
    }

    /// Commands executed so far, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }
}

fn observation(output: &str) -> Observation {
    Observation::new(output).with_field("returncode", 0)
}

impl Environment for ScriptedEnvironment {
    fn execute(&mut self, command: &str) -> Result<Observation, ExecError> {
        self.executed.push(command.to_string());
        let next = match self.queue.pop_front() {
            Some(exec) => exec,
            None => match &self.fallback {
                Some(obs) => ScriptedExec::Output(obs.clone()),
                None => {
                    return Err(ExecError::Other(anyhow!(
                        "scripted environment has no results left"
                    )));
                }
            },
        };
        match next {
            ScriptedExec::Output(obs) => Ok(obs),
            ScriptedExec::Timeout(partial_output) => Err(ExecError::Timeout { partial_output }),
            ScriptedExec::Fail(message) => Err(ExecError::Other(anyhow!(message))),
        }
    }

    fn template_vars(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert("cwd".to_string(), Value::from("/scripted"));
        vars.insert("os".to_string(), Value::from("scripted"));
        vars
    }
}
