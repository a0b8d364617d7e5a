//! The turn-based control loop.
//!
//! A run renders the system and instance prompts, then repeats turns until a terminating
//! condition surfaces. A turn is `query` (limit check, model call) followed by `observe`
//! (action extraction, execution, completion detection). Each turn either succeeds or yields a
//! [`StepError`], and [`Agent::run`] dispatches on its tier:
//!
//! ```text
//! NotStarted -> AwaitingModel <-> AwaitingExecution
//!                     |                  |
//!                     +---> Terminated <-+
//! ```

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::core::action::{ActionExtractor, Extraction};
use crate::core::limits::Limits;
use crate::core::messages::{Message, MessageLog, Role};
use crate::core::submission::{SourceMatcher, check_completion};
use crate::core::template::{TemplateVars, render_template};
use crate::core::types::{Action, ModelResponse, Observation};
use crate::error::{ExecError, NonTerminating, StepError, TemplateError};
use crate::io::config::AgentConfig;
use crate::io::environment::Environment;
use crate::io::model::Model;

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    AwaitingModel,
    AwaitingExecution,
    Terminated,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// Kind name of the terminating condition (`Submitted` or `LimitsExceeded`).
    pub exit_status: String,
    pub message: String,
}

/// Control loop over a model and an environment.
///
/// The agent owns its message log; the model owns its call and cost counters. Independent runs
/// need independent agents.
pub struct Agent<M: Model, E: Environment> {
    config: AgentConfig,
    extractor: ActionExtractor,
    source_matcher: Option<SourceMatcher>,
    limits: Limits,
    model: M,
    env: E,
    log: MessageLog,
    extra_vars: Map<String, Value>,
    phase: Phase,
}

impl<M: Model, E: Environment> Agent<M, E> {
    /// Validate `config` and build an agent.
    pub fn new(config: AgentConfig, model: M, env: E) -> anyhow::Result<Self> {
        config.validate()?;
        let extractor = ActionExtractor::new(&config.action_regex)?;
        let source_matcher = if config.validate_source_changes {
            Some(SourceMatcher::new(&config.source_path_patterns)?)
        } else {
            None
        };
        let limits = Limits::new(config.step_limit, config.cost_limit);
        Ok(Self {
            config,
            extractor,
            source_matcher,
            limits,
            model,
            env,
            log: MessageLog::new(),
            extra_vars: Map::new(),
            phase: Phase::NotStarted,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn messages(&self) -> &[Message] {
        self.log.messages()
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    /// Run-level template variables (task and caller extras).
    pub fn extra_vars(&self) -> &Map<String, Value> {
        &self.extra_vars
    }

    /// Render `template` with every variable source plus `call_vars`.
    ///
    /// Precedence, lowest first: configuration, environment, model, run extras, call vars.
    pub fn render(
        &self,
        template: &str,
        call_vars: Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let vars = TemplateVars::new()
            .with_serialized("config", &self.config)
            .with("environment", self.env.template_vars())
            .with("model", self.model.template_vars())
            .with("run", self.extra_vars.clone())
            .with("call", call_vars);
        render_template(template, &vars)
    }

    /// Run the loop on `task` until it terminates.
    ///
    /// Returns the terminating condition's kind name and message. Errors outside the
    /// non-terminating/terminating taxonomy end the run and are returned as-is.
    #[instrument(skip_all)]
    pub fn run(&mut self, task: &str, extras: Map<String, Value>) -> anyhow::Result<RunOutcome> {
        self.extra_vars.insert("task".to_string(), Value::from(task));
        self.extra_vars.extend(extras);
        self.log = MessageLog::new();

        let outcome = self.drive();
        self.phase = Phase::Terminated;
        outcome
    }

    fn drive(&mut self) -> anyhow::Result<RunOutcome> {
        let system = self.render(&self.config.system_template, Map::new())?;
        self.log.append(Role::System, system, Map::new());
        let instance = self.render(&self.config.instance_template, Map::new())?;
        self.log.append(Role::User, instance, Map::new());
        self.phase = Phase::AwaitingModel;
        info!("run started");

        loop {
            match self.step() {
                Ok(_) => {}
                Err(StepError::NonTerminating(err)) => {
                    warn!(kind = err.kind(), "recoverable turn error");
                    self.log.append(Role::User, err.message(), Map::new());
                    self.phase = Phase::AwaitingModel;
                }
                Err(StepError::Terminating(err)) => {
                    info!(
                        exit_status = err.kind(),
                        n_calls = self.model.n_calls(),
                        cost = self.model.cost(),
                        "run terminated"
                    );
                    self.log.append(Role::User, err.message(), Map::new());
                    return Ok(RunOutcome {
                        exit_status: err.kind().to_string(),
                        message: err.message().to_string(),
                    });
                }
                Err(StepError::Fatal(err)) => return Err(err),
            }
        }
    }

    /// One turn: query the model, then execute and observe its action.
    pub fn step(&mut self) -> Result<Observation, StepError> {
        let response = self.query()?;
        self.observe(&response)
    }

    /// Check limits, send the log view to the model and record its reply.
    pub fn query(&mut self) -> Result<ModelResponse, StepError> {
        self.phase = Phase::AwaitingModel;
        self.limits.check(self.model.n_calls(), self.model.cost())?;

        let view = self.log.view_for_model(self.config.max_history_messages);
        debug!(view_len = view.len(), log_len = self.log.len(), "querying model");
        let response = self.model.query(&view)?;
        self.log
            .append(Role::Assistant, response.content.clone(), response.extra.clone());
        self.phase = Phase::AwaitingExecution;
        Ok(response)
    }

    /// Extract and execute the action in `response`, then record the observation.
    pub fn observe(&mut self, response: &ModelResponse) -> Result<Observation, StepError> {
        let action = self.parse_action(response)?;
        let observation = self.execute_action(&action)?;

        let output = serde_json::to_value(&observation).map_err(anyhow::Error::from)?;
        let mut call_vars = Map::new();
        call_vars.insert("output".to_string(), output);
        let rendered = self.render(&self.config.action_observation_template, call_vars)?;
        self.log.append(Role::User, rendered, Map::new());
        self.phase = Phase::AwaitingModel;
        Ok(observation)
    }

    /// Pull exactly one action out of `response`.
    pub fn parse_action(&self, response: &ModelResponse) -> Result<Action, StepError> {
        match self.extractor.extract(&response.content) {
            Extraction::Single(command) => Ok(Action {
                command,
                response: response.clone(),
            }),
            Extraction::Invalid(found) => {
                debug!(found = found.len(), "response does not hold exactly one action");
                let mut call_vars = Map::new();
                call_vars.insert("actions".to_string(), Value::from(found));
                let message = self.render(&self.config.format_error_template, call_vars)?;
                Err(NonTerminating::FormatError(message).into())
            }
        }
    }

    /// Execute `action` and check its output for a submission.
    pub fn execute_action(&mut self, action: &Action) -> Result<Observation, StepError> {
        let observation = match self.env.execute(&action.command) {
            Ok(observation) => observation,
            Err(ExecError::Timeout { partial_output }) => {
                let output = partial_output
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default();
                let mut call_vars = Map::new();
                call_vars.insert("action".to_string(), Value::from(action.command.as_str()));
                call_vars.insert("output".to_string(), Value::from(output));
                let message = self.render(&self.config.timeout_template, call_vars)?;
                return Err(NonTerminating::ExecutionTimeout(message).into());
            }
            Err(ExecError::Other(err)) => return Err(StepError::Fatal(err)),
        };

        check_completion(&observation.output, self.source_matcher.as_ref())?;
        Ok(observation.with_action(&action.command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::Config;
    use crate::test_support::{ScriptedEnvironment, ScriptedModel, bash_block};

    fn config() -> AgentConfig {
        AgentConfig {
            system_template: "system: {{ model_name }}".to_string(),
            instance_template: "task: {{ task }}".to_string(),
            timeout_template: "timeout: {{ action }} => {{ output }}".to_string(),
            format_error_template: "format error: found {{ actions | length }}".to_string(),
            action_observation_template: "obs: {{ output.output }}".to_string(),
            ..Config::builtin().expect("builtin").agent
        }
    }

    fn agent(
        config: AgentConfig,
        model: ScriptedModel,
        env: ScriptedEnvironment,
    ) -> Agent<ScriptedModel, ScriptedEnvironment> {
        Agent::new(config, model, env).expect("agent")
    }

    #[test]
    fn run_starts_with_system_then_instance_prompt() {
        let model = ScriptedModel::new(vec![bash_block("echo MINI_SWE_AGENT_FINAL_OUTPUT")]);
        let env = ScriptedEnvironment::new().output("MINI_SWE_AGENT_FINAL_OUTPUT\ndone\n");
        let mut agent = agent(config(), model, env);
        assert_eq!(agent.phase(), Phase::NotStarted);

        let outcome = agent.run("fix it", Map::new()).expect("run");

        assert_eq!(outcome.exit_status, "Submitted");
        assert_eq!(outcome.message, "done\n");
        assert_eq!(agent.phase(), Phase::Terminated);
        let messages = agent.messages();
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "system: scripted");
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "task: fix it");
        assert_eq!(messages[2].role, Role::Assistant);
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("done\n"));
    }

    #[test]
    fn format_error_is_fed_back_and_run_continues() {
        let model = ScriptedModel::new(vec![
            "no action here".to_string(),
            format!("{}\n{}", bash_block("ls"), bash_block("pwd")),
            bash_block("echo MINI_SWE_AGENT_FINAL_OUTPUT"),
        ]);
        let env = ScriptedEnvironment::new().output("MINI_SWE_AGENT_FINAL_OUTPUT\n");
        let mut agent = agent(config(), model, env);

        let outcome = agent.run("t", Map::new()).expect("run");

        assert_eq!(outcome.exit_status, "Submitted");
        let feedback: Vec<&str> = agent
            .messages()
            .iter()
            .filter(|m| m.content.starts_with("format error"))
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(feedback, vec!["format error: found 0", "format error: found 2"]);
        // Neither malformed turn reached the environment.
        assert_eq!(agent.env().executed(), ["echo MINI_SWE_AGENT_FINAL_OUTPUT"]);
    }

    #[test]
    fn observation_is_rendered_as_user_message() {
        let model = ScriptedModel::new(vec![
            bash_block("ls"),
            bash_block("echo MINI_SWE_AGENT_FINAL_OUTPUT"),
        ]);
        let env = ScriptedEnvironment::new()
            .output("file.txt\n")
            .output("MINI_SWE_AGENT_FINAL_OUTPUT\n");
        let mut agent = agent(config(), model, env);

        agent.run("t", Map::new()).expect("run");

        let observation = &agent.messages()[3];
        assert_eq!(observation.role, Role::User);
        assert_eq!(observation.content, "obs: file.txt\n");
    }

    #[test]
    fn step_limit_stops_before_the_next_call() {
        let model = ScriptedModel::new(vec![bash_block("ls"); 10]);
        let env = ScriptedEnvironment::new().repeat_output("ok\n");
        let mut cfg = config();
        cfg.step_limit = 5;
        let mut agent = agent(cfg, model, env);

        let outcome = agent.run("t", Map::new()).expect("run");

        assert_eq!(outcome.exit_status, "LimitsExceeded");
        assert_eq!(agent.model().n_calls(), 5);
        assert_eq!(agent.env().executed().len(), 5);
    }

    #[test]
    fn cost_limit_stops_once_reached() {
        let model = ScriptedModel::new(vec![bash_block("ls"); 10]).with_cost_per_call(1.0);
        let env = ScriptedEnvironment::new().repeat_output("ok\n");
        let mut cfg = config();
        cfg.cost_limit = 3.0;
        let mut agent = agent(cfg, model, env);

        let outcome = agent.run("t", Map::new()).expect("run");

        assert_eq!(outcome.exit_status, "LimitsExceeded");
        assert_eq!(agent.model().n_calls(), 3);
        assert_eq!(agent.model().cost(), 3.0);
    }

    #[test]
    fn query_raises_limits_without_calling_model() {
        let model = ScriptedModel::new(vec![bash_block("ls")]);
        let mut cfg = config();
        cfg.step_limit = 1;
        let mut agent = agent(cfg, model, ScriptedEnvironment::new().repeat_output(""));
        agent.query().expect("first query");

        let err = agent.query().unwrap_err();
        assert!(matches!(err, StepError::Terminating(ref t) if t.kind() == "LimitsExceeded"));
        assert_eq!(agent.model().n_calls(), 1);
    }

    #[test]
    fn history_truncation_bounds_model_view() {
        let model = ScriptedModel::new(vec![bash_block("ls"); 4]);
        let env = ScriptedEnvironment::new().repeat_output("x\n");
        let mut cfg = config();
        cfg.max_history_messages = 2;
        cfg.step_limit = 4;
        let mut agent = agent(cfg, model, env);

        agent.run("t", Map::new()).expect("run");

        // 2 framing messages, then at most 2 of the rest.
        assert_eq!(agent.model().view_lengths(), [2, 4, 4, 4]);
        let last_view = agent.model().last_view().expect("view");
        assert_eq!(last_view[0].role, Role::System);
        assert_eq!(last_view[1].role, Role::User);
    }

    #[test]
    fn timeout_is_recoverable() {
        let model = ScriptedModel::new(vec![
            bash_block("sleep 100"),
            bash_block("echo MINI_SWE_AGENT_FINAL_OUTPUT"),
        ]);
        let env = ScriptedEnvironment::new()
            .timeout(Some(b"partial".to_vec()))
            .output("MINI_SWE_AGENT_FINAL_OUTPUT\nok");
        let mut agent = agent(config(), model, env);

        let outcome = agent.run("t", Map::new()).expect("run");

        assert_eq!(outcome.exit_status, "Submitted");
        assert!(
            agent
                .messages()
                .iter()
                .any(|m| m.content == "timeout: sleep 100 => partial")
        );
    }

    #[test]
    fn timeout_without_output_renders_empty() {
        let model = ScriptedModel::new(vec![bash_block("sleep 100")]);
        let env = ScriptedEnvironment::new().timeout(None);
        let mut agent = agent(config(), model, env);
        agent.run_prompts_for_test("t");

        let err = agent.step().unwrap_err();
        match err {
            StepError::NonTerminating(NonTerminating::ExecutionTimeout(msg)) => {
                assert_eq!(msg, "timeout: sleep 100 => ");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn environment_failure_is_fatal() {
        let model = ScriptedModel::new(vec![bash_block("ls"), bash_block("ls")]);
        let env = ScriptedEnvironment::new().fail("sandbox is gone");
        let mut agent = agent(config(), model, env);

        let err = agent.run("t", Map::new()).unwrap_err();
        assert!(err.to_string().contains("sandbox is gone"));
        assert_eq!(agent.model().n_calls(), 1);
        assert_eq!(agent.phase(), Phase::Terminated);
    }

    #[test]
    fn missing_template_variable_is_fatal() {
        let mut cfg = config();
        cfg.instance_template = "{{ task }} {{ not_provided }}".to_string();
        let mut agent = agent(cfg, ScriptedModel::new(Vec::new()), ScriptedEnvironment::new());

        let err = agent.run("t", Map::new()).unwrap_err();
        assert!(err.to_string().contains("not_provided"));
        assert_eq!(agent.model().n_calls(), 0);
    }

    #[test]
    fn caller_extras_reach_templates_and_persist() {
        let mut cfg = config();
        cfg.instance_template = "{{ task }} in {{ repo }}".to_string();
        let model = ScriptedModel::new(vec![bash_block("true")]);
        let env = ScriptedEnvironment::new().output("MINI_SWE_AGENT_FINAL_OUTPUT\n");
        let mut agent = agent(cfg, model, env);

        let mut extras = Map::new();
        extras.insert("repo".to_string(), Value::from("acme/widgets"));
        agent.run("fix", extras).expect("run");

        assert_eq!(agent.messages()[1].content, "fix in acme/widgets");
        assert_eq!(agent.extra_vars()["repo"], "acme/widgets");
    }

    #[test]
    fn assistant_message_keeps_auxiliary_fields() {
        let mut extra = Map::new();
        extra.insert("usage".to_string(), Value::from(42));
        let model = ScriptedModel::from_responses(vec![ModelResponse {
            content: bash_block("true"),
            extra,
        }]);
        let env = ScriptedEnvironment::new().output("MINI_SWE_AGENT_FINAL_OUTPUT\n");
        let mut agent = agent(config(), model, env);

        agent.run("t", Map::new()).expect("run");
        assert_eq!(agent.messages()[2].extra["usage"], 42);
    }

    #[test]
    fn rejected_submission_forces_another_turn() {
        let mut cfg = config();
        cfg.validate_source_changes = true;
        let model = ScriptedModel::new(vec![bash_block("submit"), bash_block("submit")]);
        let env = ScriptedEnvironment::new()
            .output("MINI_SWE_AGENT_FINAL_OUTPUT\ndiff --git a/README.md b/README.md\n")
            .output("MINI_SWE_AGENT_FINAL_OUTPUT\ndiff --git a/src/pkg/mod.py b/src/pkg/mod.py\n");
        let mut agent = agent(cfg, model, env);

        let outcome = agent.run("t", Map::new()).expect("run");

        assert_eq!(outcome.exit_status, "Submitted");
        assert!(outcome.message.contains("src/pkg/mod.py"));
        assert_eq!(agent.model().n_calls(), 2);
        let rejection = agent
            .messages()
            .iter()
            .find(|m| m.content.starts_with("Submission rejected"))
            .expect("rejection message");
        assert!(rejection.content.contains("matching patterns: src/**/*.py, *.py"));
    }

    #[test]
    fn observation_carries_action() {
        let model = ScriptedModel::new(vec![bash_block("  echo hi  ")]);
        let env = ScriptedEnvironment::new().output("hi\n");
        let mut agent = agent(config(), model, env);
        agent.run_prompts_for_test("t");

        let observation = agent.step().expect("step");
        assert_eq!(observation.action(), Some("echo hi"));
        assert_eq!(agent.phase(), Phase::AwaitingModel);
    }

    impl<M: Model, E: Environment> Agent<M, E> {
        /// Seed the log the way `run` does, without entering the loop.
        fn run_prompts_for_test(&mut self, task: &str) {
            self.extra_vars.insert("task".to_string(), Value::from(task));
            let system = self.render(&self.config.system_template, Map::new()).expect("system");
            self.log.append(Role::System, system, Map::new());
            let instance = self
                .render(&self.config.instance_template, Map::new())
                .expect("instance");
            self.log.append(Role::User, instance, Map::new());
            self.phase = Phase::AwaitingModel;
        }
    }
}
