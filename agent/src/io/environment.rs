//! Environment abstraction for executing actions.
//!
//! The [`Environment`] trait decouples the agent loop from where commands actually run.
//! [`LocalEnvironment`] runs each action in a fresh `bash -c` subshell on the host; tests use
//! scripted environments that return predetermined observations without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::types::Observation;
use crate::error::ExecError;
use crate::io::config::EnvironmentConfig;
use crate::io::process::run_command_with_timeout;

/// Abstraction over command execution backends.
pub trait Environment {
    /// Run `command` and report its output.
    ///
    /// A timeout must surface as [`ExecError::Timeout`] carrying any output captured before the
    /// command was stopped.
    fn execute(&mut self, command: &str) -> Result<Observation, ExecError>;

    /// Variables this environment contributes to template rendering.
    fn template_vars(&self) -> Map<String, Value>;
}

/// Runs every action with `bash -c` in a configured working directory.
///
/// Stderr is folded into stdout so the model sees one interleaved stream.
#[derive(Debug, Clone)]
pub struct LocalEnvironment {
    config: EnvironmentConfig,
    cwd: PathBuf,
}

impl LocalEnvironment {
    pub fn new(config: EnvironmentConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let cwd = match &config.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("resolve current directory")?,
        };
        Ok(Self { config, cwd })
    }

    fn command_for(&self, action: &str) -> Command {
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(format!("exec 2>&1\n{action}"))
            .current_dir(&self.cwd)
            .envs(&self.config.env);
        cmd
    }
}

impl Environment for LocalEnvironment {
    #[instrument(skip_all, fields(cwd = %self.cwd.display(), timeout_secs = self.config.timeout_secs))]
    fn execute(&mut self, command: &str) -> Result<Observation, ExecError> {
        debug!(command, "executing action");
        let output = run_command_with_timeout(
            self.command_for(command),
            None,
            Duration::from_secs(self.config.timeout_secs),
            self.config.output_limit_bytes,
        )
        .context("run action")?;

        if output.timed_out {
            warn!(command, "action timed out");
            let partial = output.combined();
            return Err(ExecError::Timeout {
                partial_output: (!partial.is_empty()).then_some(partial),
            });
        }

        let returncode = output.status.code().unwrap_or(-1);
        debug!(returncode, "action finished");
        Ok(Observation::new(output.combined_lossy()).with_field("returncode", returncode))
    }

    fn template_vars(&self) -> Map<String, Value> {
        let mut vars = Map::new();
        vars.insert(
            "cwd".to_string(),
            Value::from(self.cwd.display().to_string()),
        );
        vars.insert("os".to_string(), Value::from(std::env::consts::OS));
        vars.insert("arch".to_string(), Value::from(std::env::consts::ARCH));
        vars.insert(
            "timeout_secs".to_string(),
            Value::from(self.config.timeout_secs),
        );
        vars.insert(
            "env".to_string(),
            serde_json::to_value(&self.config.env).unwrap_or_default(),
        );
        vars
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn env_in(dir: &std::path::Path, timeout_secs: u64) -> LocalEnvironment {
        LocalEnvironment::new(EnvironmentConfig {
            cwd: Some(dir.to_path_buf()),
            timeout_secs,
            ..EnvironmentConfig::default()
        })
        .expect("environment")
    }

    #[test]
    fn runs_in_configured_directory_and_merges_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("marker.txt"), "x").expect("write");
        let mut env = env_in(temp.path(), 10);

        let obs = env.execute("ls; echo oops >&2; exit 4").expect("execute");
        assert!(obs.output.contains("marker.txt"));
        assert!(obs.output.contains("oops"));
        assert_eq!(obs.fields["returncode"], 4);
    }

    #[test]
    fn exports_configured_variables() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut config = EnvironmentConfig {
            cwd: Some(temp.path().to_path_buf()),
            ..EnvironmentConfig::default()
        };
        config
            .env
            .insert("AGENT_TEST_VALUE".to_string(), "42".to_string());
        let mut env = LocalEnvironment::new(config).expect("environment");

        let obs = env.execute("echo $AGENT_TEST_VALUE").expect("execute");
        assert_eq!(obs.output, "42\n");
    }

    #[test]
    fn timeout_reports_partial_output() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = env_in(temp.path(), 1);

        let err = env.execute("echo before; sleep 30").unwrap_err();
        match err {
            ExecError::Timeout { partial_output } => {
                assert_eq!(partial_output.as_deref(), Some(b"before\n".as_slice()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn template_vars_describe_the_environment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let env = env_in(temp.path(), 7);
        let vars = env.template_vars();
        assert_eq!(vars["cwd"], temp.path().display().to_string());
        assert_eq!(vars["timeout_secs"], 7);
        assert!(vars.contains_key("os"));
    }
}
