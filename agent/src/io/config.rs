//! Agent configuration stored as TOML (`agent.toml` by default).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::action::{ActionExtractor, DEFAULT_ACTION_PATTERN};
use crate::core::submission::SourceMatcher;

/// Built-in configuration used when no file exists and written by `agent init`.
pub const DEFAULT_CONFIG: &str = include_str!("../../config/default.toml");

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub agent: AgentConfig,
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Control-loop settings. Immutable for the duration of a run.
///
/// Every field is also exposed to templates under its own name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub system_template: String,
    pub instance_template: String,
    pub timeout_template: String,
    pub format_error_template: String,
    pub action_observation_template: String,

    /// Pattern locating the action in a model response.
    #[serde(default = "default_action_regex")]
    pub action_regex: String,

    /// Maximum model calls per run; 0 disables the check.
    #[serde(default)]
    pub step_limit: u32,

    /// Maximum accumulated model cost per run; 0 disables the check.
    #[serde(default = "default_cost_limit")]
    pub cost_limit: f64,

    /// Number of post-prompt messages sent to the model; 0 sends the whole log.
    #[serde(default)]
    pub max_history_messages: usize,

    /// Require submissions to be diffs touching at least one source file.
    #[serde(default)]
    pub validate_source_changes: bool,

    #[serde(default = "default_source_path_patterns")]
    pub source_path_patterns: Vec<String>,
}

fn default_action_regex() -> String {
    DEFAULT_ACTION_PATTERN.to_string()
}

fn default_cost_limit() -> f64 {
    3.0
}

fn default_source_path_patterns() -> Vec<String> {
    vec!["src/**/*.py".to_string(), "*.py".to_string()]
}

/// Settings for the local shell environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Working directory for every command. Defaults to the process working directory.
    pub cwd: Option<PathBuf>,
    /// Per-command timeout in seconds.
    pub timeout_secs: u64,
    /// Output captured per command beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
    /// Extra environment variables exported to every command.
    pub env: BTreeMap<String, String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            cwd: None,
            timeout_secs: 60,
            output_limit_bytes: 100_000,
            env: BTreeMap::new(),
        }
    }
}

/// Settings for the command-backed model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Name exposed to templates as `model_name`.
    pub name: String,
    /// Command invoked once per query (e.g. `["python", "llm_bridge.py"]`).
    pub command: Vec<String>,
    /// Per-query timeout in seconds.
    pub timeout_secs: u64,
    /// Cost charged per call when the backend reports none.
    pub cost_per_call: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: "command".to_string(),
            command: Vec::new(),
            timeout_secs: 600,
            cost_per_call: 0.0,
        }
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, template) in [
            ("system_template", &self.system_template),
            ("instance_template", &self.instance_template),
            ("timeout_template", &self.timeout_template),
            ("format_error_template", &self.format_error_template),
            (
                "action_observation_template",
                &self.action_observation_template,
            ),
        ] {
            if template.trim().is_empty() {
                return Err(anyhow!("agent.{name} must not be empty"));
            }
        }
        ActionExtractor::new(&self.action_regex)
            .with_context(|| format!("agent.action_regex is invalid: {}", self.action_regex))?;
        if !self.cost_limit.is_finite() || self.cost_limit < 0.0 {
            return Err(anyhow!("agent.cost_limit must be a finite value >= 0"));
        }
        SourceMatcher::new(&self.source_path_patterns)
            .context("agent.source_path_patterns contains an invalid glob")?;
        Ok(())
    }
}

impl EnvironmentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("environment.timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("environment.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(anyhow!("model.timeout_secs must be > 0"));
        }
        if !self.cost_per_call.is_finite() || self.cost_per_call < 0.0 {
            return Err(anyhow!("model.cost_per_call must be a finite value >= 0"));
        }
        Ok(())
    }
}

impl Config {
    /// Parse the built-in configuration.
    pub fn builtin() -> Result<Self> {
        parse_config(DEFAULT_CONFIG).context("parse built-in config")
    }

    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.environment.validate()?;
        self.model.validate()?;
        Ok(())
    }
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(contents)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns the built-in configuration.
pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using built-in defaults");
        return Config::builtin();
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &Config) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write the built-in configuration (comments included) to `path`.
///
/// Existing files are left untouched unless `force` is set. Returns whether a file was written.
pub fn init_config(path: &Path, force: bool) -> Result<bool> {
    if !force && path.exists() {
        return Ok(false);
    }
    write_atomic(path, DEFAULT_CONFIG)?;
    Ok(true)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_is_valid() {
        let cfg = Config::builtin().expect("builtin");
        assert_eq!(cfg.agent.cost_limit, 3.0);
        assert_eq!(cfg.agent.step_limit, 0);
        assert_eq!(cfg.agent.action_regex, DEFAULT_ACTION_PATTERN);
        assert_eq!(cfg.environment.timeout_secs, 60);
        assert_eq!(cfg.environment.env.get("PAGER").map(String::as_str), Some("cat"));
    }

    #[test]
    fn load_missing_returns_builtin() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, Config::builtin().expect("builtin"));
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent.toml");
        let mut cfg = Config::builtin().expect("builtin");
        cfg.agent.step_limit = 12;
        cfg.model.command = vec!["bridge".to_string()];
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn optional_fields_take_defaults() {
        let cfg = parse_config(
            r#"
[agent]
system_template = "s"
instance_template = "{{ task }}"
timeout_template = "t"
format_error_template = "f"
action_observation_template = "o"
"#,
        )
        .expect("parse");
        assert_eq!(cfg.agent.cost_limit, 3.0);
        assert_eq!(cfg.agent.max_history_messages, 0);
        assert!(!cfg.agent.validate_source_changes);
        assert_eq!(cfg.agent.source_path_patterns, vec!["src/**/*.py", "*.py"]);
        assert_eq!(cfg.model, ModelConfig::default());
    }

    #[test]
    fn missing_template_is_rejected() {
        let err = parse_config(
            r#"
[agent]
system_template = "s"
instance_template = "i"
"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("timeout_template"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut cfg = Config::builtin().expect("builtin");
        cfg.agent.action_regex = "(".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::builtin().expect("builtin");
        cfg.agent.cost_limit = -1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = Config::builtin().expect("builtin");
        cfg.agent.source_path_patterns = vec!["src/[".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = Config::builtin().expect("builtin");
        cfg.agent.format_error_template = "  ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = Config::builtin().expect("builtin");
        cfg.environment.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn init_does_not_overwrite_without_force() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent.toml");
        fs::write(&path, "custom").expect("write");

        assert!(!init_config(&path, false).expect("init"));
        assert_eq!(fs::read_to_string(&path).expect("read"), "custom");

        assert!(init_config(&path, true).expect("init force"));
        assert_eq!(fs::read_to_string(&path).expect("read"), DEFAULT_CONFIG);
    }
}
