//! Trajectory artifact written after a run.
//!
//! The trajectory is product output: the full message log plus a summary of how the run ended.
//! It is always pretty-printed JSON with a trailing newline so files diff cleanly.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::messages::Message;
use crate::io::config::Config;

/// Totals reported by the model at the end of the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelStats {
    pub api_calls: u32,
    pub instance_cost: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryInfo {
    /// Termination kind (`Submitted`, `LimitsExceeded`), or `Error` when the run aborted.
    pub exit_status: String,
    /// Final message: the submission, the limit notice, or the fatal error text.
    pub submission: String,
    pub model_stats: ModelStats,
    pub config: Config,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trajectory {
    pub info: TrajectoryInfo,
    pub messages: Vec<Message>,
}

/// Atomically write the trajectory to `path` (temp file + rename).
pub fn save_trajectory(path: &Path, trajectory: &Trajectory) -> Result<()> {
    debug!(path = %path.display(), messages = trajectory.messages.len(), "writing trajectory");
    let mut buf = serde_json::to_string_pretty(trajectory).context("serialize trajectory")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp trajectory {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace trajectory {}", path.display()))?;
    Ok(())
}

/// Load a trajectory written by [`save_trajectory`].
pub fn load_trajectory(path: &Path) -> Result<Trajectory> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read trajectory {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse trajectory {}", path.display()))
}
