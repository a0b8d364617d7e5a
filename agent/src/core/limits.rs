//! Step and cost ceilings checked before every model call.

use crate::error::Terminating;

/// Configured ceilings. A zero value disables the corresponding check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub step_limit: u32,
    pub cost_limit: f64,
}

impl Limits {
    pub fn new(step_limit: u32, cost_limit: f64) -> Self {
        Self {
            step_limit,
            cost_limit,
        }
    }

    /// Return `LimitsExceeded` if issuing another call would go past a configured ceiling.
    ///
    /// `n_calls` and `cost` are the model's running totals *before* the next call.
    pub fn check(&self, n_calls: u32, cost: f64) -> Result<(), Terminating> {
        if self.step_limit > 0 && n_calls >= self.step_limit {
            return Err(Terminating::LimitsExceeded(format!(
                "step limit reached: {n_calls} of {} model calls used",
                self.step_limit
            )));
        }
        if self.cost_limit > 0.0 && cost >= self.cost_limit {
            return Err(Terminating::LimitsExceeded(format!(
                "cost limit reached: ${cost:.4} of ${:.4} spent",
                self.cost_limit
            )));
        }
        Ok(())
    }
}
