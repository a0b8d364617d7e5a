//! Error taxonomy for the agent loop.
//!
//! Every turn either completes or yields a [`StepError`]. The loop dispatches on its tier:
//!
//! - [`StepError::NonTerminating`]: the message is fed back to the model and the run continues.
//! - [`StepError::Terminating`]: the message is recorded and the run ends with the condition's
//!   kind name.
//! - [`StepError::Fatal`]: anything else; returned to the caller unmodified.

use thiserror::Error;

/// Recoverable protocol or execution hiccup. The message is shown to the model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NonTerminating {
    /// The model's output was not in the expected format (or a submission was rejected).
    #[error("{0}")]
    FormatError(String),
    /// The action did not finish within the sandbox timeout.
    #[error("{0}")]
    ExecutionTimeout(String),
}

impl NonTerminating {
    pub fn kind(&self) -> &'static str {
        match self {
            NonTerminating::FormatError(_) => "FormatError",
            NonTerminating::ExecutionTimeout(_) => "ExecutionTimeoutError",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            NonTerminating::FormatError(msg) | NonTerminating::ExecutionTimeout(msg) => msg,
        }
    }
}

/// Condition that ends the run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Terminating {
    /// The model submitted its final output; the payload is the submission.
    #[error("{0}")]
    Submitted(String),
    /// The step or cost ceiling was reached before a model call.
    #[error("{0}")]
    LimitsExceeded(String),
}

impl Terminating {
    pub fn kind(&self) -> &'static str {
        match self {
            Terminating::Submitted(_) => "Submitted",
            Terminating::LimitsExceeded(_) => "LimitsExceeded",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Terminating::Submitted(msg) | Terminating::LimitsExceeded(msg) => msg,
        }
    }
}

/// Outcome of a failed turn, tagged by how the loop must react.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    NonTerminating(#[from] NonTerminating),
    #[error(transparent)]
    Terminating(#[from] Terminating),
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

impl From<TemplateError> for StepError {
    fn from(err: TemplateError) -> Self {
        StepError::Fatal(err.into())
    }
}

/// Template rendering failure.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template reads names that no variable source provides.
    #[error("missing template variable(s): {}", .names.join(", "))]
    MissingVariable { names: Vec<String> },
    /// Syntax error or strict-undefined failure inside the template engine.
    #[error("render template: {0}")]
    Render(#[from] minijinja::Error),
}

/// Failure reported by an environment when executing an action.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The command exceeded its timeout. Carries whatever output was captured before the kill.
    #[error("command timed out")]
    Timeout { partial_output: Option<Vec<u8>> },
    /// Any other failure; fatal to the run.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_use_stable_names() {
        assert_eq!(NonTerminating::FormatError(String::new()).kind(), "FormatError");
        assert_eq!(
            NonTerminating::ExecutionTimeout(String::new()).kind(),
            "ExecutionTimeoutError"
        );
        assert_eq!(Terminating::Submitted(String::new()).kind(), "Submitted");
        assert_eq!(Terminating::LimitsExceeded(String::new()).kind(), "LimitsExceeded");
    }

    #[test]
    fn display_is_the_bare_message() {
        let err = StepError::from(NonTerminating::FormatError("bad format".to_string()));
        assert_eq!(err.to_string(), "bad format");
        let err = StepError::from(Terminating::Submitted("diff".to_string()));
        assert_eq!(err.to_string(), "diff");
    }

    #[test]
    fn template_errors_are_fatal() {
        let err = StepError::from(TemplateError::MissingVariable {
            names: vec!["task".to_string()],
        });
        match err {
            StepError::Fatal(inner) => {
                assert!(inner.to_string().contains("missing template variable(s): task"));
            }
            other => panic!("unexpected tier: {other:?}"),
        }
    }
}
