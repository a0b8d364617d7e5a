//! Minimal software-engineering agent loop.
//!
//! A language model is asked for one shell command per turn; the command runs in an environment
//! and its output is fed back until the model submits or a resource limit is hit. The crate keeps
//! the usual separation:
//!
//! - **[`core`]**: Pure logic (message log, templates, limits, action extraction, submission
//!   detection). No I/O.
//! - **[`io`]**: Side effects (configuration files, child processes, the model and environment
//!   backends, trajectory files).
//!
//! [`agent`] ties the two together into the turn loop; [`error`] defines the two-tier taxonomy
//! the loop dispatches on.

pub mod agent;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod retrieval;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
