//! Side-effecting collaborators: configuration files, processes, the shell environment, the
//! model backend and run artifacts.

pub mod config;
pub mod environment;
pub mod model;
pub mod process;
pub mod trajectory;
