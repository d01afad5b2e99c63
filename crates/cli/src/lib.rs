//! stow CLI library
//!
//! Command definitions, exit codes and output formatting, exported so the
//! binary and the integration tests share one implementation.

pub mod commands;
pub mod exit_code;
pub mod output;
