//! Tapwire - capturing proxy and dashboard API for coding-agent traffic.
//!
//! This crate holds the pieces shared by the two binaries:
//!
//! - [`logging`]: console plus rotating file logging for `tapwire`
//! - [`hook`]: the lifecycle event submitter behind `tapwire-hook`

pub mod hook;
pub mod logging;

pub use hook::{build_submission, relay, HookClient, HookError, DEFAULT_HOOK_URL};
pub use logging::init_logging;
