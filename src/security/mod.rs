//! Security gate for commands and paths.
//!
//! Every verdict is a pure function of its inputs:
//! - commands are matched case-insensitively against a fixed deny-list
//! - paths are resolved (symlinks followed on the local host, lexically on remote
//!   targets) and must land under an allowed root without matching a blocked pattern
//!
//! A remote verdict alone cannot see links on the far host. The remote executor
//! checks the host's own resolution a second time where the transport offers
//! one (SFTP `realpath` over SSH). WinRM targets keep the lexical verdict.

mod command;
mod error;
mod guard;
mod path;
mod policy;

pub use command::{DANGEROUS_COMMANDS, is_dangerous_command};
pub use error::SecurityError;
pub use guard::{SecurityGuard, ToolPathSchema};
pub use path::PathStyle;
pub use policy::{PathPolicy, SecurityPolicy};

/// Free-function form of [`SecurityPolicy::is_safe_path`].
pub fn is_safe_path(path: &str, allowed_roots: &[String], blocked_patterns: &[String]) -> bool {
    SecurityPolicy::is_safe_path(path, allowed_roots, blocked_patterns)
}
