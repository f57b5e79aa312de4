//! Security error types.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SecurityError {
    #[error("dangerous command blocked: {0}")]
    DangerousCommand(String),

    #[error("path escapes allowed roots: {0}")]
    PathEscape(PathBuf),

    #[error("denied path: {0}")]
    DeniedPath(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("no allowed roots configured")]
    NoAllowedRoots,
}
