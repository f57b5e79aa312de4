//! Path and command verdicts.

use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};

use super::SecurityError;
use super::command::{is_dangerous_command, matched_pattern};
use super::path::{
    PathStyle, is_absolute_remote, join_remote, normalize_path, normalize_remote, remote_within,
    resolve_local,
};

#[derive(Debug, Clone)]
struct BlockedPattern {
    raw: String,
    compiled: Option<Pattern>,
}

/// Allowed roots and blocked patterns for one target, precompiled.
///
/// Construction is the only place roots are resolved; [`PathPolicy::check`]
/// shares nothing mutable and can be called from any task.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    style: PathStyle,
    allowed_roots: Vec<String>,
    blocked: Vec<BlockedPattern>,
}

impl PathPolicy {
    pub fn new(style: PathStyle, allowed_roots: &[String], blocked_patterns: &[String]) -> Self {
        let allowed_roots = allowed_roots
            .iter()
            .filter(|r| !r.trim().is_empty())
            .map(|root| match style {
                PathStyle::Local => resolve_root(root),
                _ => {
                    let anchored = if is_absolute_remote(root, style) {
                        root.clone()
                    } else {
                        join_remote("/", root)
                    };
                    normalize_remote(&anchored, style)
                }
            })
            .collect();

        let blocked = blocked_patterns
            .iter()
            .map(|raw| {
                let compiled = match Pattern::new(raw) {
                    Ok(p) => Some(p),
                    Err(e) => {
                        tracing::error!(pattern = %raw, error = %e, "Invalid glob pattern in path policy");
                        None
                    }
                };
                BlockedPattern {
                    raw: raw.clone(),
                    compiled,
                }
            })
            .collect();

        Self {
            style,
            allowed_roots,
            blocked,
        }
    }

    pub fn local(allowed_roots: &[String], blocked_patterns: &[String]) -> Self {
        Self::new(PathStyle::Local, allowed_roots, blocked_patterns)
    }

    pub fn style(&self) -> PathStyle {
        self.style
    }

    /// Resolved allowed roots, in configuration order.
    pub fn allowed_roots(&self) -> &[String] {
        &self.allowed_roots
    }

    pub fn blocked_patterns(&self) -> impl Iterator<Item = &str> {
        self.blocked.iter().map(|b| b.raw.as_str())
    }

    /// Relative paths are anchored here: the first allowed root.
    pub fn base_dir(&self) -> Option<&str> {
        self.allowed_roots.first().map(String::as_str)
    }

    /// Resolves `path` and returns its canonical form if it may be acted upon.
    pub fn check(&self, path: &str) -> Result<String, SecurityError> {
        if path.contains('\0') {
            return Err(SecurityError::InvalidPath("null byte in path".into()));
        }
        if path.trim().is_empty() {
            return Err(SecurityError::InvalidPath("empty path".into()));
        }
        let Some(base) = self.base_dir() else {
            return Err(SecurityError::NoAllowedRoots);
        };

        let resolved = match self.style {
            PathStyle::Local => {
                let input = Path::new(path);
                let absolute = if input.is_absolute() {
                    input.to_path_buf()
                } else {
                    Path::new(base).join(input)
                };
                let resolved = resolve_local(&absolute)?;
                if !self
                    .allowed_roots
                    .iter()
                    .any(|root| local_within(&resolved, Path::new(root), self.style))
                {
                    return Err(SecurityError::PathEscape(resolved));
                }
                resolved.to_string_lossy().into_owned()
            }
            style => {
                let anchored = if is_absolute_remote(path, style) {
                    path.to_string()
                } else {
                    join_remote(base, path)
                };
                let resolved = normalize_remote(&anchored, style);
                let case_sensitive = style.is_case_sensitive();
                if !self
                    .allowed_roots
                    .iter()
                    .any(|root| remote_within(&resolved, root, case_sensitive))
                {
                    return Err(SecurityError::PathEscape(PathBuf::from(resolved)));
                }
                resolved
            }
        };

        if self.is_blocked(&resolved) {
            return Err(SecurityError::DeniedPath(PathBuf::from(resolved)));
        }

        Ok(resolved)
    }

    pub fn is_allowed(&self, path: &str) -> bool {
        self.check(path).is_ok()
    }

    fn is_blocked(&self, resolved: &str) -> bool {
        let options = MatchOptions {
            case_sensitive: self.style.is_case_sensitive(),
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let unified = resolved.replace('\\', "/");
        let as_dir = format!("{}/", unified.trim_end_matches('/'));
        self.blocked.iter().any(|b| match &b.compiled {
            Some(pattern) => {
                pattern.matches_with(&unified, options) || pattern.matches_with(&as_dir, options)
            }
            // Invalid patterns match everything so a typo cannot open a hole.
            None => true,
        })
    }
}

fn resolve_root(root: &str) -> String {
    let path = PathBuf::from(root);
    let absolute = if path.is_absolute() {
        path
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => path,
        }
    };
    std::fs::canonicalize(&absolute)
        .unwrap_or_else(|_| normalize_path(&absolute))
        .to_string_lossy()
        .into_owned()
}

fn local_within(candidate: &Path, root: &Path, style: PathStyle) -> bool {
    if style.is_case_sensitive() {
        candidate.starts_with(root)
    } else {
        let candidate = candidate.to_string_lossy().to_lowercase();
        let root = root.to_string_lossy().to_lowercase();
        Path::new(&candidate).starts_with(Path::new(&root))
    }
}

/// Stateless gate for commands and paths.
pub struct SecurityPolicy;

impl SecurityPolicy {
    pub fn is_dangerous_command(command: &str) -> bool {
        is_dangerous_command(command)
    }

    /// Local-filesystem verdict: the canonical form of `path` must sit under an
    /// allowed root and match no blocked pattern.
    pub fn is_safe_path(path: &str, allowed_roots: &[String], blocked_patterns: &[String]) -> bool {
        PathPolicy::local(allowed_roots, blocked_patterns).is_allowed(path)
    }

    pub fn check_command(command: &str) -> Result<(), SecurityError> {
        match matched_pattern(command) {
            Some(pattern) => Err(SecurityError::DangerousCommand(pattern.to_string())),
            None => Ok(()),
        }
    }
}
