//! Path normalization and resolution.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::SecurityError;

/// How paths on a target are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStyle {
    /// Host filesystem. Existing components are canonicalized so symlinks are followed.
    Local,
    /// Remote POSIX machine, resolved lexically.
    Posix,
    /// Remote Windows machine, resolved lexically with drive prefixes and case folding.
    Windows,
}

impl PathStyle {
    pub fn is_case_sensitive(&self) -> bool {
        match self {
            PathStyle::Windows => false,
            PathStyle::Local => !cfg!(windows),
            PathStyle::Posix => true,
        }
    }
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if !components.is_empty()
                    && !matches!(
                        components.last(),
                        Some(Component::RootDir) | Some(Component::Prefix(_))
                    )
                {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        PathBuf::from(".")
    } else {
        components.iter().collect()
    }
}

/// Canonicalizes the longest existing prefix of `path` and appends the rest lexically.
///
/// `path` must be absolute. A dangling symlink anywhere on the existing prefix is rejected,
/// since writing through it would land wherever it points.
pub(crate) fn resolve_local(path: &Path) -> Result<PathBuf, SecurityError> {
    let mut existing = path.to_path_buf();
    let mut tail: Vec<OsString> = Vec::new();

    loop {
        match std::fs::canonicalize(&existing) {
            Ok(canonical) => {
                let mut resolved = canonical;
                for part in tail.iter().rev() {
                    resolved.push(part);
                }
                return Ok(normalize_path(&resolved));
            }
            Err(_) => {
                if std::fs::symlink_metadata(&existing).is_ok() {
                    return Err(SecurityError::InvalidPath(format!(
                        "unresolvable link: {}",
                        existing.display()
                    )));
                }
                let Some(last) = existing.components().next_back() else {
                    return Ok(normalize_path(path));
                };
                tail.push(last.as_os_str().to_os_string());
                if !existing.pop() {
                    return Ok(normalize_path(path));
                }
            }
        }
    }
}

/// Splits a Windows drive prefix (`C:`) off the front of a slash-normalized path.
fn split_drive(path: &str) -> (Option<String>, &str) {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        (Some(path[..2].to_ascii_uppercase()), &path[2..])
    } else {
        (None, path)
    }
}

pub(crate) fn is_absolute_remote(path: &str, style: PathStyle) -> bool {
    match style {
        PathStyle::Windows => {
            let unified = path.replace('\\', "/");
            split_drive(&unified).0.is_some() || unified.starts_with('/')
        }
        _ => path.starts_with('/'),
    }
}

/// Lexical normalization for paths that live on another machine.
///
/// `..` never climbs above the root or drive.
pub(crate) fn normalize_remote(path: &str, style: PathStyle) -> String {
    let unified = match style {
        PathStyle::Windows => path.replace('\\', "/"),
        _ => path.to_string(),
    };
    let (drive, rest) = match style {
        PathStyle::Windows => split_drive(&unified),
        _ => (None, unified.as_str()),
    };

    let mut parts: Vec<&str> = Vec::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }

    format!("{}/{}", drive.unwrap_or_default(), parts.join("/"))
}

pub(crate) fn join_remote(base: &str, path: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

pub(crate) fn remote_within(candidate: &str, root: &str, case_sensitive: bool) -> bool {
    let (candidate, root) = if case_sensitive {
        (candidate.to_string(), root.to_string())
    } else {
        (candidate.to_lowercase(), root.to_lowercase())
    };
    if root.ends_with('/') {
        candidate.starts_with(&root) || candidate == root.trim_end_matches('/')
    } else {
        candidate == root || candidate.starts_with(&format!("{}/", root))
    }
}
