//! Machine target configuration.

use std::path::PathBuf;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};

use crate::security::{PathPolicy, PathStyle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Local,
    Ssh,
    Winrm,
}

impl TargetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetKind::Local => "local",
            TargetKind::Ssh => "ssh",
            TargetKind::Winrm => "winrm",
        }
    }

    pub fn default_port(&self) -> Option<u16> {
        match self {
            TargetKind::Local => None,
            TargetKind::Ssh => Some(22),
            TargetKind::Winrm => Some(5986),
        }
    }

    pub fn path_style(&self) -> PathStyle {
        match self {
            TargetKind::Local => PathStyle::Local,
            TargetKind::Ssh => PathStyle::Posix,
            TargetKind::Winrm => PathStyle::Windows,
        }
    }

    pub fn default_allowed_roots(&self) -> Vec<String> {
        let roots: &[&str] = match self {
            TargetKind::Local => &["./workspace"],
            TargetKind::Ssh => &["/home", "/tmp"],
            TargetKind::Winrm => &["C:/", "D:/", "E:/"],
        };
        roots.iter().map(|s| s.to_string()).collect()
    }

    pub fn default_blocked_patterns(&self) -> Vec<String> {
        let patterns: &[&str] = match self {
            TargetKind::Local => &[],
            TargetKind::Ssh => &["*/proc/*", "*/sys/*", "*/dev/*"],
            TargetKind::Winrm => &["*/Windows/System32/*", "*/Program Files/*"],
        };
        patterns.iter().map(|s| s.to_string()).collect()
    }

    /// Whether the backend for this kind was compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            TargetKind::Local => true,
            TargetKind::Ssh => cfg!(feature = "ssh"),
            TargetKind::Winrm => cfg!(feature = "winrm"),
        }
    }
}

impl std::fmt::Display for TargetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static credentials for a remote target.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    Password {
        #[serde(deserialize_with = "deserialize_secret")]
        password: SecretString,
    },
    Key {
        key_path: PathBuf,
        #[serde(default, deserialize_with = "deserialize_optional_secret")]
        passphrase: Option<SecretString>,
    },
}

impl AuthConfig {
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password {
            password: SecretString::from(password.into()),
        }
    }

    pub fn key(key_path: impl Into<PathBuf>) -> Self {
        Self::Key {
            key_path: key_path.into(),
            passphrase: None,
        }
    }
}

pub(crate) fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(SecretString::from)
}

pub(crate) fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

/// One named machine the agent may act on.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineTarget {
    pub name: String,
    pub kind: TargetKind,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub ssl: Option<bool>,
    #[serde(default)]
    pub allowed_roots: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_patterns: Option<Vec<String>>,
    #[serde(default)]
    pub default: bool,
}

impl MachineTarget {
    pub fn local(name: impl Into<String>) -> Self {
        Self::bare(name, TargetKind::Local)
    }

    pub fn ssh(name: impl Into<String>, host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            username: Some(username.into()),
            ..Self::bare(name, TargetKind::Ssh)
        }
    }

    pub fn winrm(
        name: impl Into<String>,
        host: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            host: Some(host.into()),
            username: Some(username.into()),
            ..Self::bare(name, TargetKind::Winrm)
        }
    }

    fn bare(name: impl Into<String>, kind: TargetKind) -> Self {
        Self {
            name: name.into(),
            kind,
            host: None,
            port: None,
            username: None,
            auth: None,
            ssl: None,
            allowed_roots: None,
            blocked_patterns: None,
            default: false,
        }
    }

    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_ssl(mut self, ssl: bool) -> Self {
        self.ssl = Some(ssl);
        self
    }

    pub fn with_allowed_roots(mut self, roots: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_roots = Some(roots.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_blocked_patterns(
        mut self,
        patterns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.blocked_patterns = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }

    pub fn effective_port(&self) -> Option<u16> {
        self.port.or(self.kind.default_port())
    }

    pub fn effective_ssl(&self) -> bool {
        self.ssl.unwrap_or(self.kind == TargetKind::Winrm)
    }

    pub fn effective_allowed_roots(&self) -> Vec<String> {
        self.allowed_roots
            .clone()
            .unwrap_or_else(|| self.kind.default_allowed_roots())
    }

    pub fn effective_blocked_patterns(&self) -> Vec<String> {
        self.blocked_patterns
            .clone()
            .unwrap_or_else(|| self.kind.default_blocked_patterns())
    }

    pub fn path_policy(&self) -> PathPolicy {
        PathPolicy::new(
            self.kind.path_style(),
            &self.effective_allowed_roots(),
            &self.effective_blocked_patterns(),
        )
    }
}
