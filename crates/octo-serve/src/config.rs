use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Server configuration, fixed for the lifetime of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Directory tree to serve
    pub root: PathBuf,

    /// URL prefix the server is mounted under, e.g. `/files`
    pub prefix: String,

    /// UI theme name, passed through to the page shell
    pub theme: String,

    /// Page title
    pub title: String,

    /// Allow uploads
    pub upload: bool,

    /// Allow deletes
    pub delete: bool,

    /// Authentication mode
    pub auth: AuthMode,

    /// What to do when an upload targets an existing file
    pub upload_conflict: ConflictPolicy,

    /// Allow deleting non-empty directories
    pub recursive_delete: bool,

    /// Maximum size of a single uploaded file (in bytes)
    pub max_upload_size: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            prefix: String::new(),
            theme: "black".to_string(),
            title: "Octo File Server".to_string(),
            upload: false,
            delete: false,
            auth: AuthMode::None,
            upload_conflict: ConflictPolicy::Overwrite,
            recursive_delete: true,
            max_upload_size: 100 * 1024 * 1024,
        }
    }
}

/// Authentication mode, selected once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum AuthMode {
    /// Every request passes.
    #[default]
    None,
    /// HTTP basic auth against a single static credential pair.
    Basic { username: String, password: String },
    /// Token carried in the `token` cookie, set by the login path.
    Token { token: String },
}

impl AuthMode {
    pub fn name(&self) -> &'static str {
        match self {
            AuthMode::None => "none",
            AuthMode::Basic { .. } => "basic",
            AuthMode::Token { .. } => "token",
        }
    }
}

/// Upload policy for targets that already exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Replace the existing file.
    #[default]
    Overwrite,
    /// Fail with a conflict error.
    Reject,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "reject" => Ok(ConflictPolicy::Reject),
            _ => Err(format!("unknown conflict policy: {}", s)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Root directory does not exist: {0}")]
    RootMissing(PathBuf),

    #[error("Root path is not a directory: {0}")]
    RootNotADirectory(PathBuf),

    #[error("Failed to resolve root directory {path}: {source}")]
    RootUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Basic auth requires a non-empty username and password")]
    EmptyBasicCredentials,

    #[error("Token auth requires a non-empty token without ';', ',' or whitespace")]
    InvalidToken,

    #[error("Invalid URL prefix {0:?}: '{{', '}}', '*', '?', '#' and whitespace are not allowed")]
    InvalidPrefix(String),
}

impl ServerConfig {
    /// Check the configuration before the server starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.root.exists() {
            return Err(ConfigError::RootMissing(self.root.clone()));
        }
        if !self.root.is_dir() {
            return Err(ConfigError::RootNotADirectory(self.root.clone()));
        }

        if !is_valid_prefix(&self.prefix) {
            return Err(ConfigError::InvalidPrefix(self.prefix.clone()));
        }

        match &self.auth {
            AuthMode::None => {}
            AuthMode::Basic { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(ConfigError::EmptyBasicCredentials);
                }
            }
            AuthMode::Token { token } => {
                if !is_cookie_safe(token) {
                    return Err(ConfigError::InvalidToken);
                }
            }
        }

        Ok(())
    }
}

/// The prefix is spliced into route patterns, so it may only hold plain
/// path characters.
fn is_valid_prefix(prefix: &str) -> bool {
    prefix.chars().all(|c| {
        !c.is_whitespace() && !c.is_control() && !matches!(c, '{' | '}' | '*' | '?' | '#' | '\\')
    })
}

pub(crate) fn is_cookie_safe(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_graphic() && c != ';' && c != ',' && c != '"' && c != '\\')
}

/// Normalize a URL prefix so it starts with `/` and never ends with `/`.
/// The root prefix (`/` or empty) normalizes to an empty string.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("/"), "");
        assert_eq!(normalize_prefix("///"), "");
        assert_eq!(normalize_prefix("files"), "/files");
        assert_eq!(normalize_prefix("/files/"), "/files");
        assert_eq!(normalize_prefix("files//"), "/files");
        assert_eq!(normalize_prefix("/a/b"), "/a/b");
    }

    #[test]
    fn test_auth_mode_deserialize() {
        let mode: AuthMode =
            serde_json::from_str(r#"{"mode":"basic","username":"u","password":"p"}"#).unwrap();
        assert_eq!(
            mode,
            AuthMode::Basic {
                username: "u".to_string(),
                password: "p".to_string()
            }
        );

        let mode: AuthMode = serde_json::from_str(r#"{"mode":"none"}"#).unwrap();
        assert_eq!(mode, AuthMode::None);
    }

    #[test]
    fn test_conflict_policy_from_str() {
        assert_eq!(
            "reject".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::Reject
        );
        assert_eq!(
            "Overwrite".parse::<ConflictPolicy>().unwrap(),
            ConflictPolicy::Overwrite
        );
        assert!("keep".parse::<ConflictPolicy>().is_err());
    }

    #[test]
    fn test_validate_root() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = ServerConfig {
            root: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());

        config.root = temp_dir.path().join("missing");
        assert!(matches!(config.validate(), Err(ConfigError::RootMissing(_))));

        let file = temp_dir.path().join("file.txt");
        std::fs::write(&file, "x").unwrap();
        config.root = file;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RootNotADirectory(_))
        ));
    }

    #[test]
    fn test_validate_auth() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = ServerConfig {
            root: temp_dir.path().to_path_buf(),
            auth: AuthMode::Basic {
                username: "admin".to_string(),
                password: String::new(),
            },
            ..ServerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyBasicCredentials)
        ));

        config.auth = AuthMode::Token {
            token: "has space".to_string(),
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidToken)));

        config.auth = AuthMode::Token {
            token: "s3cr3t-token".to_string(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = ServerConfig {
            root: temp_dir.path().to_path_buf(),
            prefix: "/team-files/v1".to_string(),
            ..ServerConfig::default()
        };
        assert!(config.validate().is_ok());

        for prefix in ["/{id}", "/files/*rest", "/a}b", "/a b", "/q?x", "/frag#1"] {
            config.prefix = prefix.to_string();
            assert!(
                matches!(config.validate(), Err(ConfigError::InvalidPrefix(ref p)) if p == prefix),
                "{prefix}"
            );
        }
    }
}
