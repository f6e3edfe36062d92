//! Directory tree file server.
//!
//! Serves a single rooted directory over HTTP with browsable listings, range
//! capable downloads, optional uploads and deletes, and one global auth mode.
//! The whole surface can be mounted under a URL prefix.

use std::path::Path;
use std::sync::Arc;

pub mod assets;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod listing;
pub mod mutation;
pub mod path;
pub mod prefix;
pub mod routes;
pub mod stream;

pub use assets::AssetBundle;
pub use config::{AuthMode, ConfigError, ConflictPolicy, ServerConfig};
pub use error::FileServerError;
pub use prefix::Prefix;
pub use routes::create_router;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Configuration, immutable after startup
    pub config: Arc<ServerConfig>,
    /// Canonical root directory
    pub root: Arc<Path>,
    /// Normalized URL prefix
    pub prefix: Prefix,
    /// Bundled UI resources
    pub assets: Arc<AssetBundle>,
}

impl AppState {
    /// Validate `config` and build the state with the built-in assets.
    pub fn new(config: ServerConfig) -> Result<Self, ConfigError> {
        Self::with_assets(config, AssetBundle::builtin())
    }

    pub fn with_assets(config: ServerConfig, assets: AssetBundle) -> Result<Self, ConfigError> {
        config.validate()?;

        let root = config
            .root
            .canonicalize()
            .map_err(|source| ConfigError::RootUnreadable {
                path: config.root.clone(),
                source,
            })?;

        Ok(Self {
            prefix: Prefix::new(&config.prefix),
            root: Arc::from(root),
            config: Arc::new(config),
            assets: Arc::new(assets),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_state_canonicalizes_root_and_prefix() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::create_dir(temp_dir.path().join("sub")).unwrap();

        let state = AppState::new(ServerConfig {
            root: temp_dir.path().join("sub/../sub"),
            prefix: "files/".to_string(),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(
            &*state.root,
            temp_dir.path().join("sub").canonicalize().unwrap().as_path()
        );
        assert_eq!(state.prefix.as_str(), "/files");
    }

    #[test]
    fn test_state_rejects_missing_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppState::new(ServerConfig {
            root: temp_dir.path().join("missing"),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::RootMissing(_))));
    }

    #[test]
    fn test_state_rejects_route_pattern_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let result = AppState::new(ServerConfig {
            root: temp_dir.path().to_path_buf(),
            prefix: "/{tenant}".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(ConfigError::InvalidPrefix(_))));
    }
}
