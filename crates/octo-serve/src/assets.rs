//! Bundled UI resources.
//!
//! The bundle is built once at startup and shared read-only through
//! [`AppState`](crate::AppState). The page shell is a template the listing
//! renderer fills in; the remaining assets are served verbatim under
//! `<prefix>/-/assets/`.

use std::borrow::Cow;
use std::collections::HashMap;

use axum::{
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::AppState;
use crate::error::FileServerError;

const SHELL_TEMPLATE: &str = include_str!("../assets/index.html");
const STYLESHEET: &str = include_str!("../assets/style.css");
const SCRIPT: &str = include_str!("../assets/app.js");

/// A single static resource.
#[derive(Debug, Clone)]
pub struct Asset {
    pub content: Cow<'static, [u8]>,
    pub content_type: String,
}

impl Asset {
    pub fn new(name: &str, content: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            content: content.into(),
            content_type: mime_guess::from_path(name)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

/// Immutable mapping from asset name to content.
#[derive(Debug, Clone)]
pub struct AssetBundle {
    shell: Cow<'static, str>,
    assets: HashMap<String, Asset>,
}

impl AssetBundle {
    /// The resources compiled into the binary.
    pub fn builtin() -> Self {
        Self::new(
            SHELL_TEMPLATE,
            [
                ("style.css", STYLESHEET.as_bytes()),
                ("app.js", SCRIPT.as_bytes()),
            ],
        )
    }

    pub fn new<I, C>(shell: impl Into<Cow<'static, str>>, assets: I) -> Self
    where
        I: IntoIterator<Item = (&'static str, C)>,
        C: Into<Cow<'static, [u8]>>,
    {
        let assets = assets
            .into_iter()
            .map(|(name, content)| (name.to_string(), Asset::new(name, content)))
            .collect();

        Self {
            shell: shell.into(),
            assets,
        }
    }

    /// Page template used for HTML listings.
    pub fn shell(&self) -> &str {
        &self.shell
    }

    pub fn get(&self, name: &str) -> Option<&Asset> {
        self.assets.get(name)
    }
}

/// GET <prefix>/-/assets/{*path} - Serve a bundled resource
pub async fn serve_asset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, FileServerError> {
    let asset = state
        .assets
        .get(&name)
        .ok_or_else(|| FileServerError::NotFound(format!("asset {}", name)))?;

    debug!("Serving asset: {}", name);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, asset.content_type.clone()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        asset.content.clone().into_owned(),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_bundle() {
        let bundle = AssetBundle::builtin();
        assert!(bundle.shell().contains("{{listing}}"));

        let css = bundle.get("style.css").unwrap();
        assert_eq!(css.content_type, "text/css");
        assert!(!css.content.is_empty());

        let js = bundle.get("app.js").unwrap();
        assert!(js.content_type.contains("javascript"));

        assert!(bundle.get("index.html").is_none());
        assert!(bundle.get("../Cargo.toml").is_none());
    }

    #[test]
    fn test_custom_bundle() {
        let bundle = AssetBundle::new("<main>{{listing}}</main>", [("logo.svg", &b"<svg/>"[..])]);
        assert_eq!(bundle.get("logo.svg").unwrap().content_type, "image/svg+xml");
        assert!(bundle.get("style.css").is_none());
    }
}
