//! URL prefix handling.
//!
//! The server can be mounted under a sub-path of a larger site. Every URL it
//! emits goes through [`Prefix`] so links, redirects and asset references stay
//! correct whatever the mount point.

use crate::config::normalize_prefix;
use crate::path::RequestPath;

/// Normalized URL prefix: empty, or starting with `/` and not ending with `/`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefix(String);

impl Prefix {
    pub fn new(raw: &str) -> Self {
        Self(normalize_prefix(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prefix-qualify an absolute application path.
    pub fn qualify(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.0, path)
        } else {
            format!("{}/{}", self.0, path)
        }
    }

    /// Landing page of the application, always with a trailing slash.
    pub fn app_root(&self) -> String {
        self.qualify("/")
    }

    /// Browse or download link for an entry. Directories get a trailing slash.
    pub fn link(&self, path: &RequestPath, is_dir: bool) -> String {
        let mut url = self.qualify(&path.to_url());
        if is_dir && !url.ends_with('/') {
            url.push('/');
        }
        url
    }

    pub fn asset_url(&self, name: &str) -> String {
        self.qualify(&format!("/-/assets/{}", name.trim_start_matches('/')))
    }

    /// Strip the prefix from a request path.
    ///
    /// Returns `None` when the path lies outside the prefix. The prefix itself
    /// maps to `/`.
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.0.is_empty() {
            return Some(if path.is_empty() { "/" } else { path });
        }
        let rest = path.strip_prefix(self.0.as_str())?;
        if rest.is_empty() {
            Some("/")
        } else if rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }

    /// Whether `target` is a same-origin path under this prefix, safe to
    /// redirect to.
    pub fn is_local_target(&self, target: &str) -> bool {
        target.starts_with('/')
            && !target.starts_with("//")
            && !target.contains('\\')
            && self.strip(target).is_some()
    }
}
