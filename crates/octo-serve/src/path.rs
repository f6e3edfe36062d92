//! Mapping of request paths onto the served directory tree.
//!
//! Every lookup goes through [`RequestPath`], which cannot represent `..`
//! segments, and [`resolve`], which canonicalizes the joined path and checks
//! that the result is still inside the root. Symlinks are followed only as far
//! as their target stays within the root.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{FileServerError, io_to_error};

/// A URL path relative to the served root, already stripped of the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestPath {
    segments: Vec<String>,
}

impl RequestPath {
    /// The served root itself.
    pub fn root() -> Self {
        Self::default()
    }

    /// Parse an already percent-decoded path.
    pub fn parse(raw: &str) -> Result<Self, FileServerError> {
        let mut segments = Vec::new();

        for segment in raw.split('/') {
            if segment.is_empty() || segment == "." {
                continue;
            }
            if segment == ".." {
                warn!("Path traversal attempt detected: parent directory (..) in path");
                return Err(FileServerError::OutOfRoot);
            }
            if segment.contains('\0') || segment.contains('\\') {
                warn!("Rejected path segment with null byte or backslash: {:?}", segment);
                return Err(FileServerError::OutOfRoot);
            }

            // Catches drive prefixes and anything else the platform would not
            // treat as a plain file name.
            let mut components = Path::new(segment).components();
            match (components.next(), components.next()) {
                (Some(Component::Normal(_)), None) => {}
                _ => {
                    warn!("Rejected non-normal path segment: {:?}", segment);
                    return Err(FileServerError::OutOfRoot);
                }
            }

            segments.push(segment.to_string());
        }

        Ok(Self { segments })
    }

    /// Parse a percent-encoded URL path as it appears on the wire.
    pub fn from_url_path(encoded: &str) -> Result<Self, FileServerError> {
        let decoded = urlencoding::decode(encoded)
            .map_err(|_| FileServerError::InvalidPath("path is not valid UTF-8".to_string()))?;
        Self::parse(&decoded)
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Last segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Containing directory, `None` for the root.
    pub fn parent(&self) -> Option<RequestPath> {
        if self.segments.is_empty() {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Append a single file name.
    pub fn join(&self, name: &str) -> Result<RequestPath, FileServerError> {
        let child = Self::parse(name)?;
        if child.segments.len() != 1 {
            return Err(FileServerError::InvalidPath(format!(
                "not a single path segment: {}",
                name
            )));
        }
        let mut segments = self.segments.clone();
        segments.extend(child.segments);
        Ok(Self { segments })
    }

    /// Relative filesystem path for joining onto the root.
    pub fn to_relative_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    /// URL form with every segment percent-encoded, e.g. `/a%20b/c.txt`.
    pub fn to_url(&self) -> String {
        if self.segments.is_empty() {
            return "/".to_string();
        }
        let mut url = String::new();
        for segment in &self.segments {
            url.push('/');
            url.push_str(&urlencoding::encode(segment));
        }
        url
    }
}

impl fmt::Display for RequestPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

/// Metadata of a resolved regular file.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    /// Last segment of the requested path, which may differ from the name
    /// of a symlink target.
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub content_type: String,
}

/// Result of looking a request path up in the served tree.
#[derive(Debug, Clone)]
pub enum ResolvedEntry {
    /// Directory with the names of its immediate children.
    Directory { path: PathBuf, children: Vec<String> },
    File(FileInfo),
    NotFound,
}

/// Fail with `OutOfRoot` unless `canonical` lies inside `root`.
///
/// Both paths must already be canonical.
pub(crate) fn ensure_within_root(root: &Path, canonical: &Path) -> Result<(), FileServerError> {
    if canonical.starts_with(root) {
        Ok(())
    } else {
        warn!(
            "Symlink escape attempt: {:?} resolved outside {:?}",
            canonical, root
        );
        Err(FileServerError::OutOfRoot)
    }
}

/// Canonicalize `root/request`, returning `None` when nothing exists there.
pub(crate) async fn canonicalize_within(
    root: &Path,
    request: &RequestPath,
) -> Result<Option<PathBuf>, FileServerError> {
    let joined = root.join(request.to_relative_path());
    let canonical = match fs::canonicalize(&joined).await {
        Ok(path) => path,
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            return Ok(None);
        }
        Err(err) => return Err(io_to_error(err, &request.to_string())),
    };

    ensure_within_root(root, &canonical)?;
    Ok(Some(canonical))
}

/// Resolve `request` against the canonical `root`.
pub async fn resolve(root: &Path, request: &RequestPath) -> Result<ResolvedEntry, FileServerError> {
    let Some(canonical) = canonicalize_within(root, request).await? else {
        return Ok(ResolvedEntry::NotFound);
    };

    let metadata = match fs::metadata(&canonical).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ResolvedEntry::NotFound),
        Err(err) => return Err(io_to_error(err, &request.to_string())),
    };

    if metadata.is_dir() {
        let mut children = Vec::new();
        let mut entries = fs::read_dir(&canonical)
            .await
            .map_err(|err| io_to_error(err, &request.to_string()))?;
        while let Some(entry) = entries.next_entry().await? {
            match entry.file_name().into_string() {
                Ok(name) => children.push(name),
                Err(name) => debug!("Skipping entry with non UTF-8 name: {:?}", name),
            }
        }

        return Ok(ResolvedEntry::Directory {
            path: canonical,
            children,
        });
    }

    if metadata.is_file() {
        // Name and content type follow the request, not a symlink target.
        let name = request.file_name().unwrap_or("download").to_string();
        let content_type = mime_guess::from_path(&name)
            .first_or_octet_stream()
            .to_string();

        return Ok(ResolvedEntry::File(FileInfo {
            path: canonical,
            name,
            size: metadata.len(),
            modified: metadata.modified().ok(),
            content_type,
        }));
    }

    debug!("Not serving special file: {}", canonical.display());
    Ok(ResolvedEntry::NotFound)
}
