//! Uploads and deletes.
//!
//! Uploads are streamed into a `.upload-XXXXXX` temporary file next to the
//! destination and renamed into place once complete. The temporary file is
//! owned by a [`TempPath`] guard, so every early return removes it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::pin::pin;

use axum::body::{Body, Bytes};
use axum::extract::Multipart;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::Serialize;
use tempfile::TempPath;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::AppState;
use crate::config::ConflictPolicy;
use crate::error::{FileServerError, io_to_error};
use crate::path::{RequestPath, canonicalize_within, ensure_within_root};

const MAX_FILENAME_BYTES: usize = 255;

/// Response for a completed upload.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    /// Prefix-qualified links of the stored files.
    pub paths: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Sanitize a client supplied filename to prevent path traversal and
/// filesystem surprises. Returns `None` if nothing usable is left.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    // Strip control characters, replace separators and reserved characters
    let sanitized: String = filename
        .chars()
        .filter(|c| !c.is_control())
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    let mut sanitized = sanitized.trim_matches(|c| c == '.' || c == ' ').to_string();
    if sanitized.is_empty() {
        return None;
    }

    // Reserved device names are rejected everywhere so a tree stays portable
    let upper = sanitized.to_uppercase();
    let stem = upper.split('.').next().unwrap_or_default();
    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if reserved.contains(&stem) {
        return None;
    }

    if sanitized.len() > MAX_FILENAME_BYTES {
        let mut cut = MAX_FILENAME_BYTES;
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized.truncate(cut);
    }

    Some(sanitized)
}

fn checked_filename(raw: &str) -> Result<String, FileServerError> {
    sanitize_filename(raw).ok_or_else(|| {
        warn!("Rejected invalid filename: {:?}", raw);
        FileServerError::InvalidPath(format!("Invalid filename: {}", raw))
    })
}

/// Canonical path of the upload directory, creating it if only the last
/// level is missing.
async fn prepare_target_dir(root: &Path, dir: &RequestPath) -> Result<PathBuf, FileServerError> {
    if let Some(existing) = canonicalize_within(root, dir).await? {
        let metadata = fs::metadata(&existing)
            .await
            .map_err(|err| io_to_error(err, &dir.to_string()))?;
        if !metadata.is_dir() {
            return Err(FileServerError::InvalidPath(format!(
                "Not a directory: {}",
                dir
            )));
        }
        return Ok(existing);
    }

    let (Some(parent), Some(name)) = (dir.parent(), dir.file_name()) else {
        return Err(FileServerError::NotFound(dir.to_string()));
    };
    let parent_path = match canonicalize_within(root, &parent).await? {
        Some(path) if fs::metadata(&path).await.is_ok_and(|m| m.is_dir()) => path,
        _ => return Err(FileServerError::NotFound(parent.to_string())),
    };

    let created = parent_path.join(name);
    match fs::create_dir(&created).await {
        Ok(()) => info!("Created directory: {}", created.display()),
        // Another upload may have created it in the meantime
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
        Err(err) => return Err(io_to_error(err, &dir.to_string())),
    }

    let canonical = fs::canonicalize(&created)
        .await
        .map_err(|err| io_to_error(err, &dir.to_string()))?;
    ensure_within_root(root, &canonical)?;
    Ok(canonical)
}

/// Final destination for `name` inside `dir_path`, applying the conflict policy.
async fn check_target(
    dir_path: &Path,
    name: &str,
    policy: ConflictPolicy,
) -> Result<PathBuf, FileServerError> {
    let target = dir_path.join(name);

    match fs::symlink_metadata(&target).await {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            warn!("Refusing to overwrite symlink: {:?}", target);
            Err(FileServerError::Forbidden(format!(
                "{} is a symbolic link",
                name
            )))
        }
        Ok(metadata) if metadata.is_dir() => Err(FileServerError::Conflict(format!(
            "{} is a directory",
            name
        ))),
        Ok(_) if policy == ConflictPolicy::Reject => {
            debug!("Upload conflict on {:?}", target);
            Err(FileServerError::Conflict(name.to_string()))
        }
        Ok(_) => Ok(target),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(target),
        Err(err) => Err(io_to_error(err, name)),
    }
}

/// Temporary file receiving an upload.
struct PendingUpload {
    file: fs::File,
    path: TempPath,
    written: u64,
    limit: u64,
}

impl PendingUpload {
    async fn create(dir_path: &Path, limit: u64) -> Result<Self, FileServerError> {
        let dir = dir_path.to_path_buf();
        let (file, path) = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(".upload-")
                .tempfile_in(&dir)
        })
        .await
        .map_err(|err| FileServerError::Io(std::io::Error::other(err)))?
        .map_err(|err| io_to_error(err, &dir_path.display().to_string()))?
        .into_parts();

        Ok(Self {
            file: fs::File::from_std(file),
            path,
            written: 0,
            limit,
        })
    }

    async fn write(&mut self, chunk: &[u8]) -> Result<(), FileServerError> {
        let total = self.written.saturating_add(chunk.len() as u64);
        if total > self.limit {
            return Err(FileServerError::FileTooLarge {
                size: total,
                limit: self.limit,
            });
        }
        self.file.write_all(chunk).await?;
        self.written = total;
        Ok(())
    }

    /// Rename into place. Under [`ConflictPolicy::Reject`] the rename fails
    /// if the target appeared since it was checked.
    async fn persist(
        self,
        target: &Path,
        name: &str,
        policy: ConflictPolicy,
    ) -> Result<u64, FileServerError> {
        let PendingUpload {
            mut file,
            path,
            written,
            ..
        } = self;

        file.flush().await?;
        drop(file);

        let destination = target.to_path_buf();
        let result = tokio::task::spawn_blocking(move || match policy {
            ConflictPolicy::Reject => path.persist_noclobber(&destination),
            ConflictPolicy::Overwrite => path.persist(&destination),
        })
        .await
        .map_err(|err| FileServerError::Io(std::io::Error::other(err)))?;

        match result {
            Ok(()) => Ok(written),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => {
                debug!("Upload conflict on {:?}", target);
                Err(FileServerError::Conflict(name.to_string()))
            }
            Err(err) => Err(io_to_error(err.error, &target.display().to_string())),
        }
    }
}

async fn store<S>(
    dir_path: &Path,
    name: &str,
    policy: ConflictPolicy,
    limit: u64,
    chunks: S,
) -> Result<u64, FileServerError>
where
    S: Stream<Item = Result<Bytes, FileServerError>>,
{
    let target = check_target(dir_path, name, policy).await?;
    let mut upload = PendingUpload::create(dir_path, limit).await?;

    let mut chunks = pin!(chunks);
    while let Some(chunk) = chunks.try_next().await? {
        upload.write(&chunk).await?;
    }

    let size = upload.persist(&target, name, policy).await?;
    info!("Stored upload: {} ({} bytes)", target.display(), size);
    Ok(size)
}

pub(crate) fn ensure_upload_enabled(state: &AppState) -> Result<(), FileServerError> {
    if state.config.upload {
        Ok(())
    } else {
        Err(FileServerError::FeatureDisabled("Upload"))
    }
}

/// POST <dir> - Store every file part of a multipart body in `dir`
pub async fn upload_multipart(
    state: &AppState,
    dir: &RequestPath,
    mut multipart: Multipart,
) -> Result<UploadResponse, FileServerError> {
    ensure_upload_enabled(state)?;
    let dir_path = prepare_target_dir(&state.root, dir).await?;

    let mut paths = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| FileServerError::BadRequest(e.body_text()))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            debug!("Skipping multipart field without filename: {:?}", field.name());
            continue;
        };
        let name = checked_filename(&raw_name)?;

        let chunks = field.map_err(|e| FileServerError::BadRequest(e.body_text()));
        store(
            &dir_path,
            &name,
            state.config.upload_conflict,
            state.config.max_upload_size,
            chunks,
        )
        .await?;

        paths.push(state.prefix.link(&dir.join(&name)?, false));
    }

    if paths.is_empty() {
        return Err(FileServerError::BadRequest(
            "Missing file upload data".to_string(),
        ));
    }

    Ok(UploadResponse {
        success: true,
        message: format!("Uploaded {} file(s) to {}", paths.len(), dir),
        paths,
    })
}

/// PUT <dir>/<name> - Store the raw request body as `name`
pub async fn upload_raw(
    state: &AppState,
    target: &RequestPath,
    body: Body,
) -> Result<UploadResponse, FileServerError> {
    ensure_upload_enabled(state)?;

    let (Some(dir), Some(raw_name)) = (target.parent(), target.file_name()) else {
        return Err(FileServerError::BadRequest(
            "PUT requires a file name".to_string(),
        ));
    };
    let name = checked_filename(raw_name)?;
    let dir_path = prepare_target_dir(&state.root, &dir).await?;

    let chunks = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| FileServerError::BadRequest(e.to_string())));
    store(
        &dir_path,
        &name,
        state.config.upload_conflict,
        state.config.max_upload_size,
        chunks,
    )
    .await?;

    let stored = dir.join(&name)?;
    Ok(UploadResponse {
        success: true,
        message: format!("File uploaded: {}", name),
        paths: vec![state.prefix.link(&stored, false)],
    })
}

/// DELETE <path> - Remove a file, symlink or directory
pub async fn delete(
    state: &AppState,
    request: &RequestPath,
) -> Result<SuccessResponse, FileServerError> {
    if !state.config.delete {
        return Err(FileServerError::FeatureDisabled("Delete"));
    }

    let (Some(parent), Some(name)) = (request.parent(), request.file_name()) else {
        warn!("Attempted to delete the served root");
        return Err(FileServerError::Forbidden(
            "Cannot delete root directory".to_string(),
        ));
    };

    // Only the parent is canonicalized; the entry itself is inspected without
    // following links so a symlink is removed rather than its target.
    let parent_path = canonicalize_within(&state.root, &parent)
        .await?
        .ok_or_else(|| FileServerError::NotFound(request.to_string()))?;
    let target = parent_path.join(name);

    let metadata = fs::symlink_metadata(&target)
        .await
        .map_err(|err| io_to_error(err, &request.to_string()))?;

    info!("Deleting: {}", target.display());

    let result = if metadata.is_dir() {
        if state.config.recursive_delete {
            fs::remove_dir_all(&target).await
        } else {
            fs::remove_dir(&target).await
        }
    } else {
        fs::remove_file(&target).await
    };

    result.map_err(|err| match err.kind() {
        ErrorKind::DirectoryNotEmpty => FileServerError::NotEmpty(request.to_string()),
        _ => io_to_error(err, &request.to_string()),
    })?;

    Ok(SuccessResponse {
        success: true,
        message: format!("Deleted: {}", request),
        path: Some(state.prefix.link(request, false)),
    })
}
