//! File content delivery with conditional and single byte-range support.

use std::io::SeekFrom;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::debug;

use crate::error::{FileServerError, io_to_error};
use crate::path::FileInfo;

/// Read size for streamed bodies.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Inclusive byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Number of bytes covered; never zero.
    pub fn length(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Parse a `Range` header value against a file of `size` bytes.
///
/// Only a single `bytes=` range is supported; anything else, including ranges
/// starting beyond the end of the file, is unsatisfiable. An end past the last
/// byte is clamped.
pub fn parse_range(value: &str, size: u64) -> Result<ByteRange, FileServerError> {
    let unsatisfiable = || FileServerError::RangeNotSatisfiable { size };

    let ranges = value
        .trim()
        .strip_prefix("bytes=")
        .ok_or_else(unsatisfiable)?;
    if ranges.contains(',') || size == 0 {
        return Err(unsatisfiable());
    }

    let (start_part, end_part) = ranges.split_once('-').ok_or_else(unsatisfiable)?;
    let (start_part, end_part) = (start_part.trim(), end_part.trim());

    if start_part.is_empty() {
        let suffix: u64 = end_part.parse().map_err(|_| unsatisfiable())?;
        if suffix == 0 {
            return Err(unsatisfiable());
        }
        return Ok(ByteRange {
            start: size.saturating_sub(suffix),
            end: size - 1,
        });
    }

    let start: u64 = start_part.parse().map_err(|_| unsatisfiable())?;
    let end: u64 = if end_part.is_empty() {
        size - 1
    } else {
        end_part.parse().map_err(|_| unsatisfiable())?
    };

    if start > end || start >= size {
        return Err(unsatisfiable());
    }

    Ok(ByteRange {
        start,
        end: end.min(size - 1),
    })
}

/// Entity tag derived from modification time and size.
pub fn entity_tag(file: &FileInfo) -> String {
    let nanos = file
        .modified
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    format!("\"{:x}-{:x}\"", nanos, file.size)
}

fn etag_matches(header_value: &str, etag: &str) -> bool {
    let bare = etag.trim_start_matches("W/");
    header_value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == bare
    })
}

fn truncate_to_secs(time: SystemTime) -> Option<u64> {
    time.duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// Not modified since `date`, compared at HTTP-date (second) precision.
fn unmodified_since(modified: Option<SystemTime>, date: &str) -> bool {
    let (Some(modified), Ok(since)) = (modified, httpdate::parse_http_date(date)) else {
        return false;
    };
    match (truncate_to_secs(modified), truncate_to_secs(since)) {
        (Some(modified), Some(since)) => modified <= since,
        _ => false,
    }
}

/// Whether the client's cached copy is still current.
fn is_not_modified(headers: &HeaderMap, file: &FileInfo, etag: &str) -> bool {
    if let Some(value) = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        return etag_matches(value, etag);
    }

    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|value| unmodified_since(file.modified, value))
}

/// Whether an `If-Range` precondition (if any) allows a partial response.
fn if_range_allows(headers: &HeaderMap, file: &FileInfo, etag: &str) -> bool {
    let Some(value) = headers.get(header::IF_RANGE).and_then(|v| v.to_str().ok()) else {
        return true;
    };
    let value = value.trim();
    if value.starts_with('"') || value.starts_with("W/") {
        value == etag
    } else {
        unmodified_since(file.modified, value)
    }
}

fn content_disposition(file: &FileInfo, download: bool) -> String {
    let file_name = file.name.as_str();

    // Quoted form for old clients, RFC 5987 form for everything else.
    let safe_filename: String = file_name
        .chars()
        .map(|c| if c == '"' || c.is_control() || !c.is_ascii() { '_' } else { c })
        .collect();
    let kind = if download { "attachment" } else { "inline" };

    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        safe_filename,
        urlencoding::encode(file_name)
    )
}

fn header_value(value: &str) -> Result<HeaderValue, FileServerError> {
    HeaderValue::from_str(value)
        .map_err(|_| FileServerError::BadRequest(format!("invalid header value: {}", value)))
}

/// Serve the content of a resolved file.
///
/// Uses streaming to handle large files without loading them into memory.
pub async fn stream(
    file: &FileInfo,
    request_headers: &HeaderMap,
    download: bool,
) -> Result<Response, FileServerError> {
    let etag = entity_tag(file);

    let mut headers = HeaderMap::new();
    headers.insert(header::ETAG, header_value(&etag)?);
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    if let Some(modified) = file.modified {
        headers.insert(
            header::LAST_MODIFIED,
            header_value(&httpdate::fmt_http_date(modified))?,
        );
    }

    if is_not_modified(request_headers, file, &etag) {
        debug!("Not modified: {}", file.path.display());
        return Ok((StatusCode::NOT_MODIFIED, headers).into_response());
    }

    headers.insert(header::CONTENT_TYPE, header_value(&file.content_type)?);
    headers.insert(
        header::CONTENT_DISPOSITION,
        header_value(&content_disposition(file, download))?,
    );

    let range = match request_headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) if if_range_allows(request_headers, file, &etag) => {
            Some(parse_range(value, file.size)?)
        }
        _ => None,
    };

    let mut handle = fs::File::open(&file.path)
        .await
        .map_err(|err| io_to_error(err, &file.path.display().to_string()))?;

    match range {
        Some(range) => {
            debug!(
                "Streaming range {}-{} of {}",
                range.start,
                range.end,
                file.path.display()
            );
            handle.seek(SeekFrom::Start(range.start)).await?;
            headers.insert(
                header::CONTENT_RANGE,
                header_value(&format!("bytes {}-{}/{}", range.start, range.end, file.size))?,
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(range.length()));

            let stream = ReaderStream::with_capacity(handle.take(range.length()), CHUNK_SIZE);
            Ok((
                StatusCode::PARTIAL_CONTENT,
                headers,
                Body::from_stream(stream),
            )
                .into_response())
        }
        None => {
            debug!("Streaming file: {}", file.path.display());
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));

            let stream = ReaderStream::with_capacity(handle, CHUNK_SIZE);
            Ok((StatusCode::OK, headers, Body::from_stream(stream)).into_response())
        }
    }
}
