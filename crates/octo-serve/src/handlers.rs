use axum::{
    Json,
    extract::{FromRequest, Multipart, Query, Request, State, rejection::QueryRejection},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use tracing::debug;

use crate::AppState;
use crate::error::FileServerError;
use crate::listing::{self, ContentQuery, ListingFormat};
use crate::mutation;
use crate::path::{self, RequestPath, ResolvedEntry};
use crate::stream;

/// Strip the prefix from a request URI and parse what is left.
fn request_path(state: &AppState, uri: &Uri) -> Result<RequestPath, FileServerError> {
    let stripped = state
        .prefix
        .strip(uri.path())
        .ok_or_else(|| FileServerError::NotFound(uri.path().to_string()))?;
    RequestPath::from_url_path(stripped)
}

/// GET|HEAD|POST|PUT|DELETE <prefix>/{*path} - Content paths
pub async fn entry(
    State(state): State<AppState>,
    query: Result<Query<ContentQuery>, QueryRejection>,
    req: Request,
) -> Result<Response, FileServerError> {
    let Query(query) = query.map_err(|e| FileServerError::BadRequest(e.body_text()))?;
    let request = request_path(&state, req.uri())?;
    debug!("{} {}", req.method(), request);

    match *req.method() {
        Method::GET | Method::HEAD => read(&state, &request, &query, req.headers()).await,
        Method::POST => {
            // Checked before the body is touched so a disabled feature wins
            // over a malformed request.
            mutation::ensure_upload_enabled(&state)?;
            let multipart = Multipart::from_request(req, &state)
                .await
                .map_err(|e| FileServerError::BadRequest(e.body_text()))?;
            let response = mutation::upload_multipart(&state, &request, multipart).await?;
            Ok((StatusCode::CREATED, Json(response)).into_response())
        }
        Method::PUT => {
            let response = mutation::upload_raw(&state, &request, req.into_body()).await?;
            Ok((StatusCode::CREATED, Json(response)).into_response())
        }
        Method::DELETE => {
            let response = mutation::delete(&state, &request).await?;
            Ok(Json(response).into_response())
        }
        _ => Err(FileServerError::MethodNotAllowed),
    }
}

async fn read(
    state: &AppState,
    request: &RequestPath,
    query: &ContentQuery,
    headers: &HeaderMap,
) -> Result<Response, FileServerError> {
    match path::resolve(&state.root, request).await? {
        ResolvedEntry::Directory { path, children } => {
            let format = ListingFormat::negotiate(headers, query);
            Ok(listing::render(state, &path, &children, request, format).await)
        }
        ResolvedEntry::File(file) => stream::stream(&file, headers, query.download).await,
        ResolvedEntry::NotFound => Err(FileServerError::NotFound(request.to_string())),
    }
}

/// GET <prefix>/-/sysinfo - Server version
pub async fn sysinfo() -> impl IntoResponse {
    Json(json!({ "version": env!("CARGO_PKG_VERSION") }))
}

/// GET / - Send clients to the mount point
pub async fn redirect_to_prefix(State(state): State<AppState>) -> Redirect {
    Redirect::temporary(state.prefix.as_str())
}

pub async fn not_found(uri: Uri) -> FileServerError {
    FileServerError::NotFound(uri.path().to_string())
}
