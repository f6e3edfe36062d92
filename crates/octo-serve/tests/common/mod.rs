//! Test utilities and common setup.
#![allow(dead_code)]

use axum::{
    Router,
    body::{Body, Bytes},
    http::{Method, Request, Response, header},
};
use octo_serve::{AppState, ServerConfig, create_router};
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "octo-serve-test-boundary";

/// A router serving a fresh temporary directory.
pub struct TestServer {
    pub dir: TempDir,
    pub app: Router,
}

impl TestServer {
    pub fn path(&self, relative: &str) -> std::path::PathBuf {
        self.dir.path().join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.path(relative)).unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }
}

/// Build a server with uploads and deletes enabled, then apply `configure`.
pub fn test_server(configure: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig {
        root: dir.path().to_path_buf(),
        upload: true,
        delete: true,
        ..Default::default()
    };
    configure(&mut config);

    let state = AppState::new(config).unwrap();
    TestServer {
        dir,
        app: create_router(state),
    }
}

pub fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    request(Method::GET, uri)
}

pub fn put(uri: &str, content: &str) -> Request<Body> {
    Request::builder()
        .method(Method::PUT)
        .uri(uri)
        .body(Body::from(content.to_string()))
        .unwrap()
}

/// POST a multipart body with one part per `(filename, content)`.
pub fn multipart(uri: &str, files: &[(&str, &str)]) -> Request<Body> {
    let mut body = String::new();
    for (filename, content) in files {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), 16 * 1024 * 1024)
        .await
        .unwrap()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Names of a JSON listing, in order.
pub fn listing_names(listing: &Value) -> Vec<String> {
    listing
        .as_array()
        .unwrap()
        .iter()
        .map(|entry| entry["name"].as_str().unwrap().to_string())
        .collect()
}
