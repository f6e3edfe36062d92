//! Authentication gate.
//!
//! The mode is chosen once at startup (see [`AuthMode`]) and checked for every
//! protected request before any path is resolved, so a denial never reveals
//! whether the target exists. Supported credentials, per mode:
//! - `basic`: `Authorization: Basic` header
//! - `token`: `token` cookie, set by the login path

use axum::{
    extract::{Path, Query, Request, State},
    http::{HeaderMap, header::COOKIE, header::SET_COOKIE},
    middleware::Next,
    response::{AppendHeaders, IntoResponse, Redirect, Response},
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Basic};
use serde::Deserialize;
use tracing::{debug, info};

use crate::AppState;
use crate::config::{AuthMode, is_cookie_safe};
use crate::error::FileServerError;

/// Cookie carrying the token in `token` mode.
pub const TOKEN_COOKIE: &str = "token";

fn token_from_cookie_header<'a>(cookie_header: &'a str, cookie_name: &str) -> Option<&'a str> {
    cookie_header.split(';').map(str::trim).find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        if name.trim() == cookie_name {
            Some(value.trim())
        } else {
            None
        }
    })
}

/// Compare secrets without stopping at the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check the request headers against the configured mode.
pub fn authorize(mode: &AuthMode, headers: &HeaderMap, realm: &str) -> Result<(), FileServerError> {
    match mode {
        AuthMode::None => Ok(()),
        AuthMode::Basic { username, password } => {
            let valid = headers
                .typed_get::<Authorization<Basic>>()
                .is_some_and(|Authorization(basic)| {
                    // Evaluate both so timing does not reveal which one failed.
                    let user_ok =
                        constant_time_eq(basic.username().as_bytes(), username.as_bytes());
                    let pass_ok =
                        constant_time_eq(basic.password().as_bytes(), password.as_bytes());
                    user_ok & pass_ok
                });

            if valid {
                Ok(())
            } else {
                let realm = realm.replace(['"', '\\'], "");
                Err(FileServerError::Unauthorized {
                    challenge: Some(format!("Basic realm=\"{}\", charset=\"UTF-8\"", realm)),
                })
            }
        }
        AuthMode::Token { token } => {
            let presented = headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .find_map(|cookie_header| token_from_cookie_header(cookie_header, TOKEN_COOKIE));

            match presented {
                Some(value) if constant_time_eq(value.as_bytes(), token.as_bytes()) => Ok(()),
                _ => Err(FileServerError::Unauthorized { challenge: None }),
            }
        }
    }
}

/// Authentication middleware for every protected route.
pub async fn auth_gate(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, FileServerError> {
    if let Err(err) = authorize(&state.config.auth, req.headers(), &state.config.title) {
        debug!(
            "Denied {} {} ({} auth)",
            req.method(),
            req.uri().path(),
            state.config.auth.name()
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

/// Query parameters for the login endpoint
#[derive(Debug, Deserialize)]
pub struct LoginQuery {
    /// Where to go after the cookie is set (must be a local path under the prefix)
    pub next: Option<String>,
}

/// GET <prefix>/-/login/{token} - Store the token cookie and redirect
///
/// The token is not checked here; the gate validates it on the next request.
pub async fn login(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Query(query): Query<LoginQuery>,
) -> Result<Response, FileServerError> {
    if !is_cookie_safe(&token) {
        return Err(FileServerError::BadRequest(
            "token contains characters not allowed in a cookie".to_string(),
        ));
    }

    let prefix = &state.prefix;
    let target = query
        .next
        .filter(|next| prefix.is_local_target(next))
        .unwrap_or_else(|| prefix.app_root());
    let cookie_path = if prefix.is_empty() {
        "/"
    } else {
        prefix.as_str()
    };

    let cookie = format!(
        "{}={}; Path={}; HttpOnly; SameSite=Lax",
        TOKEN_COOKIE, token, cookie_path
    );

    info!("Login cookie issued, redirecting to {}", target);

    Ok((
        AppendHeaders([(SET_COOKIE, cookie)]),
        Redirect::temporary(&target),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::AUTHORIZATION;

    fn basic_mode() -> AuthMode {
        AuthMode::Basic {
            username: "admin".to_string(),
            password: "hunter2".to_string(),
        }
    }

    #[test]
    fn test_none_always_passes() {
        assert!(authorize(&AuthMode::None, &HeaderMap::new(), "files").is_ok());
    }

    #[test]
    fn test_basic_auth() {
        let mode = basic_mode();

        let err = authorize(&mode, &HeaderMap::new(), "My \"Files\"").unwrap_err();
        match err {
            FileServerError::Unauthorized { challenge } => {
                assert_eq!(
                    challenge.as_deref(),
                    Some("Basic realm=\"My Files\", charset=\"UTF-8\"")
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let mut headers = HeaderMap::new();
        // admin:hunter2
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_static("Basic YWRtaW46aHVudGVyMg=="),
        );
        assert!(authorize(&mode, &headers, "files").is_ok());

        // admin:wrong
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic YWRtaW46d3Jvbmc="));
        assert!(authorize(&mode, &headers, "files").is_err());

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer hunter2"));
        assert!(authorize(&mode, &headers, "files").is_err());
    }

    #[test]
    fn test_token_auth() {
        let mode = AuthMode::Token {
            token: "s3cret".to_string(),
        };
        assert!(matches!(
            authorize(&mode, &HeaderMap::new(), "files"),
            Err(FileServerError::Unauthorized { challenge: None })
        ));

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; token=s3cret"));
        assert!(authorize(&mode, &headers, "files").is_ok());

        headers.insert(COOKIE, HeaderValue::from_static("token=s3cre"));
        assert!(authorize(&mode, &headers, "files").is_err());

        headers.insert(COOKIE, HeaderValue::from_static("xtoken=s3cret"));
        assert!(authorize(&mode, &headers, "files").is_err());
    }

    #[test]
    fn test_token_from_cookie_header() {
        assert_eq!(
            token_from_cookie_header("a=1; token=abc ; b=2", "token"),
            Some("abc")
        );
        assert_eq!(token_from_cookie_header("a=1", "token"), None);
        assert_eq!(token_from_cookie_header("token", "token"), None);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
