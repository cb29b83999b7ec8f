//! Basic-auth gate for the admin endpoints. User-facing and VM-facing
//! endpoints are deliberately unauthenticated.

use axum::{
    body::Body as AxumBody,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::sync::Arc;
use tracing::warn;

use crate::web::{AppState, error::AppError};

/// Parses `Authorization: Basic <b64>` into `(user, password)`.
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    let encoded = header_value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request<AxumBody>,
    next: Next,
) -> Result<Response, AppError> {
    let credentials = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(parse_basic_auth);

    match credentials {
        Some((user, password))
            if user == state.config.app.admin_user
                && password == state.config.app.admin_password =>
        {
            Ok(next.run(req).await)
        }
        Some((user, _)) => {
            warn!(user = %user, "Rejected admin request with bad credentials.");
            Err(AppError::Unauthorized("invalid credentials".to_string()))
        }
        None => Err(AppError::Unauthorized(
            "admin credentials required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_basic_header() {
        // admin:secret
        let header = "Basic YWRtaW46c2VjcmV0";
        assert_eq!(
            parse_basic_auth(header),
            Some(("admin".to_string(), "secret".to_string()))
        );
    }

    #[test]
    fn password_may_contain_colons() {
        // admin:a:b
        let encoded = BASE64.encode("admin:a:b");
        let parsed = parse_basic_auth(&format!("Basic {encoded}")).unwrap();
        assert_eq!(parsed, ("admin".to_string(), "a:b".to_string()));
    }

    #[test]
    fn rejects_non_basic_scheme() {
        assert!(parse_basic_auth("Bearer abcdef").is_none());
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(parse_basic_auth("Basic %%%%").is_none());
    }
}
