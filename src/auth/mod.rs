//! Request authentication.
//!
//! Every API call carries the service pre-shared key and names the pipeline
//! owner it acts for. PSK comparison is constant-time.

use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::errors::{AppError, AppErrorWithRevision};
use crate::models::Owner;

/// Header name for the API key.
pub const API_KEY_HEADER: &str = "x-api-key";
/// Header naming the acting user.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional header naming the user's organization.
pub const ORGANIZATION_ID_HEADER: &str = "x-organization-id";

/// PSK authentication layer function that takes the expected PSK as a parameter.
pub async fn psk_auth_layer(
    expected_psk: Option<String>,
    request: Request,
    next: Next,
) -> Response {
    // No PSK configured: dev mode
    let Some(expected) = expected_psk else {
        return next.run(request).await;
    };

    let headers = request.headers();
    let provided = headers
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.strip_prefix("Bearer "))
        });

    match provided {
        Some(key) if constant_time_compare(key, &expected) => next.run(request).await,
        Some(_) => unauthorized("Invalid API key"),
        None => unauthorized("Missing or invalid API key"),
    }
}

/// Resolve the acting [`Owner`] from the request headers and attach it as a
/// request extension.
pub async fn owner_layer(mut request: Request, next: Next) -> Response {
    match owner_from_headers(request.headers()) {
        Some(owner) => {
            request.extensions_mut().insert(owner);
            next.run(request).await
        }
        None => unauthorized("Missing x-user-id header"),
    }
}

fn owner_from_headers(headers: &HeaderMap) -> Option<Owner> {
    let value = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let user_id = value(USER_ID_HEADER)?;
    Some(Owner::new(user_id, value(ORGANIZATION_ID_HEADER)))
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn unauthorized(message: &str) -> Response {
    AppErrorWithRevision {
        error: AppError::Unauthorized(message.to_string()),
        revision_id: 0,
    }
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("test-key-123", "test-key-123"));
        assert!(!constant_time_compare("test-key-123", "test-key-124"));
        assert!(!constant_time_compare("short", "much-longer-key"));
        assert!(constant_time_compare("", ""));
    }

    #[test]
    fn test_owner_from_headers() {
        let mut headers = HeaderMap::new();
        assert!(owner_from_headers(&headers).is_none());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert!(owner_from_headers(&headers).is_none());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("u1"));
        assert_eq!(owner_from_headers(&headers), Some(Owner::new("u1", None)));

        headers.insert(ORGANIZATION_ID_HEADER, HeaderValue::from_static("org-9"));
        let owner = owner_from_headers(&headers).unwrap();
        assert_eq!(owner.scope(), "org-9");
    }
}
