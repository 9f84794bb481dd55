//! Optional header-equality auth gate for the HTTP transports.

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use super::HttpState;
use crate::error::{Error, Result};

/// Requires a configured header to carry an exact value.
///
/// An empty header name disables the gate.
#[derive(Debug, Clone, Default)]
pub struct AuthGate {
    header: String,
    value: String,
}

impl AuthGate {
    pub fn new(header: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            value: value.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.header.is_empty()
    }

    /// Check request headers. Header names match case-insensitively, values
    /// exactly. A missing header reads as an empty value, so an empty
    /// expected value also admits requests without the header.
    pub fn check(&self, headers: &HeaderMap) -> Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        let presented = headers
            .get(self.header.as_str())
            .map(|v| v.as_bytes())
            .unwrap_or_default();

        if presented == self.value.as_bytes() {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }
}

pub async fn require_auth(
    State(state): State<HttpState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Err(e) = state.auth.check(request.headers()) {
        warn!(path = %request.uri().path(), "Rejected request: {}", e);
        state.server.metrics().inc_auth_rejections();
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }

    next.run(request).await
}
