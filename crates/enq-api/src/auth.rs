//! Bearer API-key authentication. Deliberately minimal: it resolves a
//! tenant id from a hashed API key and stops there. Issuing/rotating keys
//! and validating `JWT_SIGNING_KEY` are identity-management concerns the
//! spec marks out of scope.

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use enq_core::{Broker, Ledger};
use sha2::{Digest, Sha256};

use crate::state::{AppState, TenantId};

/// A failed-auth response carrying the 401 `WWW-Authenticate` challenge
/// contract: `Bearer realm="enq", charset="UTF-8", error="...", error_description="..."`.
struct AuthChallenge {
    error: &'static str,
    description: &'static str,
}

impl AuthChallenge {
    fn new(error: &'static str, description: &'static str) -> Self {
        AuthChallenge { error, description }
    }
}

impl IntoResponse for AuthChallenge {
    fn into_response(self) -> Response {
        let challenge = format!(
            r#"Bearer realm="enq", charset="UTF-8", error="{}", error_description="{}""#,
            self.error, self.description
        );
        let mut response = StatusCode::UNAUTHORIZED.into_response();
        if let Ok(value) = HeaderValue::from_str(&challenge) {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

async fn resolve_tenant<L: Ledger, B: Broker>(
    state: &AppState<L, B>,
    headers: &HeaderMap,
) -> Result<String, AuthChallenge> {
    let Some(header_value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err(AuthChallenge::new(
            "invalid_request",
            "missing Authorization header",
        ));
    };

    let Some(token) = header_value.strip_prefix("Bearer ") else {
        return Err(AuthChallenge::new(
            "invalid_request",
            "expected a Bearer token",
        ));
    };

    if token.is_empty() {
        return Err(AuthChallenge::new("invalid_request", "empty bearer token"));
    }

    match state.ledger.tenant_by_api_key_hash(&hash_api_key(token)).await {
        Ok(Some(tenant_id)) => Ok(tenant_id),
        Ok(None) => Err(AuthChallenge::new("invalid_token", "unknown API key")),
        Err(err) => {
            tracing::warn!(%err, "tenant lookup failed during authentication");
            Err(AuthChallenge::new(
                "invalid_token",
                "could not verify API key",
            ))
        }
    }
}

/// `axum` middleware: resolves the bearer token to a tenant id and injects
/// a [`TenantId`] into request extensions, or short-circuits with a 401
/// carrying the challenge header.
pub async fn require_tenant<L, B>(
    State(state): State<AppState<L, B>>,
    mut request: Request,
    next: Next,
) -> Response
where
    L: Ledger + 'static,
    B: Broker + 'static,
{
    match resolve_tenant(&state, request.headers()).await {
        Ok(tenant_id) => {
            request.extensions_mut().insert(TenantId(tenant_id));
            next.run(request).await
        }
        Err(challenge) => challenge.into_response(),
    }
}
