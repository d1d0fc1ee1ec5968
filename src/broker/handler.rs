//! HTTP handlers for standalone token issuance.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/token` | Mint a proxy token |
//! | `DELETE` | `/token` | Revoke a proxy token (always 204) |
//!
//! Only mounted when `tokens.issuance_enabled` is set, for deployments with
//! no external issuance collaborator.
//!
//! ## Issuance
//!
//! ```json
//! { "agent_name": "ci-runner", "ttl": 600 }
//! ```
//!
//! `ttl` is in seconds and is clamped to the configured maximum; `agent_id`
//! defaults to `agent_name` and `scope` defaults to `anthropic`.
//!
//! ## Admin Authentication
//!
//! When `tokens.admin_token` is configured, both routes require
//! `Authorization: Bearer <admin_token>`.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::{CredentialBroker, CredentialRequest, Identity, SCOPE_ROOT};
use crate::error::error_envelope;

/// Shared state for the issuance routes.
pub struct IssuanceState {
    /// Broker that owns the token store
    pub broker: Arc<CredentialBroker>,
    /// Resolved admin token (if any)
    pub admin_token: Option<String>,
}

/// `POST /token` request body.
#[derive(Debug, Deserialize)]
pub struct IssueTokenRequest {
    /// Display name of the requesting agent.
    pub agent_name: String,
    /// Stable identifier of the agent (defaults to `agent_name`).
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Requested TTL in seconds (defaults to the configured default).
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Requested scope (defaults to `anthropic`).
    #[serde(default)]
    pub scope: Option<String>,
}

/// `POST /token` response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueTokenResponse {
    /// The issued proxy token.
    pub token: String,
    /// Expiry (RFC 3339).
    pub expires_at: DateTime<Utc>,
    /// Effective TTL in seconds after clamping.
    pub ttl: u64,
}

/// `DELETE /token` request body.
#[derive(Debug, Deserialize)]
pub struct RevokeTokenRequest {
    /// Token to revoke.
    pub token: String,
}

/// Build the issuance routes.
pub fn issuance_routes(state: Arc<IssuanceState>) -> Router {
    Router::new()
        .route("/token", post(issue_token).delete(revoke_token))
        .with_state(state)
}

/// `POST /token`: mint a proxy token.
async fn issue_token(
    State(state): State<Arc<IssuanceState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_admin_auth(state.admin_token.as_deref(), &headers) {
        return response;
    }
    let body: IssueTokenRequest = match parse_body(&body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    if body.agent_name.trim().is_empty() {
        return error_envelope(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            "agent_name is required",
        );
    }

    let ttl = body
        .ttl
        .map_or_else(|| state.broker.default_ttl(), Duration::from_secs);
    let agent_id = body.agent_id.unwrap_or_else(|| body.agent_name.clone());
    let request = CredentialRequest {
        ttl,
        identity: Identity::new(agent_id, body.agent_name),
        scope: body.scope.unwrap_or_else(|| SCOPE_ROOT.to_string()),
    };

    match state.broker.issue(request) {
        Ok(cred) => (
            StatusCode::OK,
            Json(IssueTokenResponse {
                token: cred.token,
                expires_at: cred.expires_at,
                ttl: cred.ttl.as_secs(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Token issuance rejected");
            e.into_response()
        }
    }
}

/// `DELETE /token`: revoke a proxy token. Idempotent.
async fn revoke_token(
    State(state): State<Arc<IssuanceState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_admin_auth(state.admin_token.as_deref(), &headers) {
        return response;
    }
    let body: RevokeTokenRequest = match parse_body(&body) {
        Ok(body) => body,
        Err(response) => return response,
    };

    state.broker.revoke(&body.token);
    StatusCode::NO_CONTENT.into_response()
}

/// Parse a JSON body. Only reached after the admin check passes.
#[allow(clippy::result_large_err)]
fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, Response> {
    serde_json::from_slice(body).map_err(|e| {
        error_envelope(
            StatusCode::BAD_REQUEST,
            "invalid_request_error",
            &format!("invalid JSON body: {e}"),
        )
    })
}

/// Check `Authorization: Bearer <token>` against the configured admin token.
/// No configured token means the routes are open.
#[allow(clippy::result_large_err)]
fn check_admin_auth(admin_token: Option<&str>, headers: &HeaderMap) -> Result<(), Response> {
    let Some(admin_token) = admin_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        });

    // Constant-time comparison to prevent timing side-channels
    let matches = provided.is_some_and(|p| p.as_bytes().ct_eq(admin_token.as_bytes()).into());

    if matches {
        Ok(())
    } else {
        Err(error_envelope(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "invalid admin token",
        ))
    }
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::config::TokenConfig;
    use crate::secret::UpstreamSecret;

    fn state(admin_token: Option<&str>) -> Arc<IssuanceState> {
        let secret = UpstreamSecret::new("sk-ant-test").unwrap();
        Arc::new(IssuanceState {
            broker: Arc::new(CredentialBroker::new(&TokenConfig::default(), secret).unwrap()),
            admin_token: admin_token.map(str::to_string),
        })
    }

    fn post_token(body: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/token")
            .header("content-type", "application/json");
        if let Some(auth) = auth {
            builder = builder.header("authorization", auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn read_json<T: serde::de::DeserializeOwned>(response: Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn issue_clamps_ttl_and_stores_token() {
        // GIVEN: open issuance routes
        let state = state(None);
        let app = issuance_routes(Arc::clone(&state));

        // WHEN: a token is requested with a TTL above the maximum
        let response = app
            .oneshot(post_token(r#"{"agent_name":"ci","ttl":172800}"#, None))
            .await
            .unwrap();

        // THEN: it is issued with the clamped TTL and is live in the store
        assert_eq!(response.status(), StatusCode::OK);
        let body: IssueTokenResponse = read_json(response).await;
        assert_eq!(body.ttl, 86_400);
        assert!(body.token.starts_with("crd_"));
        let record = state.broker.authenticate(&body.token).unwrap();
        assert_eq!(record.identity.name, "ci");
        assert_eq!(record.identity.id, "ci");
    }

    #[tokio::test]
    async fn issue_uses_default_ttl() {
        let app = issuance_routes(state(None));
        let response = app
            .oneshot(post_token(r#"{"agent_name":"ci"}"#, None))
            .await
            .unwrap();

        let body: IssueTokenResponse = read_json(response).await;
        assert_eq!(body.ttl, 600);
    }

    #[tokio::test]
    async fn issue_requires_agent_name() {
        let app = issuance_routes(state(None));
        let response = app
            .oneshot(post_token(r#"{"agent_name":"  "}"#, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_token_is_enforced() {
        let state = state(Some("admin-secret"));

        let denied = issuance_routes(Arc::clone(&state))
            .oneshot(post_token(r#"{"agent_name":"ci"}"#, Some("Bearer wrong")))
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let missing = issuance_routes(Arc::clone(&state))
            .oneshot(post_token(r#"{"agent_name":"ci"}"#, None))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let allowed = issuance_routes(state)
            .oneshot(post_token(r#"{"agent_name":"ci"}"#, Some("Bearer admin-secret")))
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_check_runs_before_body_parsing() {
        // GIVEN: admin-guarded routes
        let state = state(Some("admin-secret"));

        // WHEN: an unauthenticated caller sends a body that does not parse
        let issue = Request::builder()
            .method("POST")
            .uri("/token")
            .body(Body::from("not json"))
            .unwrap();
        let issue = issuance_routes(Arc::clone(&state)).oneshot(issue).await.unwrap();
        let revoke = Request::builder()
            .method("DELETE")
            .uri("/token")
            .body(Body::from("{"))
            .unwrap();
        let revoke = issuance_routes(Arc::clone(&state)).oneshot(revoke).await.unwrap();

        // THEN: both are refused as unauthenticated, with no parser detail
        for response in [issue, revoke] {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            let body: serde_json::Value = read_json(response).await;
            assert_eq!(body["error"]["message"], "invalid admin token");
        }
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request_once_authorized() {
        let response = issuance_routes(state(Some("admin-secret")))
            .oneshot(post_token("not json", Some("Bearer admin-secret")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = read_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn revoke_is_always_no_content() {
        // GIVEN: an issued token
        let state = state(None);
        let cred = state
            .broker
            .issue(CredentialRequest {
                ttl: Duration::from_secs(60),
                identity: Identity::new("a", "a"),
                scope: "anthropic".to_string(),
            })
            .unwrap();

        // WHEN: it is revoked twice
        for _ in 0..2 {
            let request = Request::builder()
                .method("DELETE")
                .uri("/token")
                .header("content-type", "application/json")
                .body(Body::from(format!(r#"{{"token":"{}"}}"#, cred.token)))
                .unwrap();
            let response = issuance_routes(Arc::clone(&state)).oneshot(request).await.unwrap();

            // THEN: both succeed
            assert_eq!(response.status(), StatusCode::NO_CONTENT);
        }
        assert!(state.broker.authenticate(&cred.token).is_err());
    }
}
