//! Authenticating forward handler.
//!
//! Every request that is not `/health` or an issuance route lands here:
//!
//! ```text
//! extract token (x-api-key, then Authorization: Bearer)
//!   -> authenticate against the token store      (401 on failure)
//!   -> rebuild headers, inject the real key      (500 on failure)
//!   -> read the body within upstream.timeout     (408 on stall)
//!   -> single upstream attempt                   (502 on transport failure)
//!   -> relay status, headers and body (streamed for event-streams)
//! ```
//!
//! Authentication always completes before any upstream contact.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Request, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tracing::{debug, info, warn};

use super::streaming;
use crate::broker::{AuditEvent, CredentialBroker, RejectReason, audit};
use crate::config::UpstreamConfig;
use crate::error::error_envelope;
use crate::secret::UpstreamSecret;
use crate::{Error, Result};

/// Header the upstream API reads its key from.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");

/// Protocol version header the upstream requires.
pub const VERSION_HEADER: HeaderName = HeaderName::from_static("anthropic-version");

/// Headers meaningful to a single transport leg only.
pub const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Where and how requests are forwarded.
#[derive(Debug, Clone)]
pub struct UpstreamTarget {
    /// Origin without a trailing slash
    pub base_url: String,
    /// Default protocol version header value
    pub api_version: HeaderValue,
    /// Read size for the event-stream relay
    pub stream_chunk_size: usize,
    /// Largest inbound body accepted (bytes)
    pub max_body_size: usize,
    /// Bound on reading the inbound body
    pub body_read_timeout: Duration,
}

impl UpstreamTarget {
    /// Build from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the version is not a valid header value.
    pub fn from_config(config: &UpstreamConfig, max_body_size: usize) -> Result<Self> {
        let api_version = HeaderValue::from_str(&config.api_version)
            .map_err(|e| Error::Config(format!("invalid upstream.api_version: {e}")))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_version,
            stream_chunk_size: config.stream_chunk_size,
            max_body_size,
            body_read_timeout: config.timeout,
        })
    }

    /// Upstream URL preserving the inbound path and query exactly.
    #[must_use]
    pub fn url_for(&self, uri: &Uri) -> String {
        let path_and_query = uri.path_and_query().map_or("/", |pq| pq.as_str());
        format!("{}{path_and_query}", self.base_url)
    }
}

/// Shared state for the forward handler.
pub struct ProxyState {
    /// Token authority and holder of the real key
    pub broker: Arc<CredentialBroker>,
    /// Upstream HTTP client (long timeout, no redirects)
    pub client: reqwest::Client,
    /// Upstream target
    pub upstream: UpstreamTarget,
}

/// Pull the presented token from `x-api-key`, falling back to
/// `Authorization: Bearer`.
#[must_use]
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let from_api_key = headers
        .get(&API_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    from_api_key.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.strip_prefix("Bearer ")
                    .or_else(|| v.strip_prefix("bearer "))
            })
            .map(str::trim)
            .filter(|v| !v.is_empty())
    })
}

/// Returns `true` for hop-by-hop headers.
#[must_use]
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP_HEADERS.contains(&name.as_str())
}

/// Header names listed in the `Connection` header are hop-by-hop too.
fn connection_listed(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Copy `source` minus hop-by-hop headers and anything in `also_skip`.
fn filtered_headers(source: &HeaderMap, also_skip: &[HeaderName]) -> HeaderMap {
    let listed = connection_listed(source);
    let mut out = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if is_hop_by_hop(name)
            || also_skip.contains(name)
            || listed.iter().any(|l| l == name.as_str())
        {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers for the upstream request: inbound headers minus hop-by-hop, auth
/// and host headers, with the real key injected and a default version header
/// when the caller sent none.
#[must_use]
pub fn upstream_request_headers(
    inbound: &HeaderMap,
    secret: &UpstreamSecret,
    default_version: &HeaderValue,
) -> HeaderMap {
    let mut headers = filtered_headers(
        inbound,
        &[
            API_KEY_HEADER,
            header::AUTHORIZATION,
            header::HOST,
            // recomputed by the client from the buffered body
            header::CONTENT_LENGTH,
        ],
    );
    headers.insert(API_KEY_HEADER, secret.header_value());
    if !headers.contains_key(&VERSION_HEADER) {
        headers.insert(VERSION_HEADER, default_version.clone());
    }
    headers
}

/// Headers for the outbound response: upstream headers minus hop-by-hop.
#[must_use]
pub fn response_headers(upstream: &HeaderMap) -> HeaderMap {
    filtered_headers(upstream, &[])
}

/// Fallback handler: authenticate, forward, relay.
pub async fn forward(State(state): State<Arc<ProxyState>>, request: Request<Body>) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let presented = extract_token(request.headers()).unwrap_or_default();
    let record = match state.broker.authenticate(presented) {
        Ok(record) => record,
        Err(reason) => {
            audit::emit(&AuditEvent::rejected(reason, &path));
            let response = unauthorized(reason);
            info!(agent = "-", method = %method, path = %path, status = response.status().as_u16(), "proxy request");
            return response;
        }
    };

    let response = send_upstream(&state, request)
        .await
        .unwrap_or_else(IntoResponse::into_response);

    info!(
        agent = %record.identity.name,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        "proxy request"
    );
    response
}

/// 401 with a body that only distinguishes "no token at all".
fn unauthorized(reason: RejectReason) -> Response {
    match reason {
        RejectReason::Missing => error_envelope(
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "missing api key",
        ),
        RejectReason::Malformed | RejectReason::NotLive => Error::invalid_token().into_response(),
    }
}

/// Build and send the upstream request, then shape the response.
async fn send_upstream(state: &ProxyState, request: Request<Body>) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let url = state.upstream.url_for(&parts.uri);
    let headers = upstream_request_headers(
        &parts.headers,
        state.broker.secret(),
        &state.upstream.api_version,
    );

    let read = tokio::time::timeout(
        state.upstream.body_read_timeout,
        to_bytes(body, state.upstream.max_body_size),
    )
    .await;
    let body = match read {
        Ok(Ok(bytes)) => bytes,
        Err(_) => {
            warn!(timeout = ?state.upstream.body_read_timeout, "Timed out reading request body");
            return Ok(error_envelope(
                StatusCode::REQUEST_TIMEOUT,
                "invalid_request_error",
                "timed out reading request body",
            ));
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to read request body");
            return Ok(error_envelope(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "failed to read request body",
            ));
        }
    };

    let upstream_request = state
        .client
        .request(parts.method, &url)
        .headers(headers)
        .body(body)
        .build()
        .map_err(|e| Error::Internal(format!("failed to build upstream request: {e}")))?;

    debug!(url = %url, "Forwarding request upstream");
    let upstream_response = state.client.execute(upstream_request).await.map_err(|e| {
        warn!(error = %e, "Upstream request failed");
        Error::UpstreamUnavailable(e.without_url().to_string())
    })?;

    relay_response(upstream_response, state.upstream.stream_chunk_size)
}

/// Turn the upstream response into the outbound one.
fn relay_response(upstream: reqwest::Response, chunk_size: usize) -> Result<Response> {
    let status = upstream.status();
    let mut headers = response_headers(upstream.headers());

    let body = if streaming::is_event_stream(upstream.headers()) {
        streaming::apply_stream_headers(&mut headers);
        streaming::relay(upstream, chunk_size)
    } else {
        Body::from_stream(upstream.bytes_stream())
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn secret() -> UpstreamSecret {
        UpstreamSecret::new("sk-ant-real").unwrap()
    }

    fn version() -> HeaderValue {
        HeaderValue::from_static("2023-06-01")
    }

    #[test]
    fn extract_prefers_api_key_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("crd_primary"));
        headers.insert("authorization", HeaderValue::from_static("Bearer crd_fallback"));
        assert_eq!(extract_token(&headers), Some("crd_primary"));
    }

    #[test]
    fn extract_falls_back_to_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer crd_fallback"));
        assert_eq!(extract_token(&headers), Some("crd_fallback"));

        // empty api key header does not shadow the bearer
        headers.insert("x-api-key", HeaderValue::from_static(""));
        assert_eq!(extract_token(&headers), Some("crd_fallback"));
    }

    #[test]
    fn extract_returns_none_without_credentials() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(extract_token(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token(&headers), None);
    }

    #[test]
    fn upstream_headers_strip_hop_by_hop_and_auth() {
        // GIVEN: inbound headers with auth, host and hop-by-hop entries
        let mut inbound = HeaderMap::new();
        inbound.insert("x-api-key", HeaderValue::from_static("crd_inbound"));
        inbound.insert("authorization", HeaderValue::from_static("Bearer crd_inbound"));
        inbound.insert("host", HeaderValue::from_static("localhost:8401"));
        inbound.insert("connection", HeaderValue::from_static("keep-alive, x-custom-hop"));
        inbound.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        inbound.insert("te", HeaderValue::from_static("trailers"));
        inbound.insert("upgrade", HeaderValue::from_static("h2c"));
        inbound.insert("proxy-authorization", HeaderValue::from_static("Basic abc"));
        inbound.insert("x-custom-hop", HeaderValue::from_static("drop me"));
        inbound.insert("content-type", HeaderValue::from_static("application/json"));
        inbound.insert("anthropic-beta", HeaderValue::from_static("messages-2023-12-15"));

        // WHEN: upstream headers are built
        let out = upstream_request_headers(&inbound, &secret(), &version());

        // THEN: only end-to-end headers survive, with the real key injected
        assert_eq!(out.get("x-api-key").unwrap(), "sk-ant-real");
        assert_eq!(out.get("content-type").unwrap(), "application/json");
        assert_eq!(out.get("anthropic-beta").unwrap(), "messages-2023-12-15");
        assert_eq!(out.get("anthropic-version").unwrap(), "2023-06-01");
        for name in [
            "authorization",
            "host",
            "connection",
            "keep-alive",
            "te",
            "upgrade",
            "proxy-authorization",
            "x-custom-hop",
        ] {
            assert!(!out.contains_key(name), "{name} should be stripped");
        }
    }

    #[test]
    fn caller_version_header_is_kept() {
        let mut inbound = HeaderMap::new();
        inbound.insert("anthropic-version", HeaderValue::from_static("2024-01-01"));
        let out = upstream_request_headers(&inbound, &secret(), &version());
        assert_eq!(out.get("anthropic-version").unwrap(), "2024-01-01");
    }

    #[test]
    fn repeated_headers_are_preserved() {
        let mut inbound = HeaderMap::new();
        inbound.append("x-trace", HeaderValue::from_static("a"));
        inbound.append("x-trace", HeaderValue::from_static("b"));
        let out = upstream_request_headers(&inbound, &secret(), &version());
        let values: Vec<_> = out.get_all("x-trace").iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn response_headers_drop_transfer_encoding() {
        let mut upstream = HeaderMap::new();
        upstream.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        upstream.insert("content-type", HeaderValue::from_static("application/json"));
        upstream.insert("request-id", HeaderValue::from_static("req_123"));

        let out = response_headers(&upstream);

        assert!(!out.contains_key("transfer-encoding"));
        assert_eq!(out.get("request-id").unwrap(), "req_123");
    }

    #[test]
    fn url_preserves_path_and_query() {
        let target = UpstreamTarget {
            base_url: "https://api.example.com".to_string(),
            api_version: version(),
            stream_chunk_size: 4096,
            max_body_size: 1024,
            body_read_timeout: Duration::from_secs(1),
        };
        let uri: Uri = "/v1/messages?beta=true&x=%20y".parse().unwrap();
        assert_eq!(target.url_for(&uri), "https://api.example.com/v1/messages?beta=true&x=%20y");

        let bare: Uri = "/v1/models".parse().unwrap();
        assert_eq!(target.url_for(&bare), "https://api.example.com/v1/models");
    }

    #[test]
    fn target_trims_trailing_slash() {
        let config = UpstreamConfig {
            base_url: "http://127.0.0.1:9000/".to_string(),
            ..UpstreamConfig::default()
        };
        let target = UpstreamTarget::from_config(&config, 1024).unwrap();
        assert_eq!(target.base_url, "http://127.0.0.1:9000");
        assert_eq!(target.body_read_timeout, config.timeout);
    }
}
