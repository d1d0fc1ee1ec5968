//! Audit logging for token lifecycle events.
//!
//! Every event is emitted via `tracing` with a JSON blob in the `audit` field,
//! so the trail is queryable by any log aggregator. Events never carry the
//! token value or the upstream secret.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `token.issued` | A new proxy token was added to the store |
//! | `token.revoked` | A revocation request was processed (found or not) |
//! | `token.rejected` | A proxied request failed authentication |
//! | `token.reaped` | The periodic sweep ran |

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::store::{Identity, TokenRecord};

/// Why a proxied request failed authentication. Logged only, never returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Neither auth header carried a value
    Missing,
    /// Token lacks the issuing prefix
    Malformed,
    /// Unknown, expired or revoked
    NotLive,
}

/// Structured audit event emitted for every token lifecycle transition.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g., `"token.issued"`).
    pub event: &'static str,
    /// Identity associated with the event, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
    /// Scope of the affected token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Expiry of the affected token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Rejection category (for `token.rejected`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// Request path (for `token.rejected`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Records removed (for `token.reaped`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<usize>,
    /// Records remaining (for `token.reaped`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<usize>,
}

impl AuditEvent {
    fn empty(event: &'static str) -> Self {
        Self {
            event,
            identity: None,
            scope: None,
            expires_at: None,
            reason: None,
            path: None,
            removed: None,
            remaining: None,
        }
    }

    /// Construct a `token.issued` event.
    #[must_use]
    pub fn issued(record: &TokenRecord) -> Self {
        Self {
            identity: Some(record.identity.clone()),
            scope: Some(record.scope.clone()),
            expires_at: Some(record.expires_at),
            ..Self::empty("token.issued")
        }
    }

    /// Construct a `token.revoked` event. `record` is `None` when the token
    /// was already gone.
    #[must_use]
    pub fn revoked(record: Option<&TokenRecord>) -> Self {
        Self {
            identity: record.map(|r| r.identity.clone()),
            scope: record.map(|r| r.scope.clone()),
            ..Self::empty("token.revoked")
        }
    }

    /// Construct a `token.rejected` event.
    #[must_use]
    pub fn rejected(reason: RejectReason, path: &str) -> Self {
        Self {
            reason: Some(reason),
            path: Some(path.to_string()),
            ..Self::empty("token.rejected")
        }
    }

    /// Construct a `token.reaped` event.
    #[must_use]
    pub fn reaped(removed: usize, remaining: usize) -> Self {
        Self {
            removed: Some(removed),
            remaining: Some(remaining),
            ..Self::empty("token.reaped")
        }
    }
}

/// Emit an audit event with structured fields.
///
/// ```text
/// INFO credproxy::broker::audit audit={"event":"token.issued","identity":...}
/// ```
///
/// Sweeps that removed nothing are logged at debug to keep the trail quiet.
pub fn emit(event: &AuditEvent) {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(ref e) => {
            tracing::warn!(error = %e, "Failed to serialize audit event");
            return;
        }
    };
    if event.removed == Some(0) {
        tracing::debug!(audit = %json, "token audit");
    } else {
        tracing::info!(audit = %json, "token audit");
    }
}
