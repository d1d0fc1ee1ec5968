//! Credential broker: proxy-local token issuance and revocation.
//!
//! The broker mints opaque proxy tokens in place of the real upstream key:
//!
//! 1. **Issuance**: given a TTL, an identity and a scope, generate a token,
//!    store its [`TokenRecord`] and return the token with its expiry.
//!
//! 2. **Authentication**: the proxy calls [`CredentialBroker::authenticate`]
//!    for every forwarded request. Unknown, malformed and expired tokens are
//!    indistinguishable to the caller.
//!
//! 3. **Revocation**: [`CredentialBroker::revoke`] removes a token. It is
//!    idempotent and never fails.
//!
//! 4. **Audit**: every lifecycle event is emitted through [`audit`].
//!
//! # Architecture
//!
//! ```text
//! issue(ttl, identity, scope) -> TokenStore.add
//! request -> extract token -> authenticate -> TokenStore.get -> forward
//! revoke(token)               -> TokenStore.remove
//! Reaper (every 60s)          -> TokenStore.cleanup
//! ```

pub mod audit;
pub mod handler;
pub mod store;
pub mod token;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;

use crate::config::{Config, TokenConfig};
use crate::secret::UpstreamSecret;
use crate::{Error, Result};

pub use audit::{AuditEvent, RejectReason};
pub use store::{Identity, Reaper, TokenRecord, TokenStore, spawn_reaper};

/// Plugin name reported by `info`.
pub const PLUGIN_NAME: &str = "anthropic";

/// Bare scope granting full API access.
pub const SCOPE_ROOT: &str = "anthropic";

/// Scope prefix for narrower grants (`anthropic:claude`, ...).
pub const SCOPE_PREFIX: &str = "anthropic:";

/// Static description of this broker.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    /// Plugin name
    pub name: &'static str,
    /// Crate version
    pub version: &'static str,
    /// One-line description
    pub description: &'static str,
}

/// A scope pattern the broker understands.
#[derive(Debug, Clone, Serialize)]
pub struct ScopeSpec {
    /// Pattern string
    pub pattern: &'static str,
    /// What the scope grants
    pub description: &'static str,
    /// Example scope strings
    pub examples: &'static [&'static str],
}

/// TTL bounds enforced at issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Constraints {
    /// Shortest TTL
    #[serde(with = "humantime_serde")]
    pub min_ttl: Duration,
    /// Longest TTL
    #[serde(with = "humantime_serde")]
    pub max_ttl: Duration,
}

impl Constraints {
    /// Clamp a requested TTL into `[min_ttl, max_ttl]`.
    ///
    /// # Errors
    ///
    /// A zero TTL is a caller defect and is rejected rather than clamped.
    pub fn clamp(&self, ttl: Duration) -> Result<Duration> {
        if ttl.is_zero() {
            return Err(Error::InvalidTtl("ttl must be positive".to_string()));
        }
        Ok(ttl.clamp(self.min_ttl, self.max_ttl))
    }
}

/// Input to [`CredentialBroker::issue`].
#[derive(Debug, Clone)]
pub struct CredentialRequest {
    /// Requested lifetime (clamped to the broker's [`Constraints`])
    pub ttl: Duration,
    /// Requesting identity
    pub identity: Identity,
    /// Requested scope
    pub scope: String,
}

/// Output of [`CredentialBroker::issue`].
#[derive(Debug, Clone, Serialize)]
pub struct IssuedCredential {
    /// The opaque proxy token; also the revocation handle
    pub token: String,
    /// Absolute expiry
    pub expires_at: DateTime<Utc>,
    /// Effective TTL after clamping
    #[serde(skip)]
    pub ttl: Duration,
}

/// Proxy-local credential broker.
///
/// Owns the [`TokenStore`] and the real [`UpstreamSecret`]; the proxy only
/// reaches either through this type.
#[derive(Debug)]
pub struct CredentialBroker {
    store: Arc<TokenStore>,
    secret: UpstreamSecret,
    prefix: String,
    default_ttl: Duration,
    constraints: Constraints,
}

impl CredentialBroker {
    /// Create a broker with an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the TTL bounds are inconsistent.
    pub fn new(tokens: &TokenConfig, secret: UpstreamSecret) -> Result<Self> {
        if tokens.min_ttl.is_zero() || tokens.max_ttl <= tokens.min_ttl {
            return Err(Error::Config(
                "token TTL bounds require 0 < min_ttl < max_ttl".to_string(),
            ));
        }
        if tokens.prefix.is_empty() {
            return Err(Error::Config("token prefix must not be empty".to_string()));
        }
        Ok(Self {
            store: Arc::new(TokenStore::new()),
            secret,
            prefix: tokens.prefix.clone(),
            default_ttl: tokens.default_ttl,
            constraints: Constraints {
                min_ttl: tokens.min_ttl,
                max_ttl: tokens.max_ttl,
            },
        })
    }

    /// Create a broker from the full configuration, resolving the upstream
    /// secret.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when no usable secret is configured.
    pub fn from_config(config: &Config) -> Result<Self> {
        let secret = UpstreamSecret::resolve(&config.upstream.api_key)?;
        Self::new(&config.tokens, secret)
    }

    /// Static plugin description.
    #[must_use]
    pub fn info() -> PluginInfo {
        PluginInfo {
            name: PLUGIN_NAME,
            version: env!("CARGO_PKG_VERSION"),
            description: "Anthropic API access via credential proxy",
        }
    }

    /// Supported scope patterns.
    #[must_use]
    pub fn scopes() -> Vec<ScopeSpec> {
        vec![
            ScopeSpec {
                pattern: SCOPE_ROOT,
                description: "Full access to the Anthropic API",
                examples: &["anthropic"],
            },
            ScopeSpec {
                pattern: "anthropic:claude",
                description: "Access to Claude models",
                examples: &["anthropic:claude"],
            },
        ]
    }

    /// Case-sensitive match: `anthropic` or `anthropic:<something>`.
    #[must_use]
    pub fn match_scope(scope: &str) -> bool {
        scope == SCOPE_ROOT
            || scope
                .strip_prefix(SCOPE_PREFIX)
                .is_some_and(|rest| !rest.is_empty())
    }

    /// TTL bounds.
    #[must_use]
    pub fn constraints(&self) -> Constraints {
        self.constraints
    }

    /// TTL used when the caller does not ask for one.
    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Token prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Shared handle to the token store (for the reaper).
    #[must_use]
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// The real upstream key.
    #[must_use]
    pub fn secret(&self) -> &UpstreamSecret {
        &self.secret
    }

    /// Mint a token and insert its record before returning.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidTtl`] for a zero TTL, [`Error::InvalidScope`] for a
    /// scope this broker does not serve.
    pub fn issue(&self, request: CredentialRequest) -> Result<IssuedCredential> {
        if !Self::match_scope(&request.scope) {
            return Err(Error::InvalidScope(format!(
                "unsupported scope '{}'",
                request.scope
            )));
        }
        let ttl = self.constraints.clamp(request.ttl)?;
        let delta = TimeDelta::from_std(ttl)
            .map_err(|e| Error::InvalidTtl(format!("ttl out of range: {e}")))?;

        let created_at = Utc::now();
        let record = TokenRecord {
            identity: request.identity,
            scope: request.scope,
            created_at,
            expires_at: created_at + delta,
        };
        let token = token::generate(&self.prefix);
        let expires_at = record.expires_at;

        audit::emit(&AuditEvent::issued(&record));
        self.store.add(token.clone(), record);

        Ok(IssuedCredential {
            token,
            expires_at,
            ttl,
        })
    }

    /// Revoke a token. Always succeeds, including for unknown tokens and
    /// repeated calls.
    pub fn revoke(&self, token: &str) {
        let removed = self.store.remove(token);
        audit::emit(&AuditEvent::revoked(removed.as_ref()));
    }

    /// Resolve a presented token to its live record.
    ///
    /// # Errors
    ///
    /// The [`RejectReason`] is for logging only; callers must answer every
    /// variant with the same response.
    pub fn authenticate(&self, token: &str) -> std::result::Result<TokenRecord, RejectReason> {
        if token.is_empty() {
            return Err(RejectReason::Missing);
        }
        if !token::has_valid_shape(token, &self.prefix) {
            return Err(RejectReason::Malformed);
        }
        self.store.get(token).ok_or(RejectReason::NotLive)
    }
}
