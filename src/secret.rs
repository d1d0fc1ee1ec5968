//! The real upstream credential.
//!
//! [`UpstreamSecret`] wraps the API key the proxy injects into forwarded
//! requests. Its `Debug` and `Display` output is redacted so it cannot end up
//! in logs or error bodies by accident.

use std::{env, fmt};

use axum::http::HeaderValue;

use crate::{Error, Result};

/// The single real upstream API key. Read-only once constructed.
#[derive(Clone)]
pub struct UpstreamSecret(String);

impl UpstreamSecret {
    /// Wrap a secret value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the value is empty or cannot be sent as an
    /// HTTP header value.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::Config("upstream api_key is required".to_string()));
        }
        if HeaderValue::from_str(trimmed).is_err() {
            return Err(Error::Config(
                "upstream api_key contains characters not allowed in a header".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Resolve a configured reference: a literal value or `env:VAR_NAME`.
    ///
    /// An unset variable resolves to an empty value, which is rejected.
    pub fn resolve(reference: &str) -> Result<Self> {
        if let Some(var_name) = reference.strip_prefix("env:") {
            let value = env::var(var_name).map_err(|_| {
                Error::Config(format!("environment variable {var_name} is not set"))
            })?;
            Self::new(value)
        } else {
            Self::new(reference)
        }
    }

    /// The secret as a sensitive header value.
    #[must_use]
    pub fn header_value(&self) -> HeaderValue {
        // Validated in `new`.
        let mut value = HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static(""));
        value.set_sensitive(true);
        value
    }
}

impl fmt::Debug for UpstreamSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UpstreamSecret(***)")
    }
}

impl fmt::Display for UpstreamSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
