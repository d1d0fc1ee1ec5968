//! Credential Proxy Library
//!
//! Lets untrusted agents call the Anthropic API without ever holding the real
//! API key.
//!
//! # Features
//!
//! - **Token Broker**: short-lived opaque proxy tokens with TTL, revocation
//!   and a background reaper
//! - **Reverse Proxy**: authenticates every request, injects the real key and
//!   forwards to a fixed upstream
//! - **Streaming**: event-stream responses relayed chunk by chunk
//! - **Audit Trail**: structured events for every token lifecycle transition
//!
//! # Flow
//!
//! ```text
//! agent --(crd_ token)--> credproxy --(real x-api-key)--> upstream
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod broker;
pub mod cli;
pub mod config;
pub mod error;
pub mod proxy;
pub mod secret;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` takes precedence over `level`. `format` is `text` (default) or
/// `json`.
///
/// # Errors
///
/// Returns [`Error::Config`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("failed to install tracing subscriber: {e}")))
}
