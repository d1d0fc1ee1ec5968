//! Authenticating reverse proxy.
//!
//! Terminates client connections, swaps the presented proxy token for the
//! real upstream key and relays the upstream response, incrementally for
//! event streams.

pub mod forward;
pub mod router;
pub mod server;
pub mod streaming;

pub use forward::{ProxyState, UpstreamTarget};
pub use router::create_router;
pub use server::{CredentialProxy, shutdown_signal};
