//! Server lifecycle core: plaintext and TLS listeners driven by an SSL policy, on-demand ACME
//! certificates and the HTTP to HTTPS redirect router.

#[macro_use]
mod log_macros;

pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod tls;

pub use config::{Config, Settings, SslMode, SslPolicy};
pub use error::{ConfigError, ServerError};
pub use logging::Logger;
pub use server::{Server, ServerState};
