//! Wagate - Multi-Session WhatsApp Pairing Gateway
//!
//! An HTTP API that links WhatsApp accounts by pairing code and runs one
//! protocol session per linked account. The wire protocol itself lives in an
//! external library behind the `transport` seam; this crate owns the part
//! with actual design content: the multi-session lifecycle — creation,
//! tracking, reconnection with a bounded retry budget, admission control,
//! and crash-safe persisted status that an HTTP poller can always trust.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the gateway on the default port
//! wagate serve
//!
//! # Request a pairing code
//! curl -X POST localhost:3000/api/pair -H 'content-type: application/json' \
//!      -d '{"phoneNumber": "919876543210"}'
//!
//! # Poll the session
//! curl localhost:3000/api/session/<sessionId>
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod session;
pub mod transport;
pub mod utils;

// Re-export commonly used types
pub use error::{GatewayError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
