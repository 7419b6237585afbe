//! Remote Copy
//!
//! Copies a single file to or from a remote server, like `cp` across machines.
//!
//! ## Features
//! - Chunked upload and download with byte-exact size verification
//! - Plain TCP or TLS, with an in-memory self-signed certificate when none is
//!   configured (encryption without server authentication, see [`tls`])
//! - Remote liveness check and remote shutdown
//!
//! ## Usage
//!
//! ```bash
//! # Start server
//! rcp --server --tls
//!
//! # Upload a file
//! rcp --tls --insecure myfile.txt server:/tmp/myfile.txt
//!
//! # Download a file
//! rcp --tls --insecure server:/tmp/myfile.txt local_copy.txt
//!
//! # Stop the server
//! rcp --tls --insecure --kill -h server
//! ```

pub mod client;
pub mod config;
pub mod control;
pub mod download;
pub mod error;
pub mod listener;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod stream;
pub mod tls;
pub mod upload;

pub use client::Client;
pub use config::{ClientOptions, LogLevel, ServerOptions};
pub use error::TransferError;
pub use server::Server;
pub use tls::{ClientTlsConfig, ServerTlsConfig};
