//! Server and client options.
//!
//! The CLI fills these once at start-up; nothing here is mutated afterwards.
//! Verbosity travels as a [`LogLevel`] value rather than a global switch.

use std::path::PathBuf;
use std::time::Duration;

use tracing::Level;

use crate::error::TransferError;
use crate::protocol::{chunk_frame_len, DEFAULT_BUFFER_SIZE, MAX_MESSAGE_SIZE};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 8022;

/// Delay between answering `Shutdown` and exiting the process.
pub const DEFAULT_SHUTDOWN_DELAY: Duration = Duration::from_secs(1);

/// Verbosity selected on the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Quiet,
    #[default]
    Normal,
    Debug,
}

impl LogLevel {
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            LogLevel::Quiet
        } else if debug {
            LogLevel::Debug
        } else {
            LogLevel::Normal
        }
    }

    pub fn as_level(self) -> Level {
        match self {
            LogLevel::Quiet => Level::WARN,
            LogLevel::Normal => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host or address to listen on
    pub listen: String,
    pub port: u16,
    /// Wrap the listener in TLS
    pub tls: bool,
    /// PEM certificate chain; a self-signed certificate is generated when absent
    pub cert_file: Option<PathBuf>,
    /// PEM private key matching `cert_file`
    pub key_file: Option<PathBuf>,
    /// Chunk buffer capacity for downloads
    pub buffer_size: usize,
    pub shutdown_delay: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            listen: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: false,
            cert_file: None,
            key_file: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            shutdown_delay: DEFAULT_SHUTDOWN_DELAY,
        }
    }
}

impl ServerOptions {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.listen, self.port)
    }

    /// Certificate/key pair to load, if both are configured.
    pub fn cert_pair(&self) -> Option<(PathBuf, PathBuf)> {
        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            _ => None,
        }
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        validate_buffer_size(self.buffer_size)?;
        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(TransferError::CertificateLoad(
                "certificate and key must be given together".into(),
            ));
        }
        Ok(())
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// CA certificate used to verify the server
    pub ca_file: Option<PathBuf>,
    /// Skip server certificate verification
    pub insecure: bool,
    /// Name used for SNI and verification; defaults to `host`
    pub server_name: Option<String>,
    /// Chunk size for uploads
    pub buffer_size: usize,
    /// Suppress progress bars
    pub quiet: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: false,
            ca_file: None,
            insecure: false,
            server_name: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
            quiet: false,
        }
    }
}

impl ClientOptions {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn server_name(&self) -> &str {
        self.server_name.as_deref().unwrap_or(&self.host)
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        validate_buffer_size(self.buffer_size)
    }
}

fn validate_buffer_size(buffer_size: usize) -> Result<(), TransferError> {
    if buffer_size == 0 {
        return Err(TransferError::Protocol("buffer size must be positive".into()));
    }
    if chunk_frame_len(buffer_size) > MAX_MESSAGE_SIZE {
        return Err(TransferError::Protocol(format!(
            "buffer size {buffer_size} does not fit in a {MAX_MESSAGE_SIZE} byte frame"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_cli() {
        let opts = ServerOptions::default();
        assert_eq!(opts.addr(), "localhost:8022");
        assert_eq!(opts.buffer_size, 1024 * 1024);
        assert!(!opts.tls);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn log_level_flags() {
        assert_eq!(LogLevel::from_flags(true, true), LogLevel::Quiet);
        assert_eq!(LogLevel::from_flags(false, true).as_level(), Level::DEBUG);
        assert_eq!(LogLevel::from_flags(false, false).as_level(), Level::INFO);
    }

    #[test]
    fn rejects_unusable_buffer_sizes() {
        let mut opts = ServerOptions {
            buffer_size: 0,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        opts.buffer_size = 16 * 1024 * 1024;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn cert_without_key_is_rejected() {
        let opts = ServerOptions {
            cert_file: Some("cert.pem".into()),
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(TransferError::CertificateLoad(_))
        ));
        assert!(opts.cert_pair().is_none());
    }

    #[test]
    fn server_name_defaults_to_host() {
        let mut opts = ClientOptions {
            host: "files.example".into(),
            ..Default::default()
        };
        assert_eq!(opts.server_name(), "files.example");
        opts.server_name = Some("localhost".into());
        assert_eq!(opts.server_name(), "localhost");
    }
}
