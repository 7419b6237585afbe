//! Error types shared by the server handlers, the listener and the client.
//!
//! Session-level variants terminate one RPC session only; `Bind` and the
//! certificate variants abort service start-up.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::protocol::{Code, Status};

/// Errors produced while setting up the service or running a transfer session.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to load certificate: {0}")]
    CertificateLoad(String),

    #[error("failed to generate certificate: {0}")]
    CertificateGeneration(String),

    #[error("failed to open file {path:?}: {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read file: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write file: {0}")]
    Write(#[source] io::Error),

    #[error("file size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    /// Terminal failure reported by the remote end of a session.
    #[error("remote error ({}): {}", .0.code, .0.message)]
    Remote(Status),
}

impl TransferError {
    pub fn file_open(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::FileOpen {
            path: path.into(),
            source,
        }
    }

    /// Wire code for this error when it ends a session.
    pub fn code(&self) -> Code {
        match self {
            Self::FileOpen { .. } => Code::FileOpen,
            Self::Read(_) => Code::Read,
            Self::Write(_) => Code::Write,
            Self::SizeMismatch { .. } => Code::SizeMismatch,
            Self::Transfer(_) => Code::Transfer,
            Self::Protocol(_) => Code::Protocol,
            Self::Remote(status) => status.code,
            Self::Bind { .. } | Self::CertificateLoad(_) | Self::CertificateGeneration(_) => {
                Code::Internal
            }
        }
    }

    /// Terminal status sent to the caller of a failed session.
    pub fn to_status(&self) -> Status {
        match self {
            Self::Remote(status) => status.clone(),
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

impl From<Status> for TransferError {
    fn from(status: Status) -> Self {
        Self::Remote(status)
    }
}
