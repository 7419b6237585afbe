//! Server side of `Upload`.
//!
//! ```text
//! AwaitingFirstChunk --chunk--> Receiving --chunk--> Receiving
//!        |                          |
//!        +--------- end ------------+--> Completed | Failed
//! ```
//!
//! The destination is opened on the first chunk only, and the declared size
//! is taken from that chunk. A failed upload leaves whatever was written on
//! disk; callers must not trust the destination of a failed upload.

use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info};

use crate::error::TransferError;
use crate::protocol::{UploadRequest, UploadResponse, UPLOAD_REPLY};
use crate::stream::UploadStream;

/// Where an upload session stands.
#[derive(Debug)]
pub enum UploadState {
    AwaitingFirstChunk,
    Receiving(OpenUpload),
}

/// Destination file of an upload in progress and its byte accounting.
#[derive(Debug)]
pub struct OpenUpload {
    path: PathBuf,
    file: File,
    declared: u64,
    written: u64,
}

impl OpenUpload {
    async fn open(first: &UploadRequest) -> Result<Self, TransferError> {
        info!(
            filename = %first.filename,
            bytes = first.size,
            "server accepting upload request"
        );

        let path = PathBuf::from(&first.filename);
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        #[cfg(unix)]
        options.mode(0o644);

        let file = options
            .open(&path)
            .await
            .map_err(|e| TransferError::file_open(&path, e))?;

        Ok(Self {
            path,
            file,
            declared: first.size,
            written: 0,
        })
    }

    async fn append(&mut self, content: &[u8]) -> Result<(), TransferError> {
        // write_all surfaces a short write as WriteZero
        self.file
            .write_all(content)
            .await
            .map_err(TransferError::Write)?;
        // wait for the bytes to reach the file before the next receive
        self.file.flush().await.map_err(TransferError::Write)?;
        self.written += content.len() as u64;
        Ok(())
    }

    pub fn declared(&self) -> u64 {
        self.declared
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl UploadState {
    /// Apply one inbound chunk, opening the destination if this is the first.
    pub async fn accept(self, chunk: UploadRequest) -> Result<UploadState, TransferError> {
        let mut open = match self {
            UploadState::AwaitingFirstChunk => OpenUpload::open(&chunk).await?,
            UploadState::Receiving(open) => {
                if chunk.filename != open.path.to_string_lossy() {
                    debug!(filename = %chunk.filename, "ignoring filename on non-first chunk");
                }
                open
            }
        };
        open.append(&chunk.content).await?;
        Ok(UploadState::Receiving(open))
    }

    /// Handle end of stream: the byte count must equal the declared size.
    pub async fn finish(self) -> Result<UploadResponse, TransferError> {
        let bytes = match self {
            // nothing was sent, so nothing was declared
            UploadState::AwaitingFirstChunk => 0,
            UploadState::Receiving(mut open) => {
                open.file.flush().await.map_err(TransferError::Write)?;
                info!(
                    filename = %open.path.display(),
                    bytes = open.written,
                    "server upload completed"
                );

                if open.written != open.declared {
                    return Err(TransferError::SizeMismatch {
                        expected: open.declared,
                        actual: open.written,
                    });
                }

                // drop any tail left over from a longer previous file
                open.file
                    .set_len(open.written)
                    .await
                    .map_err(TransferError::Write)?;
                open.written
            }
        };

        debug!(bytes, "upload acknowledged");
        Ok(UploadResponse {
            message: UPLOAD_REPLY.to_string(),
        })
    }
}

/// Drive an upload session until end of stream or the first error.
/// Chunks carrying more than `max_chunk` bytes end the session.
pub async fn handle_upload<S: UploadStream>(
    stream: &mut S,
    max_chunk: usize,
) -> Result<UploadResponse, TransferError> {
    let result = receive(stream, max_chunk).await;
    if let Err(e) = &result {
        error!(error = %e, "upload failed");
    }
    result
}

async fn receive<S: UploadStream>(
    stream: &mut S,
    max_chunk: usize,
) -> Result<UploadResponse, TransferError> {
    let mut state = UploadState::AwaitingFirstChunk;
    while let Some(chunk) = stream.recv().await? {
        if chunk.content.len() > max_chunk {
            return Err(TransferError::Protocol(format!(
                "upload chunk of {} bytes exceeds the {max_chunk} byte buffer",
                chunk.content.len()
            )));
        }
        state = state.accept(chunk).await?;
    }
    state.finish().await
}
