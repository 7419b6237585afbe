//! Server side of `Download`.
//!
//! The file's size is taken from `stat` right after opening and is the only
//! size the final check trusts. A file that grows or shrinks while it is being
//! read ends in [`TransferError::SizeMismatch`]; the race cannot be prevented
//! here, only reported.

use std::io;

use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use crate::error::TransferError;
use crate::protocol::{DownloadRequest, DownloadResponse};
use crate::stream::DownloadSink;

/// Stream `request.filename` to `sink` in chunks of at most `buffer_size`
/// bytes. Returns the number of bytes sent.
pub async fn handle_download<S: DownloadSink>(
    request: &DownloadRequest,
    sink: &mut S,
    buffer_size: usize,
) -> Result<u64, TransferError> {
    let result = send_file(request, sink, buffer_size).await;
    if let Err(e) = &result {
        error!(filename = %request.filename, error = %e, "download failed");
    }
    result
}

async fn send_file<S: DownloadSink>(
    request: &DownloadRequest,
    sink: &mut S,
    buffer_size: usize,
) -> Result<u64, TransferError> {
    info!(filename = %request.filename, "server accepting download request");

    let path = &request.filename;
    let mut file = File::open(path)
        .await
        .map_err(|e| TransferError::file_open(path, e))?;

    let metadata = file
        .metadata()
        .await
        .map_err(|e| TransferError::file_open(path, e))?;
    if metadata.is_dir() {
        return Err(TransferError::file_open(
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "is a directory"),
        ));
    }
    let expected = metadata.len();

    let mut buffer = vec![0u8; buffer_size];
    let mut total: u64 = 0;

    loop {
        let n = file.read(&mut buffer).await.map_err(TransferError::Read)?;
        if n == 0 {
            break;
        }

        sink.send(DownloadResponse {
            message: String::new(),
            filename: request.filename.clone(),
            content: buffer[..n].to_vec(),
            size: expected,
        })
        .await?;
        total += n as u64;
    }

    info!(filename = %request.filename, bytes = total, "server download completed");

    if total != expected {
        return Err(TransferError::SizeMismatch {
            expected,
            actual: total,
        });
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    type Hook = Box<dyn FnOnce() + Send>;

    /// Collects chunks; runs `after_first` once the first chunk is sent.
    #[derive(Default)]
    struct RecordingSink {
        chunks: Vec<DownloadResponse>,
        after_first: Option<Hook>,
        fail_after: Option<usize>,
    }

    impl DownloadSink for RecordingSink {
        async fn send(&mut self, chunk: DownloadResponse) -> Result<(), TransferError> {
            if self.fail_after == Some(self.chunks.len()) {
                return Err(TransferError::Transfer("client went away".into()));
            }
            self.chunks.push(chunk);
            if let Some(hook) = self.after_first.take() {
                hook();
            }
            Ok(())
        }
    }

    fn request(path: &Path) -> DownloadRequest {
        DownloadRequest {
            filename: path.to_string_lossy().into_owned(),
        }
    }

    #[tokio::test]
    async fn sends_bounded_chunks_with_total_size() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"0123456789").unwrap();
        let mut sink = RecordingSink::default();

        let sent = handle_download(&request(&src), &mut sink, 4).await.unwrap();

        assert_eq!(sent, 10);
        let lens: Vec<usize> = sink.chunks.iter().map(|c| c.content.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(sink.chunks.iter().all(|c| c.size == 10));
        let joined: Vec<u8> = sink.chunks.iter().flat_map(|c| c.content.clone()).collect();
        assert_eq!(joined, b"0123456789");
    }

    #[tokio::test]
    async fn zero_byte_file_sends_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty");
        std::fs::write(&src, b"").unwrap();
        let mut sink = RecordingSink::default();

        let sent = handle_download(&request(&src), &mut sink, 4).await.unwrap();

        assert_eq!(sent, 0);
        assert!(sink.chunks.is_empty());
    }

    #[tokio::test]
    async fn missing_file_is_file_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::default();

        let err = handle_download(&request(&dir.path().join("nope")), &mut sink, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FileOpen { .. }));
    }

    #[tokio::test]
    async fn directory_is_file_open_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = RecordingSink::default();

        let err = handle_download(&request(dir.path()), &mut sink, 4)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::FileOpen { .. }));
    }

    #[tokio::test]
    async fn file_growing_during_read_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"abcdefgh").unwrap();
        let grow = src.clone();
        let mut sink = RecordingSink {
            after_first: Some(Box::new(move || {
                use std::io::Write;
                let mut f = std::fs::OpenOptions::new().append(true).open(grow).unwrap();
                f.write_all(b"more").unwrap();
            })),
            ..Default::default()
        };

        let err = handle_download(&request(&src), &mut sink, 4)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                expected: 8,
                actual: 12
            }
        ));
    }

    #[tokio::test]
    async fn file_shrinking_during_read_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"abcdefgh").unwrap();
        let shrink = src.clone();
        let mut sink = RecordingSink {
            after_first: Some(Box::new(move || {
                let f = std::fs::OpenOptions::new().write(true).open(shrink).unwrap();
                f.set_len(0).unwrap();
            })),
            ..Default::default()
        };

        let err = handle_download(&request(&src), &mut sink, 4)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::SizeMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn send_failure_ends_the_session() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.bin");
        std::fs::write(&src, b"abcdefgh").unwrap();
        let mut sink = RecordingSink {
            fail_after: Some(1),
            ..Default::default()
        };

        let err = handle_download(&request(&src), &mut sink, 4)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Transfer(_)));
        assert_eq!(sink.chunks.len(), 1);
    }
}
