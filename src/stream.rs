//! The two transport seams the transfer handlers are written against.
//!
//! Handlers only ever see "give me the next inbound chunk" and "send this
//! outbound chunk"; the framed implementations below bind those to a
//! connection, and tests bind them to in-memory queues.

use std::future::Future;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransferError;
use crate::protocol::{DownloadResponse, MessageFramer, StreamFrame, UploadRequest};

/// Inbound half of a client-streaming upload.
pub trait UploadStream {
    /// Next chunk, or `None` once the client has ended the stream.
    fn recv(&mut self) -> impl Future<Output = Result<Option<UploadRequest>, TransferError>> + Send;
}

/// Outbound half of a server-streaming download.
pub trait DownloadSink {
    fn send(
        &mut self,
        chunk: DownloadResponse,
    ) -> impl Future<Output = Result<(), TransferError>> + Send;
}

/// Reads `StreamFrame<UploadRequest>` frames from a connection.
pub struct FramedUploadStream<R> {
    reader: R,
    ended: bool,
}

impl<R> FramedUploadStream<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            ended: false,
        }
    }
}

impl<R: AsyncRead + Unpin + Send> UploadStream for FramedUploadStream<R> {
    async fn recv(&mut self) -> Result<Option<UploadRequest>, TransferError> {
        if self.ended {
            return Ok(None);
        }

        let frame: StreamFrame<UploadRequest> =
            MessageFramer::read_message(&mut self.reader).await?;

        match frame {
            StreamFrame::Item(chunk) => Ok(Some(chunk)),
            StreamFrame::End => {
                self.ended = true;
                Ok(None)
            }
            StreamFrame::Error(status) => Err(TransferError::Transfer(format!(
                "client aborted stream: {}",
                status.message
            ))),
        }
    }
}

/// Writes `StreamFrame<DownloadResponse>` frames to a connection.
pub struct FramedDownloadSink<W> {
    writer: W,
}

impl<W> FramedDownloadSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: AsyncWrite + Unpin + Send> DownloadSink for FramedDownloadSink<W> {
    async fn send(&mut self, chunk: DownloadResponse) -> Result<(), TransferError> {
        MessageFramer::write_message(&mut self.writer, &StreamFrame::Item(chunk)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Code, Status};

    fn chunk(content: &[u8]) -> UploadRequest {
        UploadRequest {
            filename: "f".into(),
            content: content.to_vec(),
            size: 3,
        }
    }

    #[tokio::test]
    async fn upload_stream_yields_items_then_end() {
        let (mut client, server) = tokio::io::duplex(4096);
        MessageFramer::write_message(&mut client, &StreamFrame::Item(chunk(b"ab")))
            .await
            .unwrap();
        MessageFramer::write_message(&mut client, &StreamFrame::<UploadRequest>::End)
            .await
            .unwrap();

        let mut stream = FramedUploadStream::new(server);
        assert_eq!(stream.recv().await.unwrap(), Some(chunk(b"ab")));
        assert_eq!(stream.recv().await.unwrap(), None);
        // stays ended without touching the connection again
        assert_eq!(stream.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn upload_stream_reports_client_abort() {
        let (mut client, server) = tokio::io::duplex(4096);
        let frame: StreamFrame<UploadRequest> =
            StreamFrame::Error(Status::new(Code::Read, "disk gone"));
        MessageFramer::write_message(&mut client, &frame).await.unwrap();

        let mut stream = FramedUploadStream::new(server);
        let err = stream.recv().await.unwrap_err();
        assert!(matches!(err, TransferError::Transfer(_)));
    }

    #[tokio::test]
    async fn upload_stream_disconnect_is_transfer_error() {
        let (client, server) = tokio::io::duplex(4096);
        drop(client);

        let mut stream = FramedUploadStream::new(server);
        assert!(matches!(
            stream.recv().await,
            Err(TransferError::Transfer(_))
        ));
    }

    #[tokio::test]
    async fn download_sink_writes_item_frames() {
        let (server, mut client) = tokio::io::duplex(4096);
        let mut sink = FramedDownloadSink::new(server);
        let chunk = DownloadResponse {
            message: String::new(),
            filename: "f".into(),
            content: b"xyz".to_vec(),
            size: 3,
        };
        sink.send(chunk.clone()).await.unwrap();

        let frame: StreamFrame<DownloadResponse> =
            MessageFramer::read_message(&mut client).await.unwrap();
        assert_eq!(frame, StreamFrame::Item(chunk));
    }
}
