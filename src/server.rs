//! Remote Copy Server Module
//!
//! Binds the listener, then serves one RPC session per accepted connection:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Listener (plain TCP or TLS via rustls)      │
//! └─────────────────────────────────────────────┘
//!                       │ one task per connection
//! ┌─────────────────────────────────────────────┐
//! │  Session: read Call, dispatch                │
//! │   Upload   → upload::handle_upload           │
//! │   Download → download::handle_download       │
//! │   Ping     → control::ping                   │
//! │   Shutdown → reply, then ShutdownHook        │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! Sessions share nothing mutable. A failing session is logged and reported
//! to its own client only.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tracing::{debug, error, info, warn};

use crate::config::ServerOptions;
use crate::control::{self, ShutdownHook};
use crate::download::handle_download;
use crate::error::TransferError;
use crate::listener::{BoxedIo, Incoming, Listener};
use crate::protocol::{
    Call, DownloadResponse, MessageFramer, Reply, ShutdownResponse, StreamFrame, UploadResponse,
};
use crate::stream::{FramedDownloadSink, FramedUploadStream};
use crate::upload::handle_upload;

/// Remote copy server
pub struct Server {
    options: ServerOptions,
    shutdown: ShutdownHook,
}

/// Read-only state shared by every session.
struct SessionContext {
    buffer_size: usize,
    shutdown: ShutdownHook,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        let shutdown = ShutdownHook::exit_process(options.shutdown_delay);
        Self { options, shutdown }
    }

    /// Replace what `Shutdown` does once its delay has passed.
    pub fn with_shutdown_hook(mut self, hook: ShutdownHook) -> Self {
        self.shutdown = hook;
        self
    }

    /// Validate options and bind the listener. Any error here is fatal.
    pub async fn bind(&self) -> Result<Listener, TransferError> {
        self.options.validate()?;
        Listener::bind(&self.options).await
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<(), TransferError> {
        let listener = self.bind().await?;
        info!(addr = %self.options.addr(), tls = listener.is_tls(), "starting server");
        self.serve(listener).await
    }

    /// Serve sessions from an already bound listener.
    pub async fn serve(self, listener: Listener) -> Result<(), TransferError> {
        let ctx = Arc::new(SessionContext {
            buffer_size: self.options.buffer_size,
            shutdown: self.shutdown,
        });

        loop {
            let (incoming, peer) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    error!(error = %e, "failed to accept connection");
                    continue;
                }
            };

            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                match handle_connection(incoming, peer, &ctx).await {
                    Ok(()) => debug!(%peer, "session closed"),
                    Err(e) => warn!(%peer, error = %e, "session ended with error"),
                }
            });
        }
    }
}

async fn handle_connection(
    incoming: Incoming,
    peer: SocketAddr,
    ctx: &SessionContext,
) -> Result<(), TransferError> {
    let stream: BoxedIo = incoming
        .establish()
        .await
        .map_err(|e| TransferError::Transfer(format!("TLS handshake failed: {e}")))?;

    let (reader, writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    let call: Call = MessageFramer::read_message(&mut reader).await?;
    debug!(%peer, ?call, "session started");

    match call {
        Call::Upload => {
            let mut inbound = FramedUploadStream::new(&mut reader);
            let reply: Reply<UploadResponse> = handle_upload(&mut inbound, ctx.buffer_size)
                .await
                .map_err(|e| e.to_status());
            MessageFramer::write_message(&mut writer, &reply).await?;
        }
        Call::Download(request) => {
            let mut outbound = FramedDownloadSink::new(&mut writer);
            let last: StreamFrame<DownloadResponse> =
                match handle_download(&request, &mut outbound, ctx.buffer_size).await {
                    Ok(_) => StreamFrame::End,
                    Err(e) => StreamFrame::Error(e.to_status()),
                };
            MessageFramer::write_message(&mut writer, &last).await?;
        }
        Call::Ping(request) => {
            let reply: Reply<_> = Ok(control::ping(&request));
            MessageFramer::write_message(&mut writer, &reply).await?;
        }
        Call::Shutdown(_) => {
            info!(%peer, delay = ?ctx.shutdown.delay(), "server shutdown requested");
            let reply: Reply<ShutdownResponse> = Ok(ShutdownResponse {});
            let sent = MessageFramer::write_message(&mut writer, &reply).await;
            if sent.is_ok() {
                if let Err(e) = writer.shutdown().await {
                    debug!(%peer, error = %e, "failed to close stream before shutdown");
                }
            }
            ctx.shutdown.schedule();
            return sent;
        }
    }

    writer
        .shutdown()
        .await
        .map_err(|e| TransferError::Transfer(format!("failed to close stream: {e}")))
}
