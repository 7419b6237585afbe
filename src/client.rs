//! Remote Copy Client Module
//!
//! Drives the four operations from the caller's side. Every call opens its own
//! connection and therefore its own session:
//!
//! ```text
//! copy("host:/remote", "local")  → download
//! copy("local", "host:/remote")  → upload
//! ```
//!
//! A failed transfer may leave a partial file at the destination; callers
//! must treat it as invalid.

use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use rustls::pki_types::ServerName;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use crate::config::ClientOptions;
use crate::error::TransferError;
use crate::listener::BoxedIo;
use crate::protocol::{
    Call, DownloadRequest, DownloadResponse, MessageFramer, PingRequest, PingResponse, Reply,
    ShutdownRequest, ShutdownResponse, StreamFrame, UploadRequest, UploadResponse,
};
use crate::tls::ClientTlsConfig;

/// Remote copy client
#[derive(Clone)]
pub struct Client {
    options: ClientOptions,
    tls: Option<ClientTlsConfig>,
}

/// A `host:path` operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePath<'a> {
    pub host: &'a str,
    pub path: &'a str,
}

impl<'a> RemotePath<'a> {
    /// Split `host:path`. A colon after the first `/` belongs to the path, so
    /// `./a:b` and `/tmp/a:b` are local. IPv6 hosts are written `[::1]:path`.
    pub fn parse(operand: &'a str) -> Option<Self> {
        if let Some(rest) = operand.strip_prefix('[') {
            let (host, path) = rest.split_once("]:")?;
            return Some(Self { host, path });
        }

        let (host, path) = operand.split_once(':')?;
        if host.is_empty() || host.contains('/') {
            return None;
        }
        Some(Self { host, path })
    }
}

impl Client {
    /// Build a client, preparing TLS from the options when enabled.
    pub fn new(options: ClientOptions) -> Result<Self, TransferError> {
        options.validate()?;

        let tls = if !options.tls {
            None
        } else if options.insecure {
            Some(ClientTlsConfig::insecure(options.server_name())?)
        } else {
            Some(ClientTlsConfig::new(
                options.ca_file.as_deref(),
                options.server_name(),
            )?)
        };

        Ok(Self { options, tls })
    }

    /// Build a TLS client with an explicit TLS configuration.
    pub fn with_tls(options: ClientOptions, tls: ClientTlsConfig) -> Result<Self, TransferError> {
        options.validate()?;
        Ok(Self {
            options,
            tls: Some(tls),
        })
    }

    /// Same client aimed at another host.
    fn for_host(&self, host: &str) -> Result<Self, TransferError> {
        let mut client = self.clone();
        client.options.host = host.to_string();
        if client.options.server_name.is_none() {
            if let Some(tls) = client.tls.as_mut() {
                tls.server_name = ServerName::try_from(host.to_owned()).map_err(|e| {
                    TransferError::CertificateLoad(format!("invalid server name {host:?}: {e}"))
                })?;
            }
        }
        Ok(client)
    }

    async fn connect(&self) -> Result<BoxedIo, TransferError> {
        let addr = self.options.addr();
        debug!(%addr, "connecting");

        let tcp = TcpStream::connect(&addr)
            .await
            .map_err(|e| TransferError::Transfer(format!("failed to connect to {addr}: {e}")))?;

        let Some(tls) = &self.tls else {
            return Ok(Box::new(tcp));
        };

        let connector = TlsConnector::from(tls.config.clone());
        let stream = connector
            .connect(tls.server_name.clone(), tcp)
            .await
            .map_err(|e| TransferError::Transfer(format!("TLS handshake failed: {e}")))?;

        let (_, conn) = stream.get_ref();
        debug!(
            protocol = ?conn.protocol_version(),
            cipher = ?conn.negotiated_cipher_suite().map(|c| c.suite()),
            "TLS connection established"
        );
        Ok(Box::new(stream))
    }

    /// Send `src` to `dest`; exactly one of them must be `host:path`.
    pub async fn copy(&self, src: &str, dest: &str) -> Result<(), TransferError> {
        match (RemotePath::parse(src), RemotePath::parse(dest)) {
            (Some(remote), None) => {
                self.for_host(remote.host)?
                    .download(remote.path, Path::new(dest))
                    .await?;
                Ok(())
            }
            (None, Some(remote)) => {
                self.for_host(remote.host)?
                    .upload(Path::new(src), remote.path)
                    .await?;
                Ok(())
            }
            (Some(_), Some(_)) => Err(TransferError::Protocol(
                "remote to remote copy is not supported".into(),
            )),
            (None, None) => Err(TransferError::Protocol(
                "one of source or destination must be host:path".into(),
            )),
        }
    }

    /// Upload a local file to `remote_name` on the server.
    pub async fn upload(
        &self,
        local_path: &Path,
        remote_name: &str,
    ) -> Result<UploadResponse, TransferError> {
        let mut file = File::open(local_path)
            .await
            .map_err(|e| TransferError::file_open(local_path, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| TransferError::file_open(local_path, e))?;
        if metadata.is_dir() {
            return Err(TransferError::file_open(
                local_path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "is a directory"),
            ));
        }
        let file_size = metadata.len();

        let stream = self.connect().await?;
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        info!(file = ?local_path, to = %remote_name, bytes = file_size, "uploading");
        MessageFramer::write_message(&mut writer, &Call::Upload).await?;

        let pb = self.progress_bar(file_size);
        let sent = send_chunks(
            &mut file,
            &mut writer,
            remote_name,
            file_size,
            self.options.buffer_size,
            &pb,
        )
        .await;

        if let Err(e) = sent {
            // the server may already have ended the session with a reason
            if let Ok(Err(status)) =
                MessageFramer::read_message::<_, Reply<UploadResponse>>(&mut reader).await
            {
                return Err(TransferError::Remote(status));
            }
            return Err(e);
        }

        let reply: Reply<UploadResponse> = MessageFramer::read_message(&mut reader).await?;
        match reply {
            Ok(response) => {
                pb.finish_with_message("Upload complete");
                info!(
                    "upload complete: {} ({})",
                    format_size(file_size),
                    response.message
                );
                Ok(response)
            }
            Err(status) => {
                pb.abandon();
                Err(TransferError::Remote(status))
            }
        }
    }

    /// Download `remote_name` into `local_path`, replacing its contents once
    /// the server starts streaming. Returns the number of bytes received.
    pub async fn download(&self, remote_name: &str, local_path: &Path) -> Result<u64, TransferError> {
        let stream = self.connect().await?;
        let (reader, writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let call = Call::Download(DownloadRequest {
            filename: remote_name.to_string(),
        });
        MessageFramer::write_message(&mut writer, &call).await?;

        // created on the first successful frame so a remote error leaves it alone
        let mut file: Option<File> = None;
        let mut expected: Option<u64> = None;
        let mut received: u64 = 0;
        let mut pb: Option<ProgressBar> = None;

        loop {
            let frame: StreamFrame<DownloadResponse> =
                MessageFramer::read_message(&mut reader).await?;
            let chunk = match frame {
                StreamFrame::Item(chunk) => chunk,
                StreamFrame::End => break,
                StreamFrame::Error(status) => {
                    if let Some(pb) = &pb {
                        pb.abandon();
                    }
                    return Err(TransferError::Remote(status));
                }
            };

            match expected {
                None => {
                    info!(from = %remote_name, file = ?local_path, bytes = chunk.size, "downloading");
                    expected = Some(chunk.size);
                    pb = Some(self.progress_bar(chunk.size));
                }
                Some(size) if size != chunk.size => {
                    return Err(TransferError::Protocol(format!(
                        "declared size changed mid-stream from {size} to {}",
                        chunk.size
                    )));
                }
                Some(_) => {}
            }

            if file.is_none() {
                file = Some(create_local(local_path).await?);
            }
            if let Some(out) = file.as_mut() {
                out.write_all(&chunk.content)
                    .await
                    .map_err(TransferError::Write)?;
            }
            received += chunk.content.len() as u64;
            if let Some(pb) = &pb {
                pb.set_position(received);
            }
        }

        let mut file = match file {
            Some(file) => file,
            None => create_local(local_path).await?,
        };
        file.flush().await.map_err(TransferError::Write)?;

        let expected = expected.unwrap_or(0);
        if received != expected {
            warn!(file = ?local_path, "download incomplete; local file is not valid");
            return Err(TransferError::SizeMismatch {
                expected,
                actual: received,
            });
        }

        if let Some(pb) = pb {
            pb.finish_with_message("Download complete");
        }
        info!("download complete: {}", format_size(received));
        Ok(received)
    }

    /// Liveness check; returns the server's fixed acknowledgement.
    pub async fn ping(&self, message: &str) -> Result<String, TransferError> {
        let call = Call::Ping(PingRequest {
            message: message.to_string(),
        });
        let response: PingResponse = self.unary(&call).await?;
        info!(reply = %response.message, "ping");
        Ok(response.message)
    }

    /// Ask the server process to exit.
    pub async fn shutdown(&self) -> Result<(), TransferError> {
        let _: ShutdownResponse = self.unary(&Call::Shutdown(ShutdownRequest {})).await?;
        info!(addr = %self.options.addr(), "server shutdown requested");
        Ok(())
    }

    async fn unary<T>(&self, call: &Call) -> Result<T, TransferError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let mut stream = self.connect().await?;
        MessageFramer::write_message(&mut stream, call).await?;
        let reply: Reply<T> = MessageFramer::read_message(&mut stream).await?;
        reply.map_err(TransferError::Remote)
    }

    fn progress_bar(&self, total_size: u64) -> ProgressBar {
        if self.options.quiet {
            ProgressBar::hidden()
        } else {
            create_progress_bar(total_size)
        }
    }
}

/// Stream the file as `Item` frames followed by `End`. At least one chunk is
/// always sent so an empty file still reaches the server.
async fn send_chunks<W>(
    file: &mut File,
    writer: &mut W,
    remote_name: &str,
    file_size: u64,
    buffer_size: usize,
    pb: &ProgressBar,
) -> Result<u64, TransferError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; buffer_size];
    let mut bytes_sent: u64 = 0;
    let mut first = true;

    loop {
        let n = file.read(&mut buffer).await.map_err(TransferError::Read)?;
        if n == 0 && !first {
            break;
        }

        let chunk = UploadRequest {
            filename: remote_name.to_string(),
            content: buffer[..n].to_vec(),
            size: file_size,
        };
        MessageFramer::write_message(writer, &StreamFrame::Item(chunk)).await?;

        first = false;
        bytes_sent += n as u64;
        pb.set_position(bytes_sent);

        if n == 0 {
            break;
        }
    }

    MessageFramer::write_message(writer, &StreamFrame::<UploadRequest>::End).await?;
    Ok(bytes_sent)
}

/// Create progress bar for transfers
fn create_progress_bar(total_size: u64) -> ProgressBar {
    let pb = ProgressBar::new(total_size);
    if let Ok(style) = ProgressStyle::default_bar().template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

async fn create_local(path: &Path) -> Result<File, TransferError> {
    File::create(path)
        .await
        .map_err(|e| TransferError::file_open(path, e))
}

/// Format file size for display
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} B", size)
    }
}
