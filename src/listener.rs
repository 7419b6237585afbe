//! Listener construction: bind, then optionally wrap in TLS.
//!
//! The TLS handshake is deferred to [`Incoming::establish`] so the accept
//! loop can hand it to the session task instead of waiting on it.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::warn;

use crate::config::ServerOptions;
use crate::error::TransferError;
use crate::tls::ServerTlsConfig;

/// Any byte stream a session can run over.
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

pub type BoxedIo = Box<dyn AsyncIo>;

/// A bound listener, plain or TLS.
pub enum Listener {
    Plain(TcpListener),
    Tls {
        listener: TcpListener,
        acceptor: TlsAcceptor,
    },
}

impl Listener {
    /// Bind `opts.addr()` and, when TLS is enabled, provision the certificate.
    ///
    /// A bind failure is returned as-is; there is no retry.
    pub async fn bind(opts: &ServerOptions) -> Result<Self, TransferError> {
        let addr = opts.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| TransferError::Bind { addr, source })?;

        if !opts.tls {
            warn!("running server without TLS");
            return Ok(Self::Plain(listener));
        }

        let tls = ServerTlsConfig::provision(opts)?;
        Ok(Self::tls(listener, &tls))
    }

    pub fn tls(listener: TcpListener, tls: &ServerTlsConfig) -> Self {
        Self::Tls {
            listener,
            acceptor: TlsAcceptor::from(tls.config.clone()),
        }
    }

    fn tcp(&self) -> &TcpListener {
        match self {
            Self::Plain(listener) | Self::Tls { listener, .. } => listener,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp().local_addr()
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls { .. })
    }

    pub async fn accept(&self) -> io::Result<(Incoming, SocketAddr)> {
        let (stream, peer) = self.tcp().accept().await?;
        let incoming = match self {
            Self::Plain(_) => Incoming::Plain(stream),
            Self::Tls { acceptor, .. } => Incoming::Tls(stream, acceptor.clone()),
        };
        Ok((incoming, peer))
    }
}

/// An accepted connection whose TLS handshake (if any) has not run yet.
pub enum Incoming {
    Plain(TcpStream),
    Tls(TcpStream, TlsAcceptor),
}

impl Incoming {
    pub async fn establish(self) -> io::Result<BoxedIo> {
        match self {
            Self::Plain(stream) => Ok(Box::new(stream)),
            Self::Tls(stream, acceptor) => Ok(Box::new(acceptor.accept(stream).await?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback(tls: bool) -> ServerOptions {
        ServerOptions {
            listen: "127.0.0.1".into(),
            port: 0,
            tls,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn plain_listener_when_tls_disabled() {
        let listener = Listener::bind(&loopback(false)).await.unwrap();
        assert!(!listener.is_tls());
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn tls_listener_with_generated_cert() {
        let listener = Listener::bind(&loopback(true)).await.unwrap();
        assert!(listener.is_tls());
    }

    #[tokio::test]
    async fn port_in_use_is_bind_error() {
        let first = Listener::bind(&loopback(false)).await.unwrap();
        let opts = ServerOptions {
            port: first.local_addr().unwrap().port(),
            ..loopback(false)
        };

        let err = Listener::bind(&opts).await.err().unwrap();
        assert!(matches!(err, TransferError::Bind { .. }));
    }

    #[tokio::test]
    async fn bad_certificate_fails_startup() {
        let dir = tempfile::tempdir().unwrap();
        let opts = ServerOptions {
            cert_file: Some(dir.path().join("missing.pem")),
            key_file: Some(dir.path().join("missing.key")),
            ..loopback(true)
        };

        let err = Listener::bind(&opts).await.err().unwrap();
        assert!(matches!(err, TransferError::CertificateLoad(_)));
    }
}
