//! TLS: a plain LDAPS acceptor and the in-place StartTLS upgrade.
//!
//! Both paths share one `TlsAcceptor`, built once from the configured
//! certificate/key pair at startup.

use std::fs;
use std::io;

use native_tls::Identity;
use tokio::net::TcpStream;
use tokio_native_tls::{TlsAcceptor, TlsStream};

use crate::config::Config;
use crate::error::LdapError;

pub fn build_acceptor(config: &Config) -> Result<Option<TlsAcceptor>, LdapError> {
    let (cert_path, key_path) = match (&config.tls_cert_path, &config.tls_key_path) {
        (Some(c), Some(k)) => (c, k),
        _ => return Ok(None),
    };
    let cert = fs::read(cert_path).map_err(LdapError::Io)?;
    let key = fs::read(key_path).map_err(LdapError::Io)?;
    let identity = Identity::from_pkcs8(&cert, &key).map_err(|e| LdapError::Tls(e.to_string()))?;
    let acceptor = native_tls::TlsAcceptor::new(identity).map_err(|e| LdapError::Tls(e.to_string()))?;
    Ok(Some(TlsAcceptor::from(acceptor)))
}

pub async fn accept(acceptor: &TlsAcceptor, stream: TcpStream) -> Result<TlsStream<TcpStream>, LdapError> {
    acceptor.accept(stream).await.map_err(|e| LdapError::Tls(e.to_string()))
}

/// Either side of a connection before or after a StartTLS upgrade. Both
/// variants implement `AsyncRead`/`AsyncWrite`, which is all the codec
/// needs. `Empty` only exists for the instant between taking the plain
/// socket out for the TLS handshake and putting the upgraded one back.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Empty,
}

impl Default for MaybeTlsStream {
    fn default() -> Self {
        MaybeTlsStream::Empty
    }
}

impl MaybeTlsStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, MaybeTlsStream::Tls(_))
    }
}

impl tokio::io::AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_read(cx, buf),
            MaybeTlsStream::Empty => std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "stream taken for TLS upgrade"))),
        }
    }
}

impl tokio::io::AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<io::Result<usize>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_write(cx, buf),
            MaybeTlsStream::Empty => std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "stream taken for TLS upgrade"))),
        }
    }

    fn poll_flush(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_flush(cx),
            MaybeTlsStream::Empty => std::task::Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(self: std::pin::Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> std::task::Poll<io::Result<()>> {
        match self.get_mut() {
            MaybeTlsStream::Plain(s) => std::pin::Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => std::pin::Pin::new(s.as_mut()).poll_shutdown(cx),
            MaybeTlsStream::Empty => std::task::Poll::Ready(Ok(())),
        }
    }
}
