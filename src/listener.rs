//! Accept loops for the plain and LDAPS ports. Each accepted connection is
//! handed off to [`crate::conn`] on its own task; the listener itself only
//! watches for new connections and the shutdown signal.

use std::sync::Arc;

use log::{info, warn};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::handlers::HandlerContext;
use crate::tls::MaybeTlsStream;

/// Plain LDAP port. `starttls_acceptor` is the same certificate material
/// used for LDAPS, if configured; it lets a client upgrade a connection
/// accepted here in place rather than terminating TLS up front.
pub async fn serve_plain(
    bind_addr: &str,
    ctx: Arc<HandlerContext>,
    starttls_acceptor: Option<tokio_native_tls::TlsAcceptor>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("listening for plain LDAP on {bind_addr}");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let starttls_acceptor = starttls_acceptor.clone();
                tokio::spawn(async move {
                    crate::conn::run(stream, ctx, starttls_acceptor, shutdown).await;
                    info!("connection from {peer} closed");
                });
            }
        }
    }
    Ok(())
}

/// LDAPS port: every accepted connection handshakes TLS immediately,
/// before a single LDAPMessage is read.
pub async fn serve_ldaps(
    bind_addr: &str,
    ctx: Arc<HandlerContext>,
    acceptor: tokio_native_tls::TlsAcceptor,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!("listening for LDAPS on {bind_addr}");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let ctx = ctx.clone();
                let shutdown = shutdown.clone();
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    match crate::tls::accept(&acceptor, stream).await {
                        Ok(tls_stream) => run_already_secure(tls_stream, ctx, acceptor, shutdown).await,
                        Err(e) => warn!("LDAPS handshake with {peer} failed: {e}"),
                    }
                    info!("connection from {peer} closed");
                });
            }
        }
    }
    Ok(())
}

/// LDAPS connections arrive already inside a `TlsStream`; feed one in over
/// `MaybeTlsStream::Tls` directly instead of the StartTLS upgrade path.
/// `acceptor` is still passed through so a (pointless but RFC-legal)
/// StartTLS request on this connection reports `operationsError` via the
/// normal already-secure check rather than `protocolError`.
async fn run_already_secure(
    tls_stream: tokio_native_tls::TlsStream<tokio::net::TcpStream>,
    ctx: Arc<HandlerContext>,
    acceptor: tokio_native_tls::TlsAcceptor,
    shutdown: CancellationToken,
) {
    crate::conn::run_on_stream(MaybeTlsStream::Tls(Box::new(tls_stream)), ctx, Some(acceptor), shutdown).await;
}
