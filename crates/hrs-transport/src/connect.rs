use std::time::Duration;

use hrs_core::{DetectError, Target};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::stream::BoxedStream;
use crate::tls;

/// Resolve, TCP-connect, and (for `https` targets) TLS-handshake to
/// `target`, offering `alpn` and bypassing verification unless
/// `verify` is set. Connect and handshake are the only awaits before
/// the caller gets a live duplex stream — no suspension happens once
/// a probe starts timing a request.
pub async fn dial(
    target: &Target,
    connect_timeout: Duration,
    alpn: &[&str],
    verify: bool,
) -> Result<(BoxedStream, Option<String>), DetectError> {
    let authority = target.authority();
    debug!(%authority, "resolving target");

    let mut addrs = timeout(connect_timeout, tokio::net::lookup_host(&authority))
        .await
        .map_err(|_| DetectError::Dns(format!("resolving {authority} timed out")))?
        .map_err(|e| DetectError::Dns(format!("resolving {authority}: {e}")))?;

    let addr = addrs
        .next()
        .ok_or_else(|| DetectError::Dns(format!("no addresses for {authority}")))?;

    debug!(%addr, "connecting");
    let tcp = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| DetectError::Connect(format!("connecting to {addr} timed out")))?
        .map_err(|e| DetectError::Connect(format!("connecting to {addr}: {e}")))?;
    let _ = tcp.set_nodelay(true);

    if !target.is_tls() {
        return Ok((Box::new(tcp), None));
    }

    let connector = tls::connector_for(alpn, verify)?;
    let server_name = ServerName::try_from(target.host.clone())
        .map_err(|e| DetectError::Tls(format!("invalid server name {}: {e}", target.host)))?;

    debug!(host = %target.host, "starting tls handshake");
    let tls_stream = timeout(connect_timeout, connector.connect(server_name, tcp))
        .await
        .map_err(|_| DetectError::Tls(format!("tls handshake with {} timed out", target.host)))?
        .map_err(|e| DetectError::Tls(format!("tls handshake with {}: {e}", target.host)))?;

    let negotiated = tls::negotiated_alpn(&tls_stream);
    Ok((Box::new(tls_stream), negotiated))
}
