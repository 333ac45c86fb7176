//! HTTP `CONNECT` proxy tunnelling.
//!
//! The tunnel is a plain TCP stream to the target host; TLS and the
//! WebSocket handshake run on top of it exactly as for a direct connection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::http::Uri;
use tracing::{debug, trace};

use crate::traits::TransportError;

/// Maximum size of the proxy's response head.
const MAX_RESPONSE_HEAD: usize = 8 * 1024;

/// Open a TCP tunnel to the host of `target` through the HTTP proxy at `proxy`.
///
/// # Errors
///
/// Returns an error if either URL is unusable, the proxy cannot be reached,
/// or the proxy answers with a non-2xx status.
pub async fn connect_via_proxy(proxy: &str, target: &str) -> Result<TcpStream, TransportError> {
    let (proxy_host, proxy_port) = proxy_authority(proxy)?;
    let (host, port) = target_authority(target)?;

    let mut stream = TcpStream::connect((proxy_host.as_str(), proxy_port)).await?;
    debug!(proxy = %proxy_host, port = proxy_port, target = %host, "Opening proxy tunnel");

    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let head = read_response_head(&mut stream).await?;
    let status = parse_status(&head)?;
    trace!(status, "Proxy answered CONNECT");

    if !(200..300).contains(&status) {
        let status_line = head.lines().next().unwrap_or_default().to_string();
        return Err(TransportError::Proxy(format!(
            "tunnel refused: {}",
            status_line.trim()
        )));
    }

    Ok(stream)
}

/// Host and port of an `http://` proxy URL.
fn proxy_authority(proxy: &str) -> Result<(String, u16), TransportError> {
    let uri: Uri = proxy
        .parse()
        .map_err(|e| TransportError::InvalidUrl(format!("{proxy}: {e}")))?;

    match uri.scheme_str() {
        None | Some("http") => {}
        Some(other) => {
            return Err(TransportError::Proxy(format!(
                "unsupported proxy scheme: {other}"
            )))
        }
    }

    let host = uri
        .host()
        .ok_or_else(|| TransportError::InvalidUrl(format!("{proxy}: missing host")))?;

    Ok((strip_brackets(host), uri.port_u16().unwrap_or(80)))
}

/// Host and port of a `ws://` or `wss://` endpoint URL.
fn target_authority(target: &str) -> Result<(String, u16), TransportError> {
    let uri: Uri = target
        .parse()
        .map_err(|e| TransportError::InvalidUrl(format!("{target}: {e}")))?;

    let default_port = match uri.scheme_str() {
        Some("wss") | Some("https") => 443,
        Some("ws") | Some("http") => 80,
        _ => {
            return Err(TransportError::InvalidUrl(format!(
                "{target}: expected ws:// or wss://"
            )))
        }
    };

    let host = uri
        .host()
        .ok_or_else(|| TransportError::InvalidUrl(format!("{target}: missing host")))?;

    Ok((host.to_string(), uri.port_u16().unwrap_or(default_port)))
}

fn strip_brackets(host: &str) -> String {
    host.trim_start_matches('[').trim_end_matches(']').to_string()
}

/// Read up to and including the blank line ending the response head.
///
/// Reads byte by byte so nothing belonging to the tunnel is consumed.
async fn read_response_head(stream: &mut TcpStream) -> Result<String, TransportError> {
    let mut head = Vec::with_capacity(256);

    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(TransportError::Proxy("response head too large".into()));
        }
        match stream.read_u8().await {
            Ok(byte) => head.push(byte),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Proxy(
                    "connection closed during CONNECT".into(),
                ))
            }
            Err(e) => return Err(e.into()),
        }
    }

    String::from_utf8(head).map_err(|_| TransportError::Proxy("response head is not UTF-8".into()))
}

/// Status code from an HTTP response head.
fn parse_status(head: &str) -> Result<u16, TransportError> {
    let line = head.lines().next().unwrap_or_default();
    let mut parts = line.split_whitespace();

    match (parts.next(), parts.next()) {
        (Some(version), Some(code)) if version.starts_with("HTTP/") => code
            .parse()
            .map_err(|_| TransportError::Proxy(format!("invalid status line: {line}"))),
        _ => Err(TransportError::Proxy(format!("invalid status line: {line}"))),
    }
}
