//! Credential-free local front for authenticated upstream proxies.
//!
//! Chromium cannot take proxy credentials on the command line, and answering
//! auth challenges from page context leaks them to the target. The front
//! listens on loopback, adds `Proxy-Authorization` to each request head, and
//! then splices bytes between the browser and the upstream proxy.

use std::net::SocketAddr;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use trawler_core::error::AppError;
use trawler_core::proxy::{Proxy, ProxyScheme};

const MAX_HEAD_BYTES: usize = 16 * 1024;

/// A running front. Dropping it stops the listener and every open tunnel.
pub struct ProxyFront {
    local_addr: SocketAddr,
    upstream: String,
    task: JoinHandle<()>,
}

impl ProxyFront {
    /// Starts a front for `upstream` on an ephemeral loopback port.
    pub async fn start(upstream: &Proxy) -> Result<Self, AppError> {
        let credentials = upstream.credentials.as_ref().ok_or_else(|| {
            AppError::ProxyError(format!("{} has no credentials to front", upstream.endpoint()))
        })?;
        if upstream.scheme == ProxyScheme::Socks5 {
            return Err(AppError::ProxyError(
                "Authenticated SOCKS5 upstreams cannot be fronted".into(),
            ));
        }

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| AppError::ProxyError(format!("Failed to bind proxy front: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AppError::ProxyError(format!("Failed to bind proxy front: {e}")))?;

        let auth = basic_auth(&credentials.username, &credentials.password);
        let endpoint = upstream.endpoint();
        let task = tokio::spawn(accept_loop(listener, endpoint.clone(), auth));

        tracing::debug!(front = %local_addr, upstream = %endpoint, "Proxy front started");
        Ok(Self {
            local_addr,
            upstream: endpoint,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Value for Chromium's `--proxy-server`.
    pub fn server_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn upstream(&self) -> &str {
        &self.upstream
    }
}

impl Drop for ProxyFront {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn basic_auth(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

async fn accept_loop(listener: TcpListener, upstream: String, auth: String) {
    let mut tunnels = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    let upstream = upstream.clone();
                    let auth = auth.clone();
                    tunnels.spawn(async move {
                        if let Err(e) = tunnel(stream, &upstream, &auth).await {
                            tracing::debug!(error = %e, "Proxy front tunnel closed");
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Proxy front accept failed");
                }
            },
            Some(_) = tunnels.join_next(), if !tunnels.is_empty() => {}
        }
    }
}

async fn tunnel(mut client: TcpStream, upstream: &str, auth: &str) -> Result<(), AppError> {
    let mut buf = Vec::with_capacity(1024);
    let head_len = loop {
        let mut chunk = [0u8; 2048];
        let n = client
            .read(&mut chunk)
            .await
            .map_err(|e| AppError::NetworkError(e.to_string()))?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(AppError::ProtocolError("Request head too large".into()));
        }
    };

    let head = std::str::from_utf8(&buf[..head_len])
        .map_err(|_| AppError::ProtocolError("Request head is not UTF-8".into()))?;
    let rewritten = inject_header(head, auth);

    let mut server = TcpStream::connect(upstream)
        .await
        .map_err(|e| AppError::ProxyError(format!("{upstream}: {e}")))?;
    server
        .write_all(rewritten.as_bytes())
        .await
        .map_err(|e| AppError::NetworkError(e.to_string()))?;
    server
        .write_all(&buf[head_len..])
        .await
        .map_err(|e| AppError::NetworkError(e.to_string()))?;

    tokio::io::copy_bidirectional(&mut client, &mut server)
        .await
        .map_err(|e| AppError::NetworkError(e.to_string()))?;
    Ok(())
}

/// Offset just past the `\r\n\r\n` that ends the request head.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Rewrites a request head for the upstream proxy.
///
/// Client-supplied proxy credentials are dropped and ours inserted after
/// the request line. Plain (non-`CONNECT`) requests are forced to close so
/// that every request on the wire carries the header.
pub(crate) fn inject_header(head: &str, auth: &str) -> String {
    let mut lines = head.split("\r\n").filter(|l| !l.is_empty());
    let request_line = lines.next().unwrap_or_default();
    let is_connect = request_line.starts_with("CONNECT ");

    let mut out = String::with_capacity(head.len() + auth.len() + 64);
    out.push_str(request_line);
    out.push_str("\r\n");
    out.push_str("Proxy-Authorization: ");
    out.push_str(auth);
    out.push_str("\r\n");

    for line in lines {
        let name = line.split(':').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("proxy-authorization") {
            continue;
        }
        if !is_connect
            && (name.eq_ignore_ascii_case("proxy-connection") || name.eq_ignore_ascii_case("connection"))
        {
            continue;
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    if !is_connect {
        out.push_str("Connection: close\r\n");
    }
    out.push_str("\r\n");
    out
}

#[cfg(test)]
mod tests {
    use trawler_core::proxy::ProxyCredentials;

    use super::*;

    #[test]
    fn test_inject_header_connect() {
        let head = "CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\nProxy-Authorization: Basic bogus\r\n\r\n";
        let out = inject_header(head, "Basic dTpw");

        assert!(out.starts_with("CONNECT example.com:443 HTTP/1.1\r\nProxy-Authorization: Basic dTpw\r\n"));
        assert!(!out.contains("bogus"));
        assert!(out.contains("Host: example.com:443\r\n"));
        assert!(out.ends_with("\r\n\r\n"));
        assert!(!out.contains("Connection: close"));
    }

    #[test]
    fn test_inject_header_plain_request_closes() {
        let head = "GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nProxy-Connection: keep-alive\r\n\r\n";
        let out = inject_header(head, "Basic dTpw");

        assert!(out.contains("Proxy-Authorization: Basic dTpw\r\n"));
        assert!(!out.contains("keep-alive"));
        assert!(out.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn test_basic_auth() {
        assert_eq!(basic_auth("u", "p"), "Basic dTpw");
    }

    #[tokio::test]
    async fn test_front_forwards_with_credentials() {
        let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut conn, _) = upstream.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut seen = Vec::new();
            while find_head_end(&seen).is_none() {
                let n = conn.read(&mut buf).await.unwrap();
                seen.extend_from_slice(&buf[..n]);
            }
            conn.write_all(&seen).await.unwrap();
        });

        let proxy = Proxy::new(upstream_addr.ip().to_string(), upstream_addr.port())
            .with_credentials(ProxyCredentials::new("u", "p"));
        let front = ProxyFront::start(&proxy).await.unwrap();
        assert!(front.server_url().starts_with("http://127.0.0.1:"));

        let mut client = TcpStream::connect(front.local_addr()).await.unwrap();
        client
            .write_all(b"CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
            .await
            .unwrap();
        let mut echoed = Vec::new();
        client.read_to_end(&mut echoed).await.unwrap();

        let echoed = String::from_utf8(echoed).unwrap();
        assert!(echoed.contains("Proxy-Authorization: Basic dTpw"));
    }

    #[tokio::test]
    async fn test_front_requires_credentials() {
        let err = ProxyFront::start(&Proxy::new("10.0.0.1", 8000))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AppError::ProxyError(_)));
    }
}
