//! CONNECT tunnels.
//!
//! # Responsibilities
//! - Parse the `host[:port]` target of a CONNECT request
//! - Open the TCP connection and confirm it to the caller
//! - Splice bytes both ways until either side finishes
//! - Tear both sockets down exactly once
//!
//! # Design Decisions
//! - A target without a port connects to `default_port` (80 unless configured)
//! - A failed connect closes the caller's socket without a status line, unless
//!   `reply_on_failure` asks for a `502`
//! - The first side to end, close or fail ends the whole session

use std::io;
use std::time::Duration;

use bytes::Bytes;
use http::Version;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::observability::metrics;
use crate::proxy::error::TunnelError;

/// The parts of a CONNECT request the splicer needs.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Authority-form target, e.g. `example.com:443`.
    pub target: String,
    /// HTTP version of the request line, echoed in the reply.
    pub version: Version,
}

impl ConnectRequest {
    pub fn new(target: impl Into<String>, version: Version) -> Self {
        Self {
            target: target.into(),
            version,
        }
    }

    fn status_line(&self, status: &str) -> String {
        let version = match self.version {
            Version::HTTP_10 => "HTTP/1.0",
            _ => "HTTP/1.1",
        };
        format!("{version} {status}\r\n\r\n")
    }
}

/// Tunnel settings.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub default_port: u16,
    pub reply_on_failure: bool,
    pub connect_timeout: Option<Duration>,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            default_port: 80,
            reply_on_failure: false,
            connect_timeout: None,
        }
    }
}

/// Which endpoint of a tunnel finished first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

/// How a spliced session ended.
#[derive(Debug)]
pub struct TunnelOutcome {
    /// The endpoint whose stream ended or failed first.
    pub closed_by: Side,
    /// `true` when that endpoint failed rather than closing cleanly.
    pub failed: bool,
}

/// Split a CONNECT target into host and port.
pub fn parse_target(target: &str, default_port: u16) -> Result<(String, u16), TunnelError> {
    let invalid = || TunnelError::InvalidTarget(target.to_string());

    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
        match after {
            "" => (host, None),
            _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match target.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (target, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse().map_err(|_| invalid())?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}

/// Handles CONNECT requests on raw connections.
#[derive(Debug, Clone, Default)]
pub struct TunnelSplicer {
    options: TunnelOptions,
}

impl TunnelSplicer {
    pub fn new(options: TunnelOptions) -> Self {
        Self { options }
    }

    /// Run one CONNECT session to completion.
    ///
    /// `head` holds any bytes the caller sent after the request's header
    /// section; they are delivered to the target before splicing starts.
    pub async fn handle<S>(
        &self,
        request: ConnectRequest,
        mut source: S,
        head: Bytes,
    ) -> Result<TunnelOutcome, TunnelError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        tracing::debug!(target = %request.target, "CONNECT");

        let target = match self.connect(&request.target).await {
            Ok(target) => target,
            Err(err) => {
                metrics::tunnel_failed();
                if self.options.reply_on_failure {
                    let _ = source
                        .write_all(request.status_line("502 Bad Gateway").as_bytes())
                        .await;
                }
                let _ = source.shutdown().await;
                return Err(err);
            }
        };

        let mut session = TunnelSession::new(request.target.clone(), source, target);
        let result = session.run(&request, &head).await;
        session.teardown().await;
        result
    }

    async fn connect(&self, target: &str) -> Result<TcpStream, TunnelError> {
        let (host, port) = parse_target(target, self.options.default_port)?;
        let connect = TcpStream::connect((host.as_str(), port));
        let result = match self.options.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, connect)
                .await
                .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))),
            None => connect.await,
        };
        result.map_err(|source| TunnelError::Connect {
            target: target.to_string(),
            source,
        })
    }
}

/// A pair of spliced endpoints.
///
/// Both endpoints live in `Option`s; teardown takes them, so a second teardown
/// finds nothing to close.
struct TunnelSession<S, T> {
    label: String,
    source: Option<S>,
    target: Option<T>,
}

impl<S, T> TunnelSession<S, T>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: AsyncRead + AsyncWrite + Unpin,
{
    fn new(label: String, source: S, target: T) -> Self {
        metrics::tunnel_opened();
        Self {
            label,
            source: Some(source),
            target: Some(target),
        }
    }

    async fn run(&mut self, request: &ConnectRequest, head: &[u8]) -> Result<TunnelOutcome, TunnelError> {
        let (Some(source), Some(target)) = (self.source.as_mut(), self.target.as_mut()) else {
            return Err(TunnelError::Io(io::ErrorKind::NotConnected.into()));
        };

        source
            .write_all(request.status_line("200 Connection Established").as_bytes())
            .await?;
        source.flush().await?;
        if !head.is_empty() {
            target.write_all(head).await?;
        }

        let (mut source_read, mut source_write) = tokio::io::split(source);
        let (mut target_read, mut target_write) = tokio::io::split(target);

        let (closed_by, copied) = tokio::select! {
            copied = tokio::io::copy(&mut source_read, &mut target_write) => (Side::Source, copied),
            copied = tokio::io::copy(&mut target_read, &mut source_write) => (Side::Target, copied),
        };

        let failed = match copied {
            Ok(bytes) => {
                tracing::trace!(target = %self.label, side = ?closed_by, bytes, "Tunnel endpoint closed");
                false
            }
            Err(err) => {
                tracing::debug!(target = %self.label, side = ?closed_by, error = %err, "Tunnel endpoint failed");
                true
            }
        };
        Ok(TunnelOutcome { closed_by, failed })
    }

    /// Close both endpoints. Returns false if they were already closed.
    async fn teardown(&mut self) -> bool {
        let (source, target) = (self.source.take(), self.target.take());
        if source.is_none() && target.is_none() {
            return false;
        }
        // Errors here are from sockets that are already going away.
        if let Some(mut source) = source {
            let _ = source.shutdown().await;
        }
        if let Some(mut target) = target {
            let _ = target.shutdown().await;
        }
        metrics::tunnel_closed();
        tracing::debug!(target = %self.label, "DISCONNECT");
        true
    }
}
