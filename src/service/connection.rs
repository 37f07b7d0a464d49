//! Connection manager
//!
//! Address parsing, TCP connect with timeout, and the per-connection
//! session: attach the dispatcher lane, run the handshake, then feed every
//! inbound line to the service until the socket closes or the session is
//! cancelled.

use std::fmt;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::dispatcher::write_loop;
use super::handle::SessionLogic;
use super::SqueezeService;
use crate::bus::ConnectionEvent;
use crate::config::DEFAULT_CLI_PORT;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid server address '{0}'")]
    InvalidAddress(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed by server")]
    Closed,
}

/// `host[:port]` of a CLI endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
    pub fn parse(input: &str) -> Result<Self, ConnectError> {
        let input = input.trim();
        let invalid = || ConnectError::InvalidAddress(input.to_string());

        let (host, port) = if let Some(rest) = input.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if tail.is_empty() => (host, None),
                None => return Err(invalid()),
            }
        } else if input.matches(':').count() > 1 {
            // Bare IPv6 address without a port
            (input, None)
        } else {
            match input.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (input, None),
            }
        };

        if host.is_empty() || host.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let port = match port {
            Some(p) => p.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(invalid)?,
            None => DEFAULT_CLI_PORT,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    /// Base URL of the server's web interface on `http_port`.
    pub fn http_base(&self, http_port: u16) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}", self.host, http_port)
        } else {
            format!("http://{}:{}", self.host, http_port)
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

pub async fn connect_stream(
    server: &ServerAddress,
    connect_timeout: Duration,
) -> Result<TcpStream, ConnectError> {
    let target = (server.host.as_str(), server.port);
    match tokio::time::timeout(connect_timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => {
            if let Err(e) = stream.set_nodelay(true) {
                debug!("set_nodelay failed: {}", e);
            }
            Ok(stream)
        }
        Ok(Err(e)) => Err(ConnectError::Io(e)),
        Err(_) => Err(ConnectError::Timeout(connect_timeout)),
    }
}

enum ReadEnd {
    Cancelled,
    LoginRejected,
}

async fn read_loop(
    read_half: OwnedReadHalf,
    token: &CancellationToken,
    service: &SqueezeService,
    login_sent: bool,
) -> Result<ReadEnd, ConnectError> {
    let mut reader = BufReader::new(read_half);
    let mut buf = Vec::new();
    let mut lines_seen = 0u64;

    loop {
        buf.clear();
        tokio::select! {
            _ = token.cancelled() => return Ok(ReadEnd::Cancelled),
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) if login_sent && lines_seen == 0 => return Ok(ReadEnd::LoginRejected),
                Ok(0) => return Err(ConnectError::Closed),
                Ok(_) => {
                    lines_seen += 1;
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim();
                    if !line.is_empty() {
                        debug!("<< {}", line);
                        service.handle_line(line);
                    }
                }
                Err(e) => return Err(ConnectError::Io(e)),
            }
        }
    }
}

/// One connection attempt plus its read loop.
pub struct ServiceSession {
    pub(super) service: SqueezeService,
    pub(super) server: ServerAddress,
    pub(super) generation: u64,
}

#[async_trait]
impl SessionLogic for ServiceSession {
    fn label(&self) -> String {
        self.server.to_string()
    }

    async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let server = self.server.to_string();
        let registry = self.service.registry();
        registry.emit_connection(ConnectionEvent::Connecting {
            server: server.clone(),
        });

        let stream = match connect_stream(&self.server, self.service.config().connect_timeout()).await {
            Ok(stream) => stream,
            Err(e) => {
                registry.emit_connection(ConnectionEvent::ConnectFailed {
                    server,
                    error: e.to_string(),
                });
                return Err(e.into());
            }
        };
        info!("Connected to CLI at {}", server);

        let Some(rx) = self.service.attach_connection(self.generation) else {
            info!("{}: superseded by a newer connection", server);
            return Ok(());
        };

        let (read_half, write_half) = stream.into_split();
        let conn_token = shutdown.child_token();
        let writer_token = conn_token.clone();
        tokio::spawn(async move {
            if let Err(e) = write_loop(write_half, rx, writer_token.clone()).await {
                warn!("Command writer failed: {}", e);
                writer_token.cancel();
            }
        });

        let login_sent = self.service.start_session(self.generation);
        let result = read_loop(read_half, &conn_token, &self.service, login_sent).await;
        conn_token.cancel();

        let requested = shutdown.is_cancelled();
        self.service.connection_lost(self.generation, requested);

        match result {
            Ok(ReadEnd::Cancelled) if requested => Ok(()),
            Ok(ReadEnd::Cancelled) => Err(ConnectError::Closed.into()),
            Ok(ReadEnd::LoginRejected) => {
                warn!("{}: login rejected", server);
                self.service.session_ended(self.generation);
                registry.emit_connection(ConnectionEvent::LoginFailed { server });
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
