//! Server discovery via UDP broadcast
//!
//! Broadcast a TLV request to port 3483 and collect the replies. Each reply
//! is `E` followed by fields of 4-byte tag, 1-byte length and value.
//!
//! Try it by hand:
//! ```bash
//! echo -ne "eIPAD\x00NAME\x00JSON\x00CLIP\x00UUID\x00VERS\x00" | socat -t5 - udp-datagram:255.255.255.255:3483,broadcast | od -Ax -bc
//! ```

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::{DEFAULT_CLI_PORT, DEFAULT_HTTP_PORT};

pub const DISCOVERY_PORT: u16 = 3483;

/// Fields requested: address, name, HTTP port, CLI port, uuid, version
const DISCOVERY_REQUEST: &[u8] = b"eIPAD\x00NAME\x00JSON\x00CLIP\x00UUID\x00VERS\x00";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiscoveredServer {
    /// From IPAD, else the reply's source address
    pub host: String,
    pub name: String,
    pub uuid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub http_port: u16,
    pub cli_port: u16,
}

impl DiscoveredServer {
    /// `host:port` of the CLI endpoint, ready for `connect`.
    pub fn cli_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.cli_port)
        } else {
            format!("{}:{}", self.host, self.cli_port)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Field {
    Ipad,
    Name,
    Json,
    Clip,
    Uuid,
    Vers,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"IPAD" => Some(Field::Ipad),
            b"NAME" => Some(Field::Name),
            b"JSON" => Some(Field::Json),
            b"CLIP" => Some(Field::Clip),
            b"UUID" => Some(Field::Uuid),
            b"VERS" => Some(Field::Vers),
            _ => None,
        }
    }
}

fn parse_response(data: &[u8], source: &SocketAddr) -> Option<DiscoveredServer> {
    let (&marker, body) = data.split_first()?;
    if marker != b'E' && marker != b'e' {
        tracing::debug!("Discovery: unexpected reply marker {}", marker);
        return None;
    }

    let mut fields: HashMap<Field, String> = HashMap::new();
    let mut rest = body;
    while rest.len() >= 5 {
        let (tag, tail) = rest.split_at(4);
        let length = tail[0] as usize;
        let tail = &tail[1..];
        if length > tail.len() {
            tracing::debug!("Discovery: truncated field, need {} have {}", length, tail.len());
            break;
        }
        let (value, tail) = tail.split_at(length);
        if let Some(field) = Field::from_tag(tag) {
            fields.insert(field, String::from_utf8_lossy(value).into_owned());
        }
        rest = tail;
    }

    let name = fields.remove(&Field::Name).filter(|n| !n.is_empty());
    let Some(name) = name else {
        tracing::debug!("Discovery: reply from {} has no NAME", source);
        return None;
    };
    let port = |field: Field, default: u16| {
        fields
            .get(&field)
            .and_then(|v| v.trim().parse::<u16>().ok())
            .filter(|p| *p != 0)
            .unwrap_or(default)
    };

    Some(DiscoveredServer {
        host: fields
            .get(&Field::Ipad)
            .filter(|ip| !ip.is_empty())
            .cloned()
            .unwrap_or_else(|| source.ip().to_string()),
        http_port: port(Field::Json, DEFAULT_HTTP_PORT),
        cli_port: port(Field::Clip, DEFAULT_CLI_PORT),
        uuid: fields.get(&Field::Uuid).cloned().unwrap_or_default(),
        version: fields.get(&Field::Vers).cloned(),
        name,
    })
}

/// Broadcast on the local network and collect replies for `window`.
pub async fn discover_servers(window: Duration) -> Result<Vec<DiscoveredServer>> {
    let target: SocketAddr = ([255, 255, 255, 255], DISCOVERY_PORT).into();
    discover_at(target, window).await
}

/// Send the discovery request to `target` and collect replies until
/// `window` elapses. Servers are deduplicated by uuid (host when absent).
pub async fn discover_at(target: SocketAddr, window: Duration) -> Result<Vec<DiscoveredServer>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;
    socket.send_to(DISCOVERY_REQUEST, target).await?;
    tracing::debug!("Sent discovery request to {}", target);

    let mut found: HashMap<String, DiscoveredServer> = HashMap::new();
    let mut buf = [0u8; 1024];
    let deadline = tokio::time::Instant::now() + window;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                tracing::debug!("Discovery reply from {}: {} bytes", addr, len);
                if let Some(server) = parse_response(&buf[..len], &addr) {
                    let key = if server.uuid.is_empty() {
                        server.host.clone()
                    } else {
                        server.uuid.clone()
                    };
                    found.insert(key, server);
                }
            }
            Ok(Err(e)) => {
                tracing::warn!("Discovery receive error: {}", e);
                break;
            }
            Err(_) => break,
        }
    }

    let mut servers: Vec<DiscoveredServer> = found.into_values().collect();
    servers.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::info!("Discovery found {} server(s)", servers.len());
    Ok(servers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    fn field(out: &mut Vec<u8>, tag: &[u8; 4], value: &[u8]) {
        out.extend_from_slice(tag);
        out.push(value.len() as u8);
        out.extend_from_slice(value);
    }

    fn source() -> SocketAddr {
        "192.168.1.100:3483".parse().unwrap()
    }

    #[test]
    fn test_empty_and_bad_marker() {
        assert!(parse_response(&[], &source()).is_none());
        assert!(parse_response(b"XNAME\x04test", &source()).is_none());
    }

    #[test]
    fn test_minimal_reply_uses_defaults() {
        let mut reply = vec![b'E'];
        field(&mut reply, b"NAME", b"MyMusic");

        let server = parse_response(&reply, &source()).unwrap();
        assert_eq!(server.name, "MyMusic");
        assert_eq!(server.host, "192.168.1.100");
        assert_eq!(server.http_port, 9000);
        assert_eq!(server.cli_port, 9090);
        assert!(server.uuid.is_empty());
        assert!(server.version.is_none());
    }

    #[test]
    fn test_full_reply() {
        let mut reply = vec![b'E'];
        field(&mut reply, b"IPAD", b"192.168.1.50");
        field(&mut reply, b"NAME", b"Home Music");
        field(&mut reply, b"JSON", b"9001");
        field(&mut reply, b"CLIP", b"9092");
        field(&mut reply, b"UUID", b"12345678-1234-1234-1234-123456789abc");
        field(&mut reply, b"VERS", b"8.5.1");

        let server = parse_response(&reply, &source()).unwrap();
        assert_eq!(server.host, "192.168.1.50");
        assert_eq!(server.http_port, 9001);
        assert_eq!(server.cli_port, 9092);
        assert_eq!(server.uuid, "12345678-1234-1234-1234-123456789abc");
        assert_eq!(server.version.as_deref(), Some("8.5.1"));
        assert_eq!(server.cli_address(), "192.168.1.50:9092");
    }

    #[test]
    fn test_invalid_ports_fall_back() {
        let mut reply = vec![b'e'];
        field(&mut reply, b"NAME", b"Test");
        field(&mut reply, b"JSON", b"abc");
        field(&mut reply, b"CLIP", b"0");

        let server = parse_response(&reply, &source()).unwrap();
        assert_eq!(server.http_port, 9000);
        assert_eq!(server.cli_port, 9090);
    }

    #[test]
    fn test_truncated_or_nameless_reply_is_rejected() {
        let mut reply = vec![b'E'];
        reply.extend_from_slice(b"NAME");
        reply.push(20);
        reply.extend_from_slice(b"test");
        assert!(parse_response(&reply, &source()).is_none());

        let mut reply = vec![b'E'];
        field(&mut reply, b"UUID", b"test");
        assert!(parse_response(&reply, &source()).is_none());
    }

    #[test]
    fn test_version_omitted_from_json_when_unknown() {
        let server = DiscoveredServer {
            host: "192.168.1.50".to_string(),
            name: "My Music".to_string(),
            uuid: "test-uuid".to_string(),
            version: None,
            http_port: 9000,
            cli_port: 9090,
        };
        let json = serde_json::to_string(&server).unwrap();
        assert!(!json.contains("version"));
        let back: DiscoveredServer = serde_json::from_str(&json).unwrap();
        assert_eq!(back, server);
    }

    #[tokio::test]
    async fn test_discover_collects_and_dedups_replies() {
        let responder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = responder.local_addr().unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 256];
            let (len, from) = responder.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..len], DISCOVERY_REQUEST);

            let mut reply = vec![b'E'];
            field(&mut reply, b"NAME", b"Den");
            field(&mut reply, b"UUID", b"abc");
            // Same server answering twice
            responder.send_to(&reply, from).await.unwrap();
            responder.send_to(&reply, from).await.unwrap();
        });

        let servers = discover_at(target, Duration::from_millis(300)).await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "Den");
        assert_eq!(servers[0].host, "127.0.0.1");
    }
}
