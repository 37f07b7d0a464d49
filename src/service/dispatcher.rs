//! Command dispatcher
//!
//! All outgoing traffic goes through one bounded queue drained by a single
//! writer task, so bytes reach the socket in enqueue order. Correlation ids
//! are allocated while the lane lock is held, which keeps id order and wire
//! order identical.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::codec;

/// Depth of the outgoing queue.
pub const OUTGOING_CAPACITY: usize = 256;

pub struct Dispatcher {
    lane: Mutex<Option<mpsc::Sender<String>>>,
    next_id: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            lane: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open a fresh lane; the returned receiver feeds [`write_loop`].
    pub fn attach(&self) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(OUTGOING_CAPACITY);
        let mut lane = self.lane.lock().unwrap_or_else(|e| e.into_inner());
        *lane = Some(tx);
        rx
    }

    /// Close the lane. The writer task drains what is queued and exits.
    pub fn detach(&self) {
        let mut lane = self.lane.lock().unwrap_or_else(|e| e.into_inner());
        lane.take();
    }

    /// Correlation id the next command will carry.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    fn enqueue(tx: &mpsc::Sender<String>, line: String) -> bool {
        match tx.try_send(line) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(line)) => {
                warn!("Outgoing queue full, dropping: {}", redact(&line));
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Outgoing lane closed");
                false
            }
        }
    }

    /// Send one command with a fresh correlation id. `on_id` runs before
    /// the line is queued, while no other sender can interleave.
    pub fn send_command_with<F>(&self, command: &str, on_id: F) -> Option<u64>
    where
        F: FnOnce(u64),
    {
        let lane = self.lane.lock().unwrap_or_else(|e| e.into_inner());
        let tx = lane.as_ref()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        on_id(id);
        let line = format!("{} {}", command, codec::tagged("correlationid", &id.to_string()));
        Self::enqueue(tx, line).then_some(id)
    }

    /// Fire-and-forget single command.
    pub fn send_command(&self, command: &str) -> Option<u64> {
        self.send_command_with(command, |_| {})
    }

    /// Command addressed to `player_id`.
    pub fn send_player_command(&self, player_id: &str, command: &str) -> Option<u64> {
        self.send_command(&format!("{} {}", codec::encode(player_id), command))
    }

    /// Send several commands back to back, without correlation ids.
    pub fn send_batch(&self, commands: &[String]) -> bool {
        if commands.is_empty() {
            return true;
        }
        let lane = self.lane.lock().unwrap_or_else(|e| e.into_inner());
        match lane.as_ref() {
            Some(tx) => Self::enqueue(tx, commands.join("\n")),
            None => false,
        }
    }
}

/// Hide credentials before a line reaches the log.
fn redact(line: &str) -> String {
    let mut out = Vec::new();
    for segment in line.split('\n') {
        match segment.strip_prefix("login ") {
            Some(rest) => {
                let user = rest.split(' ').next().unwrap_or_default();
                out.push(format!("login {} ******", user));
            }
            None => out.push(segment.to_string()),
        }
    }
    out.join("\n")
}

/// Drain the outgoing queue onto the socket until the lane closes or
/// `shutdown` fires.
pub async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
    shutdown: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => {
                let Some(line) = next else {
                    break;
                };
                debug!(">> {}", redact(&line));
                writer.write_all(line.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!("Writer shutdown: {}", e);
    }
    info!("Command writer stopped");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_send_without_lane_fails() {
        let dispatcher = Dispatcher::new();
        assert_eq!(dispatcher.send_command("listen 1"), None);
        assert!(!dispatcher.send_batch(&["listen 1".to_string()]));
        // Ids are only consumed by commands that reached a lane
        assert_eq!(dispatcher.peek_next_id(), 1);
    }

    #[tokio::test]
    async fn test_correlation_ids_increase_in_wire_order() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.attach();

        assert_eq!(dispatcher.send_command("players 0 20"), Some(1));
        assert_eq!(dispatcher.send_command("albums 0 20 tags:l"), Some(2));

        assert_eq!(rx.recv().await.unwrap(), "players 0 20 correlationid:1");
        assert_eq!(rx.recv().await.unwrap(), "albums 0 20 tags:l correlationid:2");
        assert_eq!(dispatcher.peek_next_id(), 3);
    }

    #[tokio::test]
    async fn test_on_id_runs_before_queueing() {
        let dispatcher = Dispatcher::new();
        let _rx = dispatcher.attach();
        let mut seen = None;
        let id = dispatcher.send_command_with("songs 0 20", |id| seen = Some(id));
        assert_eq!(id, seen);
    }

    #[tokio::test]
    async fn test_player_command_is_escaped() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.attach();
        dispatcher.send_player_command("00:04:20:aa:bb:cc", "pause 1");
        assert_eq!(
            rx.recv().await.unwrap(),
            "00%3A04%3A20%3Aaa%3Abb%3Acc pause 1 correlationid:1"
        );
    }

    #[tokio::test]
    async fn test_batch_is_one_contiguous_write() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.attach();
        assert!(dispatcher.send_batch(&["listen 1".to_string(), "can randomplay ?".to_string()]));
        assert_eq!(rx.recv().await.unwrap(), "listen 1\ncan randomplay ?");
    }

    #[test]
    fn test_detach_closes_lane() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.attach();
        assert!(dispatcher.send_command("listen 1").is_some());
        dispatcher.detach();
        assert!(dispatcher.send_command("listen 0").is_none());
        assert_eq!(rx.try_recv().unwrap(), "listen 1 correlationid:1");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_redact_login() {
        assert_eq!(redact("login admin s3cret"), "login admin ******");
        assert_eq!(
            redact("login admin s3cret\nlisten 1"),
            "login admin ******\nlisten 1"
        );
        assert_eq!(redact("listen 1"), "listen 1");
    }
}
