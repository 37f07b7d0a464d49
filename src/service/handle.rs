//! SessionHandle - runs a server session with reconnect on transport loss
//!
//! A session that returns `Err` is restarted after an exponential backoff;
//! `Ok` means it ended on purpose (explicit disconnect, rejected login) and
//! is not retried. Sessions never implement their own retry loops.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// One connect-handshake-read cycle against the server.
#[async_trait]
pub trait SessionLogic: Send + Sync + 'static {
    /// Short label for logs (the server address)
    fn label(&self) -> String;

    /// Run until the socket closes (`Err`) or the session should end for
    /// good (`Ok`). Must return promptly once `shutdown` is cancelled.
    async fn run(&self, shutdown: CancellationToken) -> Result<()>;
}

/// Reconnect backoff
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Initial delay between retry attempts
    pub initial_delay: Duration,
    /// Maximum delay (backoff caps at this value)
    pub max_delay: Duration,
    /// A session that lasted at least this long resets the backoff
    pub stable_run_threshold: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            stable_run_threshold: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            stable_run_threshold: Duration::from_secs(30),
        }
    }
}

pub struct SessionHandle<T: SessionLogic> {
    logic: Arc<T>,
    shutdown: CancellationToken,
}

impl<T: SessionLogic> SessionHandle<T> {
    pub fn new(logic: T, shutdown: CancellationToken) -> Self {
        Self {
            logic: Arc::new(logic),
            shutdown,
        }
    }

    /// Single attempt, no retry.
    pub async fn run(self) -> Result<()> {
        let label = self.logic.label();
        let result = self.run_once().await;
        info!("{}: session ended", label);
        result
    }

    /// Run with automatic reconnect on error.
    pub async fn run_with_retry(self, config: RetryConfig) -> Result<()> {
        let label = self.logic.label();
        let mut delay = config.initial_delay;

        loop {
            if self.shutdown.is_cancelled() {
                info!("{}: shutdown before attempt", label);
                break;
            }

            let start = Instant::now();
            match self.run_once().await {
                Ok(()) => {
                    info!("{}: session ended", label);
                    break;
                }
                Err(e) => {
                    let run_duration = start.elapsed();

                    // Reset backoff if we had a stable run before failing
                    if run_duration >= config.stable_run_threshold {
                        info!(
                            "{}: connected for {:?} before failure, resetting backoff",
                            label, run_duration
                        );
                        delay = config.initial_delay;
                    }

                    warn!("{}: {} - reconnecting in {:?}", label, e, delay);

                    tokio::select! {
                        _ = self.shutdown.cancelled() => {
                            info!("{}: shutdown during backoff", label);
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {
                            delay = (delay * 2).min(config.max_delay);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn run_once(&self) -> Result<()> {
        tokio::select! {
            result = self.logic.run(self.shutdown.clone()) => result,
            _ = self.shutdown.cancelled() => Ok(()),
        }
    }
}
