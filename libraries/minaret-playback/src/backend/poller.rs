//! Status polling for remote backends
//!
//! Remote providers do not push events, so each gets a background task that
//! queries status on an interval with a little jitter, letting the adapter
//! detect end-of-track and changes made on the provider's own apps.

use super::adapter::BackendAdapter;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polling cadence
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Base interval between polls
    pub interval: Duration,
    /// Maximum random delay added to each interval
    pub jitter: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            jitter: Duration::from_millis(200),
        }
    }
}

/// Background polling task; stops when cancelled or dropped
#[derive(Debug)]
pub struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start polling `adapter`
    pub fn spawn(adapter: Arc<BackendAdapter>, config: PollerConfig) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            debug!(source = %adapter.kind(), "Status poller started");
            loop {
                let delay = config.interval + jitter(config.jitter);
                tokio::select! {
                    () = token.cancelled() => break,
                    () = tokio::time::sleep(delay) => adapter.poll_once().await,
                }
            }
            debug!(source = %adapter.kind(), "Status poller stopped");
        });
        Self { cancel, handle }
    }

    /// Stop polling
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the task has exited
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}
