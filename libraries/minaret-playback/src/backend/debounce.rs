//! Volume write coalescing for rate-limited providers
//!
//! The first write opens a fixed window; writes inside the window only
//! replace the pending value. When the window closes the latest value is
//! sent. Writes arriving while that send is in flight open the next window.
//! A rate-limited send is retried up to a fixed number of times, then the
//! value is dropped.

use super::transport::Transport;
use minaret_core::{BackendKind, PlaybackError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct Pending {
    latest: Option<u8>,
    window_open: bool,
}

/// Coalesces bursts of volume writes into one provider call per window
pub struct VolumeDebouncer {
    kind: BackendKind,
    window: Duration,
    max_retries: u32,
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
}

impl VolumeDebouncer {
    /// Create a debouncer in front of `transport`
    pub fn new(
        kind: BackendKind,
        transport: Arc<dyn Transport>,
        window: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            kind,
            window,
            max_retries,
            transport,
            pending: Arc::new(Mutex::new(Pending::default())),
        }
    }

    /// Queue a volume write
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, volume: u8) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            pending.latest = Some(volume);
            if pending.window_open {
                return;
            }
            pending.window_open = true;
        }

        let kind = self.kind;
        let window = self.window;
        let max_retries = self.max_retries;
        let transport = Arc::clone(&self.transport);
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            flush_loop(kind, window, max_retries, transport, pending).await;
        });
    }

    /// Whether a write is waiting for its window to close
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .window_open
    }
}

async fn flush_loop(
    kind: BackendKind,
    window: Duration,
    max_retries: u32,
    transport: Arc<dyn Transport>,
    pending: Arc<Mutex<Pending>>,
) {
    let mut delay = window;
    let mut attempt = 0u32;
    loop {
        tokio::time::sleep(delay).await;
        delay = window;

        let value = pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .latest
            .take();
        let Some(volume) = value else {
            close_window(&pending);
            return;
        };

        debug!(source = %kind, volume, "Sending debounced volume");
        match transport.set_volume(volume).await {
            Ok(()) => attempt = 0,
            Err(PlaybackError::RateLimited { retry_after_ms }) if attempt < max_retries => {
                attempt += 1;
                warn!(source = %kind, volume, attempt, ?retry_after_ms, "Volume write rate limited, retrying");
                {
                    let mut guard = pending.lock().unwrap_or_else(PoisonError::into_inner);
                    guard.latest.get_or_insert(volume);
                }
                if let Some(ms) = retry_after_ms {
                    delay = delay.max(Duration::from_millis(ms));
                }
                continue;
            }
            Err(PlaybackError::RateLimited { .. }) => {
                warn!(source = %kind, volume, attempts = attempt + 1, "Volume write still rate limited, dropping it");
                attempt = 0;
            }
            Err(e) => {
                warn!(source = %kind, volume, error = %e, "Volume write failed");
                attempt = 0;
            }
        }

        let drained = {
            let mut guard = pending.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.latest.is_none() {
                guard.window_open = false;
            }
            !guard.window_open
        };
        if drained {
            return;
        }
    }
}

fn close_window(pending: &Mutex<Pending>) {
    let mut guard = pending.lock().unwrap_or_else(PoisonError::into_inner);
    guard.window_open = false;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transport::MockTransport;
    use mockall::predicate::eq;

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_to_latest_value() {
        let mut transport = MockTransport::new();
        transport
            .expect_set_volume()
            .with(eq(50))
            .times(1)
            .returning(|_| Ok(()));
        let debouncer = VolumeDebouncer::new(
            BackendKind::Spotify,
            Arc::new(transport),
            Duration::from_millis(300),
            3,
        );

        debouncer.submit(80);
        tokio::time::sleep(Duration::from_millis(100)).await;
        debouncer.submit(70);
        tokio::time::sleep(Duration::from_millis(50)).await;
        debouncer.submit(60);
        tokio::time::sleep(Duration::from_millis(50)).await;
        debouncer.submit(50);
        assert!(debouncer.is_pending());

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn separate_windows_send_separately() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_set_volume()
            .with(eq(30))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        transport
            .expect_set_volume()
            .with(eq(90))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let debouncer = VolumeDebouncer::new(
            BackendKind::SoundCloud,
            Arc::new(transport),
            Duration::from_millis(300),
            3,
        );

        debouncer.submit(30);
        tokio::time::sleep(Duration::from_secs(1)).await;
        debouncer.submit(90);
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_write_is_retried() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_set_volume()
            .with(eq(40))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(PlaybackError::RateLimited {
                    retry_after_ms: Some(1_000),
                })
            });
        transport
            .expect_set_volume()
            .with(eq(40))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let debouncer = VolumeDebouncer::new(
            BackendKind::Spotify,
            Arc::new(transport),
            Duration::from_millis(300),
            3,
        );

        debouncer.submit(40);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_rate_limit_gives_up_after_retries() {
        let mut transport = MockTransport::new();
        transport
            .expect_set_volume()
            .with(eq(25))
            .times(3)
            .returning(|_| {
                Err(PlaybackError::RateLimited {
                    retry_after_ms: Some(500),
                })
            });
        let debouncer = VolumeDebouncer::new(
            BackendKind::YouTube,
            Arc::new(transport),
            Duration::from_millis(300),
            2,
        );

        debouncer.submit(25);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!debouncer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn newer_value_survives_a_dropped_write() {
        let mut transport = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_set_volume()
            .with(eq(10))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(PlaybackError::RateLimited { retry_after_ms: None }));
        transport
            .expect_set_volume()
            .with(eq(10))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(PlaybackError::RateLimited { retry_after_ms: None }));
        transport
            .expect_set_volume()
            .with(eq(70))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let debouncer = VolumeDebouncer::new(
            BackendKind::SoundCloud,
            Arc::new(transport),
            Duration::from_millis(300),
            1,
        );

        debouncer.submit(10);
        tokio::time::sleep(Duration::from_millis(700)).await;
        debouncer.submit(70);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!debouncer.is_pending());
    }
}
