//! Hub wiring
//!
//! Builds the four backend adapters over simulated providers, the transport
//! controller, the interruption scheduler and the ducking engine, and owns the
//! background tasks that keep them running.
//!
//! Ducking follows whatever reports the live-broadcast state: feed it lines
//! through [`Hub::follow_live_input`] or single reports through
//! [`Hub::apply_live_input`].

use crate::config::HubConfig;
use crate::live_input::LiveInput;
use crate::schedule::ScheduleFile;
use minaret_core::{BackendKind, SettingsStore, SystemClock};
use minaret_playback::{
    BackendSet, BackendTransports, DuckingEngine, HubEvent, InterruptionScheduler, Poller,
    SimulatedTransport, TransportController,
};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Simulated providers, one per backend
#[derive(Debug, Clone)]
pub struct Providers {
    pub local: Arc<SimulatedTransport>,
    pub spotify: Arc<SimulatedTransport>,
    pub youtube: Arc<SimulatedTransport>,
    pub soundcloud: Arc<SimulatedTransport>,
}

impl Providers {
    fn new() -> Self {
        Self {
            local: SimulatedTransport::new(BackendKind::Local),
            spotify: SimulatedTransport::new(BackendKind::Spotify),
            youtube: SimulatedTransport::new(BackendKind::YouTube),
            soundcloud: SimulatedTransport::new(BackendKind::SoundCloud),
        }
    }

    fn transports(&self) -> BackendTransports {
        BackendTransports {
            local: self.local.clone(),
            spotify: self.spotify.clone(),
            youtube: self.youtube.clone(),
            soundcloud: self.soundcloud.clone(),
        }
    }
}

/// Running hub
pub struct Hub {
    pub controller: Arc<TransportController>,
    pub scheduler: Arc<InterruptionScheduler>,
    pub ducking: Arc<DuckingEngine>,
    pub providers: Providers,
    config: HubConfig,
    event_loop: JoinHandle<()>,
    pollers: Vec<Poller>,
}

impl Hub {
    /// Wire everything up; must be called inside a tokio runtime
    pub fn start(config: HubConfig, store: Arc<dyn SettingsStore>, schedule: &ScheduleFile) -> Self {
        let providers = Providers::new();
        let (backends, events) = BackendSet::new(&providers.transports(), &config.adapter_options());
        let pollers = backends.spawn_pollers(&config.poller_config());

        let controller = TransportController::new(
            backends,
            config.playback_config(),
            Some(Arc::clone(&store)),
        );
        let event_loop = controller.spawn_event_loop(events);

        let scheduler = InterruptionScheduler::new(
            Arc::clone(&controller),
            Arc::new(SystemClock),
            schedule.library(&config.paths.audio_dir),
            Some(Arc::clone(&store)),
        );
        scheduler.set_triggers(schedule.triggers(&config.paths.audio_dir));

        let ducking = Arc::new(DuckingEngine::new(Arc::clone(&controller), Some(store)));

        info!(
            prayers = schedule.prayers.len(),
            pollers = pollers.len(),
            "Hub started"
        );

        Self {
            controller,
            scheduler,
            ducking,
            providers,
            config,
            event_loop,
            pollers,
        }
    }

    /// Replace the prayer schedule
    pub fn reload_schedule(&self, schedule: &ScheduleFile) {
        let audio_dir = &self.config.paths.audio_dir;
        self.scheduler.set_library(schedule.library(audio_dir));
        self.scheduler.set_triggers(schedule.triggers(audio_dir));
        info!(prayers = schedule.prayers.len(), "Schedule reloaded");
    }

    /// Run the scheduler and event logging until `shutdown` fires
    pub async fn run(&self, shutdown: CancellationToken) {
        let logger = spawn_event_logger(self.controller.subscribe());
        let scheduler = tokio::spawn(
            Arc::clone(&self.scheduler).run(self.config.tick(), shutdown.clone()),
        );

        shutdown.cancelled().await;
        if let Err(e) = scheduler.await {
            warn!(error = %e, "Scheduler task ended abnormally");
        }
        logger.abort();
        info!("Hub stopped");
    }

    /// Hand one live-broadcast report to the ducking engine
    pub async fn apply_live_input(&self, input: LiveInput) {
        duck(&self.ducking, input).await;
    }

    /// Drive ducking from a line-oriented source until it closes or
    /// `shutdown` fires
    ///
    /// Malformed lines are logged and skipped.
    pub fn follow_live_input<R>(&self, reader: R, shutdown: CancellationToken) -> JoinHandle<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let ducking = Arc::clone(&self.ducking);
        tokio::spawn(async move {
            let mut lines = reader.lines();
            loop {
                let line = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    line = lines.next_line() => line,
                };
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Live input unreadable");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<LiveInput>() {
                    Ok(input) => duck(&ducking, input).await,
                    Err(e) => warn!(error = %e, "Ignoring live input line"),
                }
            }
            debug!("Live input closed");
        })
    }

    /// Stop background tasks
    pub fn shutdown(self) {
        for poller in &self.pollers {
            poller.cancel();
        }
        self.event_loop.abort();
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("controller", &self.controller)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

async fn duck(ducking: &DuckingEngine, input: LiveInput) {
    match input {
        LiveInput::Signal(live) => ducking.set_signal(live).await,
        LiveInput::Level(level) => ducking.set_input_level(level),
    }
}

/// Log every hub event until the channel closes
fn spawn_event_logger(mut events: broadcast::Receiver<HubEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(HubEvent::Error { source, kind, message }) => {
                    warn!(?source, ?kind, %message, "Playback error");
                }
                Ok(HubEvent::ReconnectRequired { source }) => {
                    warn!(%source, "Backend needs to be reconnected");
                }
                Ok(HubEvent::InterruptionChanged { label, phase, outcome, .. }) => {
                    info!(%label, ?phase, ?outcome, "Interruption");
                }
                Ok(event) => debug!(?event, "Hub event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
