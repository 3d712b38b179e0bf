/// Minaret Hub - masjid playback hub
use chrono::{Local, TimeZone, Utc};
use clap::{Parser, Subcommand};
use minaret_core::SettingsStore;
use minaret_hub::{Hub, HubConfig, ScheduleFile, TomlSettingsStore};
use minaret_playback::SchedulerSettings;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minaret-hub")]
#[command(about = "Multi-source playback hub with prayer-time interruptions", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "MINARET_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub until interrupted
    Run {
        /// Read live-broadcast reports (`on`, `off`, `level N`) from stdin
        #[arg(long)]
        live_stdin: bool,
    },
    /// Print the upcoming prayer schedule
    Schedule,
    /// Fire one interruption now and exit when it resolves
    TestAzan {
        /// Prayer label, selects the audio
        label: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "minaret_hub=info,minaret_playback=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = HubConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { live_stdin } => run(config, live_stdin).await?,
        Commands::Schedule => print_schedule(&config)?,
        Commands::TestAzan { label } => test_azan(config, &label).await?,
    }

    Ok(())
}

fn open_store(config: &HubConfig) -> anyhow::Result<Arc<dyn SettingsStore>> {
    let store = TomlSettingsStore::open(&config.paths.settings_file)?;
    Ok(Arc::new(store))
}

fn load_schedule(config: &HubConfig) -> ScheduleFile {
    match ScheduleFile::load(&config.paths.schedule_file) {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::warn!(error = %e, "No usable schedule, running without interruptions");
            ScheduleFile::default()
        }
    }
}

async fn run(config: HubConfig, live_stdin: bool) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let schedule = load_schedule(&config);
    let hub = Hub::start(config, store, &schedule);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
        }
        signal.cancel();
    });

    let live = live_stdin.then(|| {
        tracing::info!("Following live-broadcast reports on stdin");
        hub.follow_live_input(BufReader::new(tokio::io::stdin()), shutdown.clone())
    });

    hub.run(shutdown).await;
    if let Some(live) = live {
        live.abort();
    }
    hub.shutdown();
    Ok(())
}

fn print_schedule(config: &HubConfig) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let settings = SchedulerSettings::load(store.as_ref());
    let schedule = ScheduleFile::load(&config.paths.schedule_file)?;

    let upcoming = schedule.upcoming(Utc::now(), &settings);
    if upcoming.is_empty() {
        println!("No upcoming prayers");
        return Ok(());
    }

    println!("Upcoming prayers (lead time {}s):", settings.lead_time_sec);
    for prayer in upcoming {
        let fires = Local
            .timestamp_millis_opt(prayer.fires_at_epoch_ms)
            .single()
            .map_or_else(|| "?".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        println!("  {:<10} {}  (fires {})", prayer.label, prayer.at, fires);
    }
    Ok(())
}

async fn test_azan(config: HubConfig, label: &str) -> anyhow::Result<()> {
    let store = open_store(&config)?;
    let schedule = load_schedule(&config);
    let hub = Hub::start(config, store, &schedule);

    let outcome = hub.scheduler.trigger_now(label).await?;
    println!("{label}: {outcome:?}");

    hub.shutdown();
    Ok(())
}
