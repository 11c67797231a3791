//! ChatSentry - scheduled policy scanner for monitored group chats
//!
//! Runs periodic scan cycles over exported chat history: classifies
//! messages with an LLM, transcribes voice notes, reconciles member
//! rosters, and reports incidents via CSV files and webhook alerts.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (config, store, scan failure in --once mode)

mod analysis;
mod cli;
mod config;
mod error;
mod health;
mod llm;
mod models;
mod registry;
mod replay;
mod scan;
mod sinks;
mod sources;
mod store;
mod whisper;

use anyhow::{Context, Result};
use cli::Args;
use config::Config;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("ChatSentry v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Fatal: {}", e);
            eprintln!("\n❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default chatsentry.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new("chatsentry.toml");

    if path.exists() {
        eprintln!("⚠️  chatsentry.toml already exists. Remove it first or edit it manually.");
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).context("Failed to write chatsentry.toml")?;

    println!("✅ Created chatsentry.toml with default settings.");
    println!("   Add your monitored chats under [[chats]] and set API keys.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from chatsentry.toml");
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let store = store::StateStore::open(Path::new(&config.storage.db_path))
        .await
        .context("Failed to open the state store")?;

    // Handle --prune-days: maintenance command, then exit.
    if let Some(days) = args.prune_days {
        let removed = store
            .prune_processed_markers(days)
            .await
            .context("Failed to prune processed markers")?;
        println!("✅ Pruned {} processed markers older than {} days.", removed, days);
        return Ok(());
    }

    let export_dir = args
        .export_dir
        .as_deref()
        .context("An export directory is required")?;
    let export = Arc::new(
        replay::ExportSource::load(export_dir).context("Failed to load chat exports")?,
    );

    if config.chats.is_empty() {
        warn!("No chats configured under [[chats]]; nothing will be scanned");
    }

    let classifier = Arc::new(
        llm::LlmClassifier::new(config.llm.clone())
            .context("Failed to build the classifier client")?,
    );
    let transcriber = Arc::new(
        whisper::WhisperTranscriber::new(config.whisper.clone())
            .context("Failed to build the transcription client")?,
    );
    let reporting = Arc::new(
        sinks::CsvReportSink::new(&config.report).context("Failed to set up the CSV report sink")?,
    );
    let notifier = Arc::new(
        sinks::WebhookNotifier::new(&config.report)
            .context("Failed to set up the webhook notifier")?,
    );
    let registry = Arc::new(registry::ConfigRegistry::new(config.chats.clone()));

    let analyzer = analysis::analyzer::ChatAnalyzer::new(
        classifier,
        transcriber,
        store.clone(),
        config.app.chunk_size,
        config.whisper.language.clone(),
    );
    let job = Arc::new(scan::ScanJob::new(
        &config,
        export.clone(),
        export.clone(),
        registry,
        reporting,
        notifier.clone(),
        analyzer,
        store.clone(),
    ));
    let monitor = health::HealthMonitor::new(
        export,
        notifier,
        store,
        Duration::from_secs(config.app.call_timeout_seconds),
        config.app.admin_recipient,
    );

    if args.once {
        let report = job
            .run_cycle()
            .await
            .map_err(|e| anyhow::anyhow!("Scan cycle failed: {}", e))?;

        println!("\n📊 Scan Summary:");
        println!("   Chats scanned: {}", report.chats_scanned);
        println!(
            "   Messages: {} ({} voices transcribed)",
            report.total_messages, report.total_voices
        );
        println!(
            "   Incidents: {} - 🔴 {} | 🟠 {} | 🟡 {} | 🟢 {}",
            report.total_incidents,
            report.critical_incidents,
            report.high_incidents,
            report.medium_incidents,
            report.low_incidents
        );
        if report.missing_participants > 0 || report.extra_participants > 0 {
            println!(
                "   Roster: {} missing, {} extra",
                report.missing_participants, report.extra_participants
            );
        }
        println!("   Duration: {:.1}s", report.duration_seconds);
        return Ok(());
    }

    run_scheduler(&config, job, monitor).await
}

/// Scheduler loop: scan on startup and then on the configured interval,
/// with independent periodic health sweeps, until Ctrl-C.
async fn run_scheduler(
    config: &Config,
    job: Arc<scan::ScanJob>,
    monitor: health::HealthMonitor,
) -> Result<()> {
    let scan_period = Duration::from_secs(config.app.scan_interval_hours * 3600);
    let health_period = Duration::from_secs(config.app.health_interval_minutes * 60);
    info!(
        "Scheduling scans every {}h with health sweeps every {}m",
        config.app.scan_interval_hours, config.app.health_interval_minutes
    );

    let mut scan_ticker = tokio::time::interval(scan_period);
    scan_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut health_ticker = tokio::time::interval(health_period);
    health_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = scan_ticker.tick() => {
                if let Err(e) = job.run_cycle().await {
                    error!("Scan cycle failed: {}", e);
                }
            }
            _ = health_ticker.tick() => {
                monitor.sweep().await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                return Ok(());
            }
        }
    }
}
