//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use clap::Parser;
use std::path::PathBuf;

/// ChatSentry - scheduled policy scanner for monitored group chats
///
/// Scans exported chat history for policy violations using an
/// LLM classifier, transcribes voice notes, reconciles member rosters,
/// and reports incidents via CSV files and webhook alerts.
///
/// Examples:
///   chatsentry --export-dir ./exports --once
///   chatsentry --export-dir ./exports --config chatsentry.toml
///   chatsentry --export-dir ./exports --interval-hours 2 --model gpt-4o
///   chatsentry --prune-days 30
///   chatsentry --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Directory of chat export files to scan
    ///
    /// One JSON document per chat. Not required for --init-config
    /// or --prune-days.
    #[arg(
        short,
        long,
        value_name = "DIR",
        required_unless_present_any = ["init_config", "prune_days"]
    )]
    pub export_dir: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for chatsentry.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to the SQLite state database
    ///
    /// Overrides storage.db_path from the config file.
    #[arg(long, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Hours between scan cycles (also the collection lookback window)
    ///
    /// Overrides app.scan_interval_hours from the config file.
    #[arg(long, value_name = "HOURS")]
    pub interval_hours: Option<u64>,

    /// Classifier model to use
    ///
    /// Overrides llm.model from the config file.
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<String>,

    /// API key for the classification endpoint
    #[arg(long, value_name = "KEY", env = "CHATSENTRY_LLM_KEY", hide_env_values = true)]
    pub llm_key: Option<String>,

    /// API key for the transcription endpoint
    #[arg(
        long,
        value_name = "KEY",
        env = "CHATSENTRY_WHISPER_KEY",
        hide_env_values = true
    )]
    pub whisper_key: Option<String>,

    /// Run a single scan cycle and exit instead of scheduling
    #[arg(long)]
    pub once: bool,

    /// Prune processed-message markers older than this many days, then exit
    #[arg(long, value_name = "DAYS")]
    pub prune_days: Option<u32>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default chatsentry.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(interval) = self.interval_hours {
            if interval == 0 {
                return Err("Scan interval must be at least 1 hour".to_string());
            }
        }

        if let Some(ref dir) = self.export_dir {
            if !dir.exists() {
                return Err(format!("Export directory does not exist: {}", dir.display()));
            }
            if !dir.is_dir() {
                return Err(format!("Export path is not a directory: {}", dir.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
