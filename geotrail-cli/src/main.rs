use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use geotrail_lib::{
    catalog::SqliteCatalog, config::PipelineConfig, location_log::FileLogSource, LoadCoordinator,
    LoadRequest,
};
use slog::{info, Logger};
use sloggers::{
    terminal::{Destination, TerminalLoggerBuilder},
    types::Severity,
    Build,
};

/// Place photos and videos on a map using a location history export
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path of the media catalog database
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add every image and video below a directory to the catalog
    Index {
        /// Path to directory with media contents
        #[arg(long)]
        media_path: PathBuf,
    },
    /// List the folders that can be selected
    Folders,
    /// Build a timeline and print it as JSON
    Timeline {
        /// Location history export
        #[arg(long)]
        location_history: Option<PathBuf>,
        /// Start of the range, as RFC 3339, YYYY-MM-DD or epoch milliseconds
        #[arg(long, value_parser = parse_time)]
        start: i64,
        /// End of the range, as RFC 3339, YYYY-MM-DD or epoch milliseconds
        #[arg(long, value_parser = parse_time)]
        end: i64,
        /// Only include media from this folder; repeatable
        #[arg(long = "folder")]
        folders: Vec<String>,
        /// JSON file with pipeline settings
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogLevel {
    Trace,
    Debug,
    Info,
    Warning,
    Error,
}

impl From<LogLevel> for Severity {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Severity::Trace,
            LogLevel::Debug => Severity::Debug,
            LogLevel::Info => Severity::Info,
            LogLevel::Warning => Severity::Warning,
            LogLevel::Error => Severity::Error,
        }
    }
}

fn parse_time(value: &str) -> Result<i64, String> {
    if let Ok(ms) = value.parse::<i64>() {
        return Ok(ms);
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.timestamp_millis());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|date| date.and_utc().timestamp_millis())
        .ok_or_else(|| format!("unrecognized time '{value}'"))
}

fn default_db_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "geotrail")
        .context("could not determine a home directory, pass --db-path")?;
    let data_dir = dirs.data_dir();
    fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("catalog.db"))
}

fn build_logger(level: LogLevel) -> Result<Logger> {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(level.into());
    builder.destination(Destination::Stderr);
    builder
        .build()
        .map_err(|e| anyhow!("failed to build logger: {e}"))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let logger = build_logger(args.log_level)?;
    let db_path = match args.db_path {
        Some(path) => path,
        None => default_db_path()?,
    };
    let catalog = SqliteCatalog::open(&db_path)
        .with_context(|| format!("failed to open catalog {}", db_path.display()))?
        .with_logger(logger.clone());

    match args.command {
        Command::Index { media_path } => {
            let added = catalog.add_directory(&media_path)?;
            info!(logger, "indexed media"; "files" => added, "catalog" => db_path.display().to_string());
        }
        Command::Folders => {
            for folder in catalog.folders()? {
                println!("{folder}");
            }
        }
        Command::Timeline {
            location_history,
            start,
            end,
            folders,
            config,
        } => {
            if start > end {
                bail!("start must not be after end");
            }
            let config = match config {
                Some(path) => {
                    let text = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    serde_json::from_str(&text)?
                }
                None => PipelineConfig::default(),
            };
            let coordinator = LoadCoordinator::new(Arc::new(FileLogSource), Arc::new(catalog))
                .with_logger(logger)
                .with_config(config);
            coordinator.submit(LoadRequest {
                start_time: start,
                end_time: end,
                log_source: location_history.into(),
                selected_folders: folders.into_iter().collect(),
            });
            coordinator
                .wait_idle()
                .map_err(|_| anyhow!("timeline worker panicked"))?;

            let state = coordinator.current_state();
            let Some(timeline) = state.result else {
                bail!("timeline load did not complete");
            };
            println!("{}", serde_json::to_string_pretty(&*timeline)?);
        }
    }

    Ok(())
}
