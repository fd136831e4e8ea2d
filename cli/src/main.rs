use anyhow::Result;
use chrono::Local;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use roster_core::export::{players_to_json, write_players_xlsx};
use roster_core::file_utils::read_sheet_file;
use roster_core::models::{fields, parse_timestamp, Document, SheetKind};
use roster_core::screenshot::{keys, VisionClient};
use roster_core::upload::failure_message;
use roster_core::{RosterConfig, SqliteStore, Uploader};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG_FILE: &str = "roster.toml";

#[derive(Parser)]
#[command(
    name = "roster",
    version = "0.1.0",
    about = "Track guild roster uploads, player history and screenshot stats",
    long_about = None
)]
struct Cli {
    /// Path to TOML configuration file (defaults to ./roster.toml when present)
    #[arg(long, global = true, env = "ROSTER_CONFIG")]
    config: Option<PathBuf>,

    /// Path to SQLite database file (overrides the config file)
    #[arg(long, global = true, env = "ROSTER_DATABASE")]
    database: Option<PathBuf>,

    /// Path to log file
    #[arg(long, global = true, default_value = "/tmp/roster.log")]
    log_file: PathBuf,

    /// Verbosity level (repeat for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a kill sheet CSV and reconcile it against stored players
    UploadKills {
        /// Kill sheet CSV file
        file: PathBuf,
    },

    /// Upload a hunting CSV, replacing each player's hunting statistics
    UploadHunting {
        /// Hunting CSV file
        file: PathBuf,
    },

    /// List stored players
    List,

    /// Show a player's history snapshots, newest first
    History {
        player_id: String,
    },

    /// Set the notes on a stored player
    SetNote {
        player_id: String,
        note: String,
    },

    /// Export all players as JSON
    ExportJson {
        #[arg(long, short, default_value = "lords_mobile_players.json")]
        output: PathBuf,
    },

    /// Export all players as an XLSX workbook
    ExportXlsx {
        #[arg(long, short, default_value = "lords_mobile_players.xlsx")]
        output: PathBuf,
    },

    /// Read name, might and kills off a screenshot and record them
    AnalyzeScreenshot {
        /// Screenshot image file
        image: PathBuf,
    },

    /// List players tracked from screenshots
    ListScreenshots,

    /// Delete a screenshot-tracked player by key
    DeleteScreenshot {
        key: String,
    },
}

fn setup_logging(verbose: u8, log_file: &Path) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let filter_level = match verbose {
        0 => tracing::Level::ERROR,
        1 => tracing::Level::WARN,
        2 => tracing::Level::INFO,
        3 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(filter_level.into());

    let file_appender = tracing_appender::rolling::never(
        log_file.parent().unwrap_or(Path::new(".")),
        log_file.file_name().unwrap_or(std::ffi::OsStr::new("roster.log")),
    );
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::Layer::new().with_writer(std::io::stderr).with_ansi(true))
        .with(fmt::Layer::new().with_writer(non_blocking).with_ansi(false));

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(guard)
}

fn load_config(cli: &Cli) -> Result<RosterConfig> {
    let mut config = match &cli.config {
        Some(path) => RosterConfig::from_file(path)?,
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
            RosterConfig::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => RosterConfig::default(),
    };
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    Ok(config)
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run `work` behind a spinner that is cleared whatever the outcome.
fn with_spinner<T>(message: String, work: impl FnOnce() -> T) -> T {
    let pb = spinner(message);
    let result = work();
    pb.finish_and_clear();
    result
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(value) => match (parse_timestamp(value), value) {
            (Some(ts), _) => ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string(),
            (None, Value::String(s)) => s.clone(),
            (None, other) => other.to_string(),
        },
    }
}

fn print_players(players: &[Document]) {
    println!(
        "{:<12} {:<24} {:>14} {:>10} {:>14} {:>12}  {}",
        "ID", "Name", "Might", "Kills", "Might Gained", "Kills Gained", "Notes"
    );
    for player in players {
        println!(
            "{:<12} {:<24} {:>14} {:>10} {:>14} {:>12}  {}",
            display_value(player.get(fields::ID)),
            display_value(player.get(fields::NAME)),
            display_value(player.get(fields::MIGHT)),
            display_value(player.get(fields::KILLS)),
            display_value(player.get(fields::MIGHT_GAINED)),
            display_value(player.get(fields::KILLS_GAINED)),
            display_value(player.get(fields::NOTES)),
        );
    }
}

fn upload(uploader: &Uploader<SqliteStore>, sheet: SheetKind, file: &Path) -> Result<()> {
    let label = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());

    let result = with_spinner(format!("Processing {}...", label), || -> roster_core::Result<_> {
        let text = read_sheet_file(file)?;
        match sheet {
            SheetKind::Kills => uploader.process_kill_sheet(&text),
            SheetKind::Hunting => uploader.process_hunting_sheet(&text),
        }
    });

    match result {
        Ok(report) => {
            println!("{}", report.message());
            if report.rows_skipped > 0 {
                println!("Skipped {} invalid rows (see the log for details).", report.rows_skipped);
            }
            if report.history_entries > 0 {
                println!("Recorded {} history snapshots.", report.history_entries);
            }
            if !report.duplicate_ids.is_empty() {
                println!(
                    "Warning: repeated player IDs, later rows won: {}",
                    report.duplicate_ids.join(", ")
                );
            }
            Ok(())
        }
        Err(e) => anyhow::bail!("{}", failure_message(sheet, &e)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _guard = setup_logging(cli.verbose, &cli.log_file)?;

    info!("Starting roster CLI");

    let config = load_config(&cli)?;
    let store = SqliteStore::open(&config.database)?;
    let uploader = Uploader::new(store, config);

    match &cli.command {
        Commands::UploadKills { file } => upload(&uploader, SheetKind::Kills, file)?,
        Commands::UploadHunting { file } => upload(&uploader, SheetKind::Hunting, file)?,
        Commands::List => {
            let players = uploader.list_players()?;
            if players.is_empty() {
                println!("No players stored yet. Upload a kill sheet first.");
            } else {
                print_players(&players);
            }
        }
        Commands::History { player_id } => {
            let entries = uploader.player_history(player_id)?;
            if entries.is_empty() {
                println!("No history recorded for player {}.", player_id);
            }
            for entry in &entries {
                println!(
                    "{}  {:<24} might {:>14}  kills {:>10}  (gained {} / {})",
                    display_value(entry.get(fields::SNAPSHOT_TIME)),
                    display_value(entry.get(fields::NAME)),
                    display_value(entry.get(fields::MIGHT)),
                    display_value(entry.get(fields::KILLS)),
                    display_value(entry.get(fields::MIGHT_GAINED)),
                    display_value(entry.get(fields::KILLS_GAINED)),
                );
            }
        }
        Commands::SetNote { player_id, note } => {
            uploader.save_note(player_id, note)?;
            println!("Notes saved for player {}.", player_id);
        }
        Commands::ExportJson { output } => {
            let players = uploader.list_players()?;
            let json = players_to_json(&players, &Local)?;
            std::fs::write(output, json)?;
            println!("Wrote JSON to {}", output.display());
        }
        Commands::ExportXlsx { output } => {
            let players = uploader.list_players()?;
            write_players_xlsx(&players, &Local, output)?;
            println!("Wrote XLSX to {}", output.display());
        }
        Commands::AnalyzeScreenshot { image } => {
            let client = VisionClient::from_config(&uploader.config().vision)?;
            let bytes = std::fs::read(image)?;

            let pb = spinner("Analyzing image with AI... this may take a moment.".to_string());
            let extracted = client.extract(&bytes).await;
            pb.finish_and_clear();

            let stats = extracted?;
            uploader.record_screenshot(&stats)?;
            println!("Successfully processed stats for {}.", stats.name);
        }
        Commands::ListScreenshots => {
            let players = uploader.list_screenshot_players()?;
            if players.is_empty() {
                println!("No screenshot players tracked yet.");
            }
            for (key, player) in &players {
                println!(
                    "{:<20} {:<24} might {:>14} (+{})  kills {:>10} (+{})",
                    key,
                    display_value(player.get(keys::PLAYER_NAME)),
                    display_value(player.get(keys::CURRENT_MIGHT)),
                    display_value(player.get(keys::MIGHT_GAIN)),
                    display_value(player.get(keys::CURRENT_KILLS)),
                    display_value(player.get(keys::KILLS_GAIN)),
                );
            }
        }
        Commands::DeleteScreenshot { key } => {
            uploader.delete_screenshot_player(key)?;
            println!("Player data deleted.");
        }
    }

    info!("Roster CLI finished");
    Ok(())
}
