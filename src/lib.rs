//! Barcode Inventory
//!
//! Offline-first stock-taking: load a warehouse spreadsheet, attach scanned
//! barcodes and counted quantities to its items, and export the result. The
//! binary exposes every operation as a subcommand that prints one JSON
//! document on stdout; logs go to stderr and to a daily rolling file.

pub mod api;
pub mod commands;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod ingest;
pub mod model;
pub mod request_cache;
pub mod scanner;
pub mod sync;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::api::ApiClient;
use crate::config::{AppConfig, ConfigOverrides};
use crate::db::LocalStore;
use crate::ingest::ParseMode;
use crate::model::ProductQuery;
use crate::request_cache::RequestCache;
use crate::sync::SyncFacade;

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(
    name = "barcode-inventory",
    version,
    about = "Load a stock spreadsheet, assign scanned barcodes, export the result."
)]
pub struct Cli {
    /// Directory holding the local database and logs.
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Inventory server API URL; selects remote mode.
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Spreadsheet layout: `heuristic` (accounting report) or `strict` (table).
    #[arg(long, global = true, value_name = "MODE")]
    pub parse_mode: Option<ParseMode>,

    /// Pretty-print the JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Load a spreadsheet as the current inventory.
    Ingest { file: PathBuf },
    /// Show the current session.
    Session,
    /// List products.
    Products {
        /// `true` for products with a barcode, `false` for those without.
        #[arg(long)]
        has_barcode: Option<bool>,
        /// Case-insensitive name substring.
        #[arg(long)]
        search: Option<String>,
        #[arg(long, default_value_t = 0)]
        skip: usize,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Assign a barcode (and optionally the counted quantity) to a product.
    Assign {
        id: String,
        barcode: String,
        #[arg(long)]
        qty: Option<f64>,
    },
    /// Remove a product's barcode.
    Clear { id: String },
    /// Read one scan from stdin and assign it to a product.
    Scan {
        id: String,
        #[arg(long)]
        qty: Option<f64>,
    },
    /// Write the inventory with barcodes to a spreadsheet.
    Export { out: PathBuf },
    /// Load the default inventory file.
    LoadDefault { file: Option<PathBuf> },
    /// Refresh the local mirror from the inventory server.
    Pull,
    /// Drop cached responses of older cache generations.
    CacheActivate,
    /// Read or change persisted settings.
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
    /// Version, build and store information.
    About,
}

#[derive(Debug, Subcommand)]
pub enum SettingsAction {
    Get { key: String },
    Set { key: String, value: String },
    List,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Install console + rolling file logging. The returned guard flushes the
/// file writer when dropped.
fn init_logging(log_dir: &std::path::Path) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,barcode_inventory_lib=debug"));

    // Prune old log files before setting up the appender
    diagnostics::prune_old_logs(log_dir);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    if let Err(e) = std::fs::create_dir_all(log_dir) {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();
        warn!("Log directory {} unavailable: {e}", log_dir.display());
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();
    Some(guard)
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref());
    let _guard = init_logging(&diagnostics::get_log_dir(&data_dir));

    info!("Starting Barcode Inventory v{}", env!("CARGO_PKG_VERSION"));

    let pretty = cli.pretty;
    let (output, code) = match execute(cli) {
        Ok(payload) => {
            let ok = payload.get("success").and_then(Value::as_bool).unwrap_or(false);
            (payload, if ok { ExitCode::SUCCESS } else { ExitCode::from(1) })
        }
        Err(e) => {
            tracing::error!("Startup failed: {e:#}");
            (
                serde_json::json!({
                    "success": false,
                    "error": "startup_error",
                    "message": format!("{e:#}"),
                }),
                ExitCode::from(2),
            )
        }
    };

    let rendered = if pretty {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string(&output)
    };
    match rendered {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("failed to render output: {e}");
            return ExitCode::from(2);
        }
    }
    code
}

fn build_facade(store: Arc<LocalStore>, config: &AppConfig) -> anyhow::Result<SyncFacade> {
    let Some(api_url) = &config.api_url else {
        return Ok(SyncFacade::local(store, config.parse_mode));
    };
    let cache = RequestCache::new(store.clone(), config.cache_version.clone(), config.http_timeout)
        .context("failed to build HTTP client")?;
    let api = ApiClient::new(api_url, cache);
    info!(api = %api.base_url(), "Remote mode");
    Ok(SyncFacade::remote(store, api, config.parse_mode))
}

/// Open the store, resolve configuration and run one command. Command
/// failures come back as `{ success: false, .. }` payloads; only startup
/// failures are errors.
pub fn execute(cli: Cli) -> anyhow::Result<Value> {
    let data_dir = config::resolve_data_dir(cli.data_dir.as_deref());
    let store = Arc::new(
        LocalStore::open(&data_dir)
            .with_context(|| format!("failed to open local store in {}", data_dir.display()))?,
    );

    // Settings stay editable even when a stored value is broken.
    if let Command::Settings { action } = &cli.command {
        let result = match action {
            SettingsAction::Get { key } => commands::settings::get(&store, key),
            SettingsAction::Set { key, value } => commands::settings::set(&store, key, value),
            SettingsAction::List => commands::settings::list(&store),
        };
        return Ok(commands::respond(result));
    }

    let overrides = ConfigOverrides {
        data_dir: cli.data_dir.clone(),
        api_url: cli.api_url.clone(),
        parse_mode: cli.parse_mode,
    };
    let config = AppConfig::resolve(&overrides, &store).context("invalid configuration")?;
    let facade = build_facade(store, &config)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = runtime.block_on(async {
        match cli.command {
            Command::Ingest { file } => commands::inventory::ingest(&facade, &file).await,
            Command::Session => commands::inventory::session(&facade, &config).await,
            Command::Products {
                has_barcode,
                search,
                skip,
                limit,
            } => {
                let query = ProductQuery {
                    has_barcode,
                    search,
                    skip,
                    limit,
                };
                commands::inventory::products(&facade, &config, &query).await
            }
            Command::Assign { id, barcode, qty } => {
                commands::barcode::assign(&facade, &id, &barcode, qty).await
            }
            Command::Clear { id } => commands::barcode::clear(&facade, &id).await,
            Command::Scan { id, qty } => {
                let stdin = tokio::io::BufReader::new(tokio::io::stdin());
                commands::barcode::scan(&facade, &id, qty, stdin, "stdin").await
            }
            Command::Export { out } => commands::inventory::export(&facade, &out).await,
            Command::LoadDefault { file } => {
                commands::inventory::load_default(&facade, &config, file.as_deref()).await
            }
            Command::Pull => commands::inventory::pull(&facade).await,
            Command::CacheActivate => commands::inventory::cache_activate(&facade, &config),
            Command::About => commands::inventory::about(&facade, &config),
            Command::Settings { .. } => Err(error::AppError::InvalidInput(
                "settings are handled before configuration".into(),
            )),
        }
    });

    Ok(commands::respond(result))
}
