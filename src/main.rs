//! ClimEasy - rainfall analysis workflow server
//!
//! Serves the region and upload workflows over HTTP and keeps the upload
//! and output directories swept of stale files.
//!
//! Exit codes:
//!   0 - Clean shutdown (or a completed --sweep-once / --init-config)
//!   1 - Startup or runtime error (bad arguments, config, bind failure, etc.)

use anyhow::{Context, Result};
use climeasy::cli::Args;
use climeasy::config::{Config, DEFAULT_CONFIG_FILE};
use climeasy::retention::{LeaseTable, RetentionSweeper, SweepReport, SweeperHandle};
use climeasy::server::{self, AppState};
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

    info!("ClimEasy v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("ClimEasy failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .climeasy.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize directories, retention, and analysis commands.");
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

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load configuration, prepare directories, then serve until Ctrl-C.
async fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate().context("Invalid configuration")?;

    for dir in [&config.storage.upload_dir, &config.storage.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    // Handle --sweep-once: one pass over both directories, then exit
    if args.sweep_once {
        println!("🧹 Sweeping files older than {}s...", config.retention.max_age_seconds);
        for report in sweep_all(&config, None).await? {
            print_sweep_report(&report);
        }
        println!("\n✅ Sweep complete.");
        return Ok(());
    }

    let leases = LeaseTable::new(config.retention.lease_grace());

    if config.retention.sweep_on_startup {
        for report in sweep_all(&config, Some(&leases)).await? {
            info!(
                "Startup sweep of {}: {} deleted, {} retained",
                report.directory.display(),
                report.deleted.len(),
                report.retained()
            );
        }
    }

    let sweepers: Vec<SweeperHandle> = if config.retention.enabled {
        config
            .retention_policies()
            .into_iter()
            .map(|policy| RetentionSweeper::new(policy).with_leases(leases.clone()).start())
            .collect()
    } else {
        warn!("Retention sweeping disabled; files will accumulate");
        Vec::new()
    };

    let state = AppState::from_config(&config).with_leases(leases);
    let addr = config.bind_address();

    let served = server::serve(state, &addr, shutdown_signal()).await;

    // Stop sweepers even when the server failed to start
    futures::future::join_all(sweepers.into_iter().map(SweeperHandle::stop)).await;
    info!("ClimEasy stopped");

    served
}

/// One blocking sweep per configured directory.
async fn sweep_all(config: &Config, leases: Option<&LeaseTable>) -> Result<Vec<SweepReport>> {
    let sweepers: Vec<RetentionSweeper> = config
        .retention_policies()
        .into_iter()
        .map(|policy| match leases {
            Some(leases) => RetentionSweeper::new(policy).with_leases(leases.clone()),
            None => RetentionSweeper::new(policy),
        })
        .collect();

    tokio::task::spawn_blocking(move || sweepers.iter().map(RetentionSweeper::sweep_once).collect())
        .await
        .context("Sweep task panicked")
}

fn print_sweep_report(report: &SweepReport) {
    println!("\n📁 {}", report.directory.display());
    println!(
        "   Scanned: {} | Deleted: {} | Leased: {} | Failed: {}",
        report.scanned,
        report.deleted.len(),
        report.leased,
        report.failures.len()
    );
    for path in &report.deleted {
        println!("     🗑️  {}", path.display());
    }
    for failure in &report.failures {
        println!("     ⚠️  {}", failure);
    }
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
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
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
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
