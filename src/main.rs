/**
 * # Tally - Ledger Worker Runtime
 *
 * The binary wraps the ledger engine in a long-running worker process: it
 * loads configuration, opens the store, starts the worker pool, and drives
 * everything to a clean shutdown on SIGINT (or after `--duration` seconds,
 * which exists for testing).
 *
 * ## Usage
 *
 * ```bash
 * # Run with config.yaml discovered next to the executable
 * tally
 *
 * # Override the data directory
 * tally --data-dir /var/lib/tally
 *
 * # Explicit config file
 * tally --config /etc/tally/config.yaml
 *
 * # Run four workers for 60 seconds (for testing)
 * tally --workers 4 --duration 60
 * ```
 *
 * ## Graceful Shutdown
 *
 * SIGINT (Ctrl+C) stops the worker pool: no new claims, in-flight commands
 * finish, the store is flushed. After cleanup the process uses
 * std::process::exit(0) due to sled database background threads.
 */

use clap::Parser;
use std::error::Error;
use std::sync::Arc;
use tracing::{error, info};

use tally::config::load_config;
use tally::ledger::Ledger;
use tally::logging::init_logging;
use tally::worker::spawn_workers;

// CLI arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long)]
    config: Option<String>,

    /// Override data directory path (defaults to config value)
    #[arg(long)]
    data_dir: Option<String>,

    /// Override worker count (defaults to config value)
    #[arg(long)]
    workers: Option<usize>,

    /// Run for a specific duration in seconds (for testing)
    #[arg(long)]
    duration: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Create Tokio runtime explicitly for proper shutdown control
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| Box::<dyn Error + Send + Sync>::from(format!("Failed to create runtime: {}", e)))?;

    // Run async main logic
    let result = runtime.block_on(async_main());

    // Force runtime shutdown with timeout
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));

    result
}

async fn async_main() -> Result<(), Box<dyn Error + Send + Sync>> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging();

    // Track start time for total runtime measurement
    let start_time = std::time::Instant::now();

    let mut config = load_config(args.config.as_deref());
    if let Some(data_dir) = args.data_dir {
        config.ledger.data_dir = data_dir;
    }
    if let Some(workers) = args.workers {
        config.worker.count = workers;
    }

    let ledger = Arc::new(Ledger::open(config.clone()).map_err(|e| {
        Box::<dyn Error + Send + Sync>::from(format!("Failed to open ledger: {}", e))
    })?);

    info!("🧮 Tally ledger engine initialized");
    info!("📁 Data directory: {}", config.ledger.data_dir);

    // No workers are running yet, so any claim still marked processing was
    // abandoned by a previous process; reset them before the pool starts
    ledger
        .recover(chrono::Utc::now())
        .map_err(|e| Box::<dyn Error + Send + Sync>::from(format!("Recovery failed: {}", e)))?;

    let pool = spawn_workers(ledger.clone(), &config.worker);

    // Handle duration-limited runs
    if let Some(duration) = args.duration {
        tokio::time::sleep(std::time::Duration::from_secs(duration)).await;
        info!("⏱️ Duration limit reached");
    } else {
        info!("Running indefinitely. Press Ctrl+C to exit.");
        tokio::signal::ctrl_c().await?;
        info!("🛑 Received shutdown signal");
    }

    // Cleanup: stop claiming, drain in-flight work, flush the store
    pool.shutdown().await;
    if let Err(e) = ledger.flush() {
        error!("Failed to flush store during shutdown: {}", e);
    }
    info!("🧹 Shutdown complete");

    let total_runtime = start_time.elapsed();
    info!("💫 Total runtime: {:.2}s", total_runtime.as_secs_f64());

    // Force exit because sled/tokio threads won't terminate
    // This is the recommended workaround for sled issue #1234
    std::process::exit(0)
}
