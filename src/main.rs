//! calcmesh - distributed arithmetic evaluation cluster
//!
//! One binary, one subcommand per role: a dispatcher that routes
//! arithmetic requests by operation kind, operators that compute them, and
//! an aggregator that persists every outcome and closes each run once all
//! dispatched requests are accounted for.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad config, unreachable aggregator, bind failure, etc.)

mod aggregator;
mod cli;
mod cluster;
mod config;
mod dispatcher;
mod error;
mod models;
mod operator;
mod report;
mod routing;
mod transport;

use anyhow::{Context, Result};
use cli::{Args, Command};
use cluster::LocalCluster;
use config::{Config, DEFAULT_CONFIG_FILE};
use dispatcher::Dispatcher;
use models::Operation;
use report::{generate_console_summary, CsvStore};
use routing::RoutingTable;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;
use transport::{SharedEndpoint, TcpEndpoint};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if let Command::InitConfig = args.command {
        return handle_init_config();
    }

    init_logging(&args);

    info!("calcmesh v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            error!("{:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .calcmesh.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", DEFAULT_CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set operator endpoints, the aggregator address and the output file.");
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

/// Run the selected role. Returns the process exit code.
async fn run(args: Args) -> Result<i32> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let timeout = config.transport.timeout();
    let routes = RoutingTable::from(&config.routing);
    let show_progress = !args.quiet;

    match args.command {
        Command::Dispatch { input, .. } => {
            for (operation, address) in routes.iter() {
                debug!("Route {} -> {}", operation, address);
            }
            let missing = routes.missing();
            if !missing.is_empty() {
                warn!("No operator configured for: {:?}", missing);
            }

            let aggregator: SharedEndpoint =
                Arc::new(TcpEndpoint::new(config.aggregator.address.clone(), timeout));
            let routes = cluster::connect_routes(routes, config.transport.dispatch_timeout());
            let mut dispatcher = Dispatcher::new(routes, aggregator);

            feed(&mut dispatcher, input.as_deref(), show_progress).await?;
            debug!("Input exhausted: {:?}", dispatcher.stats());

            let stats = dispatcher
                .finish()
                .await
                .context("Failed to notify the aggregator")?;

            println!("\n📊 Dispatch Summary:");
            println!("   Dispatched: {}", stats.dispatched);
            println!("   Malformed: {}", stats.parse_errors);
            println!("   Undelivered: {}", stats.transport_errors);
            println!("\n✅ Completion notice sent to {}", config.aggregator.address);
            Ok(0)
        }

        Command::Operator { kind, listen, .. } => {
            let kind = Operation::from(kind);
            let listen = match listen {
                Some(addr) => addr,
                None => routes
                    .route(kind)
                    .cloned()
                    .with_context(|| format!("No route configured for {}", kind))?,
            };

            let listener = transport::bind(&listen).await?;
            println!("🧮 {} operator listening on {}", kind, listen);
            cluster::serve_operator(
                listener,
                kind,
                config.aggregator.address.clone(),
                timeout,
                shutdown_signal(),
            )
            .await?;
            Ok(0)
        }

        Command::Aggregator { .. } => {
            let listener = transport::bind(&config.aggregator.listen).await?;
            let output = config.aggregator.output.clone();
            println!("📥 Aggregator listening on {}", config.aggregator.listen);

            let saved_to = output.clone();
            cluster::serve_aggregator(listener, output, shutdown_signal(), move |summary| {
                println!("\n{}", generate_console_summary(&summary));
                println!("   Results saved to: {}", saved_to.display());
            })
            .await?;
            Ok(0)
        }

        Command::Local { input, .. } => {
            let output: PathBuf = config.aggregator.output.clone();
            let mut local = LocalCluster::start(CsvStore::new(&output));

            feed(local.dispatcher(), input.as_deref(), show_progress).await?;

            let (stats, summary) = local.finish().await?;
            if stats.parse_errors > 0 {
                warn!("{} malformed entries were skipped", stats.parse_errors);
            }

            println!("\n{}", generate_console_summary(&summary));
            println!("\n✅ Run complete! Results saved to: {}", output.display());
            Ok(0)
        }

        Command::InitConfig => handle_init_config().map(|_| 0),
    }
}

/// Feed the dispatcher from a batch file, or from stdin when none is given.
async fn feed(dispatcher: &mut Dispatcher, input: Option<&Path>, show_progress: bool) -> Result<()> {
    match input {
        Some(path) => dispatcher.run_batch(path, show_progress).await,
        None => dispatcher.run_interactive(BufReader::new(tokio::io::stdin())).await,
    }
}

/// Resolves on Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
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
