use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cctrade::cli::{self, Cli, Commands};
use cctrade::config::{AppConfig, LoggingConfig};
use cctrade::coordination::{install_signal_handlers, GracefulShutdown, TaskSupervisor};
use cctrade::exchange::{BinanceProvider, ExchangeProvider};
use cctrade::persistence::Store;
use cctrade::services::Scheduler;
use cctrade::signing::ConfigCredentials;
use cctrade::PostgresStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config))?;

    match cli.command {
        Commands::Run => {
            init_logging(&config.logging);
            run(config).await?;
        }
        Commands::Diagnose { user, json } => {
            init_logging_simple();
            let report = provider(&config).diagnose(user).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", cli::format_diagnosis(&report));
            }
        }
        Commands::ValidateCredentials { user } => {
            init_logging_simple();
            let exchange = provider(&config).for_user(user).await?;
            exchange
                .validate_credentials()
                .await
                .with_context(|| format!("credentials of user {user} were rejected"))?;
            println!("Credentials of user {user} are valid for spot and futures");
        }
        Commands::CheckConfig => {
            init_logging_simple();
            let problems = config.validate().err().unwrap_or_default();
            print!("{}", cli::format_config_report(&config, &problems));
            if !problems.is_empty() {
                anyhow::bail!("{} configuration problem(s)", problems.len());
            }
        }
        Commands::Migrate => {
            init_logging(&config.logging);
            let store = connect(&config).await?;
            store.migrate().await?;
            info!("Migrations applied");
        }
        Commands::Strategies { user, page, limit } => {
            init_logging_simple();
            let store = connect(&config).await?;
            let page = store.list_strategies(user, page, limit).await?;
            print!("{}", cli::format_strategies(&page));
        }
    }

    Ok(())
}

fn provider(config: &AppConfig) -> BinanceProvider {
    let resolver = Arc::new(ConfigCredentials::from_config(&config.credentials));
    BinanceProvider::new(config, resolver)
}

async fn connect(config: &AppConfig) -> anyhow::Result<PostgresStore> {
    PostgresStore::new(&config.database.url, config.database.max_connections)
        .await
        .context("connecting to the database")
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    if let Err(problems) = config.validate() {
        for problem in &problems {
            warn!(%problem, "Configuration problem");
        }
        anyhow::bail!("invalid configuration ({} problem(s))", problems.len());
    }

    let store = connect(&config).await?;
    store.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(store);
    let exchanges: Arc<dyn ExchangeProvider> = Arc::new(provider(&config));

    let shutdown_timeout = Duration::from_secs(config.scheduler.shutdown_timeout_secs);
    let shutdown = Arc::new(GracefulShutdown::new(shutdown_timeout));
    install_signal_handlers(Arc::clone(&shutdown));

    let tasks = TaskSupervisor::new(shutdown.token());
    let scheduler = Arc::new(Scheduler::new(
        &config,
        store,
        exchanges,
        Arc::clone(&tasks),
    ));

    info!(
        testnet = config.exchange.testnet,
        symbols = config.scheduler.price_symbols.len(),
        "cctrade started"
    );
    let loops = scheduler.start(shutdown.token());

    let signal = shutdown.token().wait_for_shutdown().await;
    info!(%signal, "Shutdown requested");

    let stop_loops = async {
        for handle in futures::future::join_all(loops).await {
            if let Err(e) = handle {
                warn!(error = %e, "Scheduler loop ended abnormally");
            }
        }
    };
    shutdown
        .execute(stop_loops, tasks.drain(shutdown_timeout))
        .await?;
    Ok(())
}

/// Console output filtered by `RUST_LOG` (or the configured level), JSON
/// when requested, plus a daily rolling file when `logging.dir` is set.
fn init_logging(config: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},cctrade={},sqlx=warn", config.level, config.level))
    });

    let file_layer = config.dir.as_deref().and_then(|dir| {
        // rolling::daily panics if the first file cannot be created
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: could not create log directory {dir} ({e}), file logging disabled");
            return None;
        }
        let appender = tracing_appender::rolling::daily(dir, "cctrade.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        // Lives for the whole process
        Box::leak(Box::new(guard));
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let console_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init();
}

fn init_logging_simple() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
