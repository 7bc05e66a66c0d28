mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use intent_flow::api::{self, AppState};
use intent_flow::config::AppConfig;
use intent_flow::db::{self, Db};
use intent_flow::evaluate::dispatch::{HttpDispatcher, ServiceDispatcher};
use intent_flow::evaluate::Evaluator;
use intent_flow::execute::chain_client::EvmReader;
use intent_flow::execute::keystore::VaultKeyStore;
use intent_flow::execute::signer::HttpSigner;
use intent_flow::execute::{self, ExecutionService};
use intent_flow::feeds::dexscreener::DexScreenerFeed;
use intent_flow::feeds::hyperliquid::HyperliquidFeed;
use intent_flow::ingest::Ingestor;
use intent_flow::lock::memory::MemoryLockBackend;
use intent_flow::lock::redis::RedisLockBackend;
use intent_flow::lock::LockManager;
use intent_flow::oracle::sources::{DexAggregatorSource, MarketIndexSource, PriceSource};
use intent_flow::oracle::OracleValidator;
use intent_flow::queue::memory::MemoryQueue;
use intent_flow::queue::redis::RedisQueue;
use intent_flow::queue::JobQueue;
use intent_flow::schedule::Scheduler;
use intent_flow::schema;

/// How long shutdown waits for in-flight jobs before exiting anyway.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    if let cli::Command::Schema = cli.command {
        return schema::run();
    }

    init_tracing();
    let config = AppConfig::from_env();
    let rt = tokio::runtime::Runtime::new().context("creating tokio runtime")?;

    match cli.command {
        cli::Command::Api => rt.block_on(run_api(config)),
        cli::Command::Ingest => rt.block_on(run_ingest(config)),
        cli::Command::Schedule => rt.block_on(run_schedule(config)),
        cli::Command::Evaluate { workers } => rt.block_on(run_evaluate(config, workers)),
        cli::Command::Run => rt.block_on(run_all(config)),
        cli::Command::Schema => unreachable!("handled above"),
    }
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

// ── Component entry points ───────────────────────────────────────────

async fn run_api(config: AppConfig) -> Result<()> {
    let db = db::open(Path::new(&config.db_path))?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::connect(&config.redis_url()).await?);
    let locks = LockManager::new(Arc::new(
        RedisLockBackend::connect(&config.redis_url()).await?,
    ));
    let service = build_execution_service(&config, db, locks)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_ctrl_c(shutdown_tx));

    let worker = tokio::spawn(execute::run_queue_worker(
        service.clone(),
        queue,
        shutdown_rx.clone(),
    ));

    let state = AppState {
        service,
        service_token: config.internal_api_token.clone(),
    };
    api::serve(&config.api_host, config.api_port, state, shutdown_rx).await?;

    drain(vec![worker]).await;
    Ok(())
}

async fn run_ingest(config: AppConfig) -> Result<()> {
    let db = db::open(Path::new(&config.db_path))?;
    let ingestor = build_ingestor(&config, db)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_ctrl_c(shutdown_tx));

    tracing::info!(
        chains = ?config.ingest_chains,
        symbols = ?config.hl_ingest_symbols,
        "ingestor starting"
    );
    ingestor.run(shutdown_rx).await;
    Ok(())
}

async fn run_schedule(config: AppConfig) -> Result<()> {
    let db = db::open(Path::new(&config.db_path))?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::connect(&config.redis_url()).await?);
    let scheduler = Scheduler::new(db, queue, config.poll_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_ctrl_c(shutdown_tx));

    tracing::info!(poll_secs = config.poll_interval.as_secs(), "scheduler starting");
    scheduler.run(shutdown_rx).await;
    Ok(())
}

async fn run_evaluate(config: AppConfig, workers: usize) -> Result<()> {
    let db = db::open(Path::new(&config.db_path))?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisQueue::connect(&config.redis_url()).await?);
    let dispatcher = Arc::new(HttpDispatcher::new(
        &config.api_service_url,
        &config.internal_api_token,
        config.execute_http_timeout,
    )?);
    let evaluator = Arc::new(Evaluator::new(
        db,
        queue,
        dispatcher,
        config.execute_max_retries,
        config.execute_backoff_ms,
        config.trend_max_age_secs,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_ctrl_c(shutdown_tx));

    tracing::info!(workers, "evaluator starting");
    let handles: Vec<JoinHandle<()>> = (0..workers.max(1))
        .map(|_| tokio::spawn(evaluator.clone().run(shutdown_rx.clone())))
        .collect();
    drain(handles).await;
    Ok(())
}

/// Everything in one process over the in-memory broker and lock store.
async fn run_all(config: AppConfig) -> Result<()> {
    let db = db::open(Path::new(&config.db_path))?;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryQueue::new());
    let locks = LockManager::new(Arc::new(MemoryLockBackend::new()));
    let service = build_execution_service(&config, db.clone(), locks)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(watch_ctrl_c(shutdown_tx));

    let ingestor = build_ingestor(&config, db.clone())?;
    let scheduler = Scheduler::new(db.clone(), queue.clone(), config.poll_interval);
    let evaluator = Arc::new(Evaluator::new(
        db,
        queue.clone(),
        Arc::new(ServiceDispatcher::new(service.clone())),
        config.execute_max_retries,
        config.execute_backoff_ms,
        config.trend_max_age_secs,
    ));

    let mut handles = vec![
        tokio::spawn(ingestor.run(shutdown_rx.clone())),
        tokio::spawn(scheduler.run(shutdown_rx.clone())),
        tokio::spawn(evaluator.run(shutdown_rx.clone())),
        tokio::spawn(execute::run_queue_worker(
            service.clone(),
            queue,
            shutdown_rx.clone(),
        )),
    ];

    let state = AppState {
        service,
        service_token: config.internal_api_token.clone(),
    };
    let api_host = config.api_host.clone();
    let api_port = config.api_port;
    handles.push(tokio::spawn(async move {
        if let Err(err) = api::serve(&api_host, api_port, state, shutdown_rx).await {
            tracing::error!(%err, "executor api exited");
        }
    }));

    drain(handles).await;
    Ok(())
}

// ── Wiring helpers ───────────────────────────────────────────────────

fn build_execution_service(
    config: &AppConfig,
    db: Db,
    locks: LockManager,
) -> Result<Arc<ExecutionService>> {
    let sources: Vec<Arc<dyn PriceSource>> = vec![
        Arc::new(DexAggregatorSource::new(config.oracle_source_timeout)?),
        Arc::new(MarketIndexSource::new(config.oracle_source_timeout)?),
    ];
    let oracle = Arc::new(OracleValidator::new(
        db.clone(),
        sources,
        config.oracle_source_timeout,
    ));
    let keystore = Arc::new(VaultKeyStore::new(
        &config.vault_addr,
        &config.vault_token,
        &config.vault_mount,
    )?);
    let signer = Arc::new(HttpSigner::new(
        &config.signer_service_url,
        config.execute_http_timeout,
    )?);

    Ok(Arc::new(ExecutionService::new(
        db,
        locks,
        oracle,
        keystore,
        Arc::new(EvmReader::new()),
        signer,
        config.lock_ttl_ms,
        config.circuit_breaker_threshold,
    )))
}

fn build_ingestor(config: &AppConfig, db: Db) -> Result<Ingestor> {
    let dex = Arc::new(DexScreenerFeed::new(
        config.ingest_chains.clone(),
        config.sol_ingest_mints.clone(),
        config.dex_screener_timeout,
    )?);
    let perps = Arc::new(HyperliquidFeed::new(
        config.hl_ingest_symbols.clone(),
        config.dex_screener_timeout,
    )?);
    Ok(Ingestor::new(db)
        .with_feed(dex, config.dex_ingest_interval)
        .with_feed(perps, config.perp_ingest_interval))
}

async fn watch_ctrl_c(shutdown_tx: watch::Sender<bool>) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutdown signal received, draining in-flight work");
        let _ = shutdown_tx.send(true);
    }
}

/// Wait for workers to finish, bounded by the drain deadline.
async fn drain(handles: Vec<JoinHandle<()>>) {
    let deadline = tokio::time::Instant::now() + DRAIN_DEADLINE;
    for handle in handles {
        if tokio::time::timeout_at(deadline, handle).await.is_err() {
            tracing::warn!("drain deadline reached, abandoning remaining workers");
            break;
        }
    }
}
