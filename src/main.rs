mod chain;
mod config;
mod db;
mod executor;
mod mempool;
mod rpc;
mod types;
mod validator;

use std::sync::Arc;

use alloy::signers::local::PrivateKeySigner;
use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use chain::alloy_chain::AlloyChainService;
use chain::ChainService;
use db::PgStore;
use executor::{BundleExecutor, ExecutorConfig};
use mempool::Mempool;
use validator::Validator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = config::load_config()?;
    tracing::info!(rpc_url = %cfg.rpc_url, chain_id = cfg.chain_id, "config loaded");

    let store = Arc::new(
        PgStore::connect(&cfg.database_url, cfg.db_max_connections)
            .await
            .context("connect to bundler database")?,
    );
    store.migrate().await.context("run bundler migrations")?;

    let chain: Arc<dyn ChainService> = Arc::new(
        AlloyChainService::connect(
            &cfg.rpc_url,
            cfg.entry_point_address.parse()?,
            cfg.bundler_private_key,
            cfg.chain_id,
            cfg.max_fee_per_gas_multiplier,
        )
        .await
        .context("connect chain service")?,
    );

    let discovered_chain_id = chain.chain_id().await.context("eth_chainId")?;
    if discovered_chain_id != cfg.chain_id {
        anyhow::bail!(
            "BUNDLER_CHAIN_ID mismatch: configured={} rpc={}",
            cfg.chain_id,
            discovered_chain_id
        );
    }

    let mempool = Arc::new(Mempool::new(store.clone()));
    mempool.reload().await.context("reload mempool from store")?;

    let validator = Arc::new(Validator::new(chain.clone()));

    let beneficiary = match &cfg.beneficiary {
        Some(beneficiary) => beneficiary.clone(),
        None => PrivateKeySigner::from_slice(&cfg.bundler_private_key)
            .context("invalid BUNDLER_BUNDLER_PRIVATE_KEY")?
            .address()
            .to_string(),
    };

    let executor = Arc::new(BundleExecutor::new(
        ExecutorConfig {
            bundle_interval: cfg.bundle_interval,
            max_bundle_size: cfg.max_bundle_size,
            beneficiary,
            receipt_timeout: cfg.receipt_timeout,
            receipt_timeout_grace_ticks: cfg.receipt_timeout_grace_ticks,
            receipt_timeout_action: cfg.receipt_timeout_action,
        },
        chain.clone(),
        store.clone(),
        mempool.clone(),
    ));

    let app_state = rpc::AppState {
        mempool: mempool.clone(),
        validator,
        store,
        chain,
        entry_point: cfg.entry_point_address.clone(),
        chain_id: cfg.chain_id,
    };

    let shutdown = CancellationToken::new();
    let mut join_set = tokio::task::JoinSet::new();

    {
        let shutdown = shutdown.clone();
        join_set.spawn(async move {
            executor.run(shutdown).await;
            Ok(())
        });
    }

    {
        let shutdown = shutdown.clone();
        let port = cfg.port;
        join_set.spawn(async move {
            let router = rpc::build_router(app_state);
            let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
                .await
                .with_context(|| format!("bind RPC server on port {port}"))?;
            tracing::info!(port, "rpc server listening");
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
                .context("rpc server failed")
        });
    }

    tracing::info!("bundler started");

    let mut fatal: Option<anyhow::Error> = None;
    tokio::select! {
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown requested");
        },
        res = join_set.join_next() => {
            if let Some(res) = res {
                let res = res.context("bundler task panicked")?;
                match res {
                    Ok(()) => fatal = Some(anyhow::anyhow!("bundler task exited unexpectedly")),
                    Err(e) => fatal = Some(e.context("bundler task failed")),
                }
            }
        }
    }

    shutdown.cancel();

    while let Some(res) = join_set.join_next().await {
        let res = res.context("bundler task panicked")?;
        if let Err(e) = res {
            fatal.get_or_insert_with(|| e.context("bundler task failed"));
        }
    }

    fatal.map_or(Ok(()), Err)
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate()).context("install SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.context("ctrl-c")?;
        Ok(())
    }
}

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_target(false).init();
}
