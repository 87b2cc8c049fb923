//! Aegis supervisor daemon
//!
//! Composition root for the appliance control plane: telemetry
//! pipeline, document indexer, heartbeat health server, and the
//! self-healing loop, all in one process with cooperative tasks.

use aegis_common::Config;
use aegis_indexer::Indexer;
use aegis_ledger::Ledger;
use aegis_supervisor::{
    server, ContainerRuntime, HealingEngine, PostRebootValidator, Primitives, RebootGate,
    RecoveryExecutor, ServiceInspector,
};
use aegis_telemetry::Telemetry;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    info!("Aegis control plane starting");

    let ledger = Ledger::connect(&config.database).await?;
    let runtime = ContainerRuntime::new();

    // Telemetry first; everything downstream reads its endpoints.
    let telemetry = Telemetry::spawn(config.telemetry.clone(), ledger.clone())?;

    // On the first start after a boot this settles the pending
    // reboot row before the loop begins acting.
    PostRebootValidator::new(ledger.clone(), runtime.clone(), config.telemetry.clone())
        .run()
        .await;

    // Document indexer: scan loop plus management API. The control
    // plane still supervises the box when the indexer cannot reach
    // its stores, so a failed init only degrades.
    match Indexer::new(&config, ledger.clone()).await {
        Ok(indexer) => {
            let _scan_loop = indexer.spawn_scan_loop(config.indexer.scan_interval_secs);
            let api_indexer = indexer.clone();
            let port = config.indexer.api_port;
            tokio::spawn(async move {
                if let Err(e) =
                    aegis_indexer::api::serve(api_indexer, &format!("0.0.0.0:{port}")).await
                {
                    error!("Indexer API exited: {}", e);
                }
            });
        }
        Err(e) => warn!("Document indexer unavailable, continuing without it: {}", e),
    }

    // Heartbeat health server
    {
        let state = server::HealthServerState {
            healing: Arc::new(config.healing.clone()),
        };
        let bind = format!("0.0.0.0:{}", config.healing.heartbeat_port);
        tokio::spawn(async move {
            if let Err(e) = server::serve(state, &bind).await {
                error!("Health server exited: {}", e);
            }
        });
    }

    // The recovery ladder and its loop
    let primitives = Primitives::new(
        runtime.clone(),
        ledger.clone(),
        config.llm.clone(),
        config.healing.clone(),
    );
    let gate = RebootGate::new(ledger.clone(), config.healing.clone());
    let executor = Arc::new(RecoveryExecutor::new(
        config.healing.clone(),
        config.disk,
        ledger.clone(),
        primitives,
        gate,
    ));
    let inspector = ServiceInspector::new(runtime.clone(), ledger.clone());
    let mut engine = HealingEngine::new(
        config.clone(),
        ledger.clone(),
        inspector,
        executor,
        runtime,
    );

    // Graceful shutdown on ctrl-c / SIGTERM
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    engine.run(shutdown_rx).await;

    telemetry.shutdown();
    ledger.close().await;
    info!("Aegis control plane shutdown complete");
    Ok(())
}
