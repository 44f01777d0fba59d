use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};

use rds_inventory_collector::aws::{AwsSessionManager, SdkRdsClientFactory};
use rds_inventory_collector::collector::InstanceCollector;
use rds_inventory_collector::config::{Command, Config};
use rds_inventory_collector::health::HealthServer;
use rds_inventory_collector::logging;
use rds_inventory_collector::pipeline::CollectionPipeline;
use rds_inventory_collector::scheduler::{Scheduler, SystemClock};
use rds_inventory_collector::snapshot::DocumentBuilder;
use rds_inventory_collector::store::MongoSnapshotStore;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_args();
    logging::init(config.log_format, &config.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT"),
        build_date = env!("BUILD_DATE"),
        "RDS inventory collector starting"
    );

    if config.collects() {
        if let Err(e) = config.validate() {
            error!(error = %e, "Configuration validation failed");
            std::process::exit(1);
        }
        config.display();
    }

    let store = MongoSnapshotStore::connect(
        &config.mongodb_uri,
        &config.mongodb_db_name,
        &config.mongodb_collection,
    )
    .await
    .context("Failed to connect to MongoDB")?;

    if let Some(Command::History { account_id, days }) = &config.command {
        return print_history(&store, account_id, *days).await;
    }

    let regions = config.region_codes();
    let default_region = regions.first().cloned().unwrap_or_default();
    let sessions = AwsSessionManager::new(config.auth_strategy(), default_region, config.account_ids());

    if let Err(e) = sessions.validate_access().await {
        error!(error = format!("{:#}", e), "AWS access validation failed");
        std::process::exit(1);
    }

    let pipeline = CollectionPipeline::new(
        config.account_contexts(),
        Arc::new(sessions),
        InstanceCollector::new(Arc::new(SdkRdsClientFactory), config.retry_policy()),
        DocumentBuilder::new(config.tz()?),
        Arc::new(store),
    )?;

    if let Some(Command::Once) = &config.command {
        let report = pipeline.run().await;
        if report.has_failures() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let health_server = HealthServer::new();
    let health_server_clone = health_server.clone();
    let health_port = config.health_port;

    let (tx, rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = health_server_clone.serve(health_port, tx).await {
            error!(error = %e, "Health check server failed");
        }
    });
    rx.await.ok();

    let pipeline = pipeline.with_health(health_server.clone());
    let mut scheduler = Scheduler::new(
        config.daily_schedule()?,
        config.run_mode(),
        Arc::new(SystemClock),
    );

    health_server.set_ready(true);

    tokio::select! {
        _ = scheduler.run(&pipeline) => {}
        _ = shutdown_signal() => {
            info!("Received SIGINT/SIGTERM, initiating graceful shutdown");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

async fn print_history(store: &MongoSnapshotStore, account_id: &str, days: u32) -> Result<()> {
    let snapshots = store.history(account_id, days).await?;

    let documents: Vec<serde_json::Value> = snapshots
        .iter()
        .map(|snapshot| {
            serde_json::json!({
                "timestamp": snapshot.timestamp,
                "collected_at": snapshot.collected_at.to_rfc3339(),
                "account_id": snapshot.account_id,
                "total_instances": snapshot.total_instances,
                "instances": snapshot.instances,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&documents)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
