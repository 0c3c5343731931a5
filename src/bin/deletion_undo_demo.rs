

use std::sync::Arc;

use deletion_undo::core::config::UndoConfig;
use deletion_undo::db::farm::{self, SAMPLE_PLAN_ID};
use deletion_undo::deletion::{owned_rows, Metadata};
use deletion_undo::{DeletionUndoManager, MemoryStorage, RecordKey};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Deletes the sample cultivation plan, prints the undo receipt, then undoes it
/// and prints what came back. Config comes from `DELETION_UNDO_CONFIG` (a file
/// path) layered under `DELETION_UNDO_*` variables.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("deletion_undo=info".parse()?))
        .init();

    let config = match std::env::var("DELETION_UNDO_CONFIG") {
        Ok(path) => UndoConfig::load(path)?,
        Err(_) => UndoConfig::from_env(),
    };
    config.validate()?;

    let schema = Arc::new(farm::farm_planning_schema());
    let storage = Arc::new(MemoryStorage::new(&schema));
    storage.seed(farm::sample_reference_data()).await?;
    storage.seed(farm::sample_plan()).await?;

    let manager = DeletionUndoManager::new(Arc::clone(&storage), Arc::clone(&schema), config);

    info!(
        "Undo window {}s, sweeping every {:?}",
        manager.config().ttl_secs,
        manager.config().sweep_interval()
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Arc::new(manager.sweeper()).spawn(shutdown_rx);

    let plan = RecordKey::new("CultivationPlan", SAMPLE_PLAN_ID);
    let mut metadata = Metadata::new();
    metadata.insert("redirect_path".to_string(), "/plans".to_string());

    let receipt = match manager.schedule(plan, "demo-user", metadata).await {
        Ok(receipt) => receipt,
        Err(e) => {
            println!("{}", serde_json::to_string_pretty(&e.to_failure())?);
            return Ok(());
        }
    };
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    println!("rows left after delete: {}", storage.total_rows().await);

    let event = manager.event(&receipt.token).await?;
    for row in owned_rows(manager.schema(), &event.snapshot) {
        println!("  captured {}", row.key());
    }

    match manager.undo(&receipt.token).await {
        Ok(undone) => println!("{}", serde_json::to_string_pretty(&undone)?),
        Err(e) => println!("{}", serde_json::to_string_pretty(&e.to_failure())?),
    }

    if let Err(e) = manager.undo(&receipt.token).await {
        println!("second undo: {}", serde_json::to_string(&e.to_failure())?);
    }
    println!("rows after undo: {}", storage.total_rows().await);

    shutdown_tx.send(true)?;
    sweeper.await?;
    Ok(())
}
