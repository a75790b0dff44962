use std::env;
use std::sync::Arc;
use std::time::Duration;

use join_warden::reconcile::{MemoryEventStore, MemoryPolicyStore};
use join_warden::{
    Error, ReconcileConfig, ReconcileRequest, ReconcileService, TelegramGateway, logging,
};
use tracing::info;

/// Main function to run the reconciliation engine
async fn async_main() -> Result<(), Error> {
    // Initialize logging
    logging::init()?;

    // Load environment variables
    let token = env::var("TELEGRAM_TOKEN").expect("TELEGRAM_TOKEN must be set");
    let admin_chat_id = env::var("ADMIN_CHAT_ID")
        .ok()
        .and_then(|value| value.parse().ok());

    let mut config = ReconcileConfig::default();
    if let Some(secs) = env::var("RECONCILE_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse().ok())
    {
        config.interval = Duration::from_secs(secs);
    }

    // Wire up the collaborators and the service
    let gateway = Arc::new(TelegramGateway::new(token, admin_chat_id)?);
    let store = Arc::new(MemoryEventStore::new());
    let policies = Arc::new(MemoryPolicyStore::new());
    let service = Arc::new(ReconcileService::new(store, policies, gateway, config));

    let (tx, handle) = service.spawn();
    info!("Reconciliation engine started");

    // Run until interrupted, then drain the task
    tokio::signal::ctrl_c().await?;
    logging::log_console("Shutting down".to_string());
    let _ = tx.send(ReconcileRequest::Shutdown).await;
    handle.await?;

    Ok(())
}

fn main() {
    // Run the async main function
    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async_main());

    // Handle any errors that occurred during execution
    if let Err(err) = result {
        eprintln!("Error: {}", err);
    }
}
