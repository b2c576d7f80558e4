use anyhow::Result;
use ticketflow_scheduler::SchedulerConfig;
use ticketflow_server::AppState;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ticketflow_server=info,ticketflow_engine=info,ticketflow_scheduler=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ticketflow-server starting");

    let config = SchedulerConfig::from_env();
    let state = AppState::new_in_memory(config);

    tracing::info!(leaseholder_id = %state.scheduler.leaseholder_id(), "scheduler leaseholder assigned");
    state.scheduler.start();
    tracing::info!("scheduler running; engine ready to accept calls");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    state.scheduler.shutdown().await;

    Ok(())
}
