use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use approvals_backend::directory::PgDirectory;
use approvals_backend::jobs::JobScheduler;
use approvals_backend::notifications::PgNotifier;
use approvals_backend::store::PgStore;
use approvals_backend::{database, Config, SystemClock, WorkflowEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;
    if !database::health_check(&db_pool).await {
        warn!("Database health check failed after migration");
    }

    let engine = Arc::new(WorkflowEngine::new(
        Arc::new(PgStore::new(db_pool.clone())),
        Arc::new(PgDirectory::new(db_pool.clone())),
        Arc::new(PgNotifier::new(db_pool.clone())),
        Arc::new(SystemClock),
        config.engine.clone(),
    ));

    let mut scheduler = JobScheduler::new(engine, config.jobs.clone()).await?;
    scheduler.start().await?;

    info!("Approval worker running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    scheduler.shutdown().await?;
    db_pool.close().await;
    info!("Approval worker stopped");

    Ok(())
}
