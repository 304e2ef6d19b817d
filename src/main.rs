use log::{error, info};
use std::sync::Arc;

use sopflow::config::EngineConfig;
use sopflow::external::{HttpAiClient, HttpDocumentRenderer, HttpNotificationSender};
use sopflow::utils::read_env;
use sopflow::{EngineServices, init_engine};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        error!("Worker failed: {e}");
        std::process::exit(1);
    }
}

async fn run() -> sopflow::error::AppResult<()> {
    let database_url = read_env("SOPFLOW_DATABASE_URL", "sqlite://sopflow.db");
    let config = EngineConfig::from_env();

    let services = EngineServices {
        ai_client: Arc::new(HttpAiClient::from_env()?),
        renderer: Arc::new(HttpDocumentRenderer::from_env()),
        notifier: Arc::new(HttpNotificationSender::from_env()),
    };

    let engine = init_engine(&database_url, config, services).await?;
    engine.start().await?;
    info!("Worker running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| sopflow::error::AppError::IoError(format!("Signal handler failed: {e}")))?;

    info!("Ctrl-C received; shutting down");
    engine.shutdown().await;
    Ok(())
}
