//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        DbAdapter, GoogleVisionAdapter, OpenAiBotAdapter, OpenAiClassifierAdapter,
        OpenAiLanguageAdapter, StorageAdapter,
    },
    config::Config,
    error::ApiError,
    web::{
        self,
        state::{Adapters, AppState},
    },
};
use async_openai::{config::OpenAIConfig, Client};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database, Run Migrations & Seed the Step Catalog ---
    info!("Connecting to database...");
    let db_pool = DbAdapter::connect(
        &config.database_url,
        config.reconnect_interval,
        config.reconnect_attempts,
    )
    .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    db_adapter.seed_step_catalog().await?;
    info!("Database ready.");

    // --- 3. Initialize Service Adapters ---
    let openai_client =
        Client::with_config(OpenAIConfig::new().with_api_key(config.openai_api_key.as_str()));

    let adapters = Adapters {
        db: db_adapter,
        storage: Arc::new(StorageAdapter::new(
            config.storage_url.clone(),
            config.storage_service_key.clone(),
            config.storage_bucket.clone(),
        )?),
        extractor: Arc::new(GoogleVisionAdapter::new(
            config.vision_base_url.clone(),
            config.vision_api_key.clone(),
        )?),
        language: Arc::new(OpenAiLanguageAdapter::new(
            openai_client.clone(),
            config.classifier_model.clone(),
        )),
        classifier: Arc::new(OpenAiClassifierAdapter::new(
            openai_client.clone(),
            config.classifier_model.clone(),
        )),
        bot: Arc::new(OpenAiBotAdapter::new(openai_client, config.bot_model.clone())),
    };

    // --- 4. Build the Shared AppState & Router ---
    let app_state = Arc::new(AppState::new(config.clone(), adapters));
    let shutdown = app_state.shutdown.clone();
    let app = web::router(app_state);

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received.");
                shutdown.cancel();
            }
        }
    });

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    info!("Server stopped.");
    Ok(())
}
