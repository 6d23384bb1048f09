#![allow(clippy::result_large_err)]

use dotenvy::dotenv;
use giftflow::{
    api::{self, AppState},
    config::{
        self,
        database::{create_connection, create_tables},
    },
    core::Pipeline,
    errors::Result,
    services::{
        Collaborators,
        http::{
            HttpCheckoutService, HttpFulfillmentService, HttpNotifier, HttpPaymentGateway,
            build_client,
        },
        store::{DbGiftCatalog, DbProfileStore},
    },
};
use std::{env, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize tracing (as early as possible)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 2. Load .env file; variables may also be set externally
    dotenv().ok();

    // 3. Load the pipeline configuration
    let pipeline_config = config::pipeline::load_default_config()
        .inspect_err(|e| error!("Failed to load pipeline configuration: {}", e))?;

    // 4. Connect to the database and ensure the schema
    let db = create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {}", e))?;
    create_tables(&db)
        .await
        .inspect(|_| info!("Database initialized successfully."))
        .inspect_err(|e| error!("Failed to create tables: {}", e))?;

    // 5. Build the collaborators
    let endpoints = &pipeline_config.services;
    let client = build_client(endpoints)?;
    let api_key = env::var("GIFTFLOW_API_KEY").ok();
    let services = Collaborators {
        payments: Arc::new(HttpPaymentGateway::new(
            client.clone(),
            &endpoints.payment_gateway_url,
            api_key.clone(),
        )),
        checkout: Arc::new(HttpCheckoutService::new(
            client.clone(),
            &endpoints.checkout_url,
            api_key.clone(),
        )),
        fulfillment: Arc::new(HttpFulfillmentService::new(
            client.clone(),
            &endpoints.fulfillment_url,
            api_key.clone(),
        )),
        notifier: Arc::new(HttpNotifier::new(client, &endpoints.notifier_url, api_key)),
        catalog: Arc::new(DbGiftCatalog::new(db.clone())),
        profiles: Arc::new(DbProfileStore::new(db.clone())),
    };

    // 6. Serve the invocation endpoints
    let pipeline = Pipeline::new(db, pipeline_config, services);
    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .inspect_err(|e| error!("Failed to bind {}: {}", bind_addr, e))?;
    info!(%bind_addr, "giftflow listening");

    axum::serve(listener, api::router(AppState::new(pipeline))).await?;
    Ok(())
}
