//! Invoice import server
//!
//! Wires the service objects together and exposes the thin HTTP surface:
//! grant requests, cancel requests and the object-store webhook. All real
//! work happens in the library handlers.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::{extract::Extension, http::StatusCode, routing::post, Json, Router};
use clap::Parser;
use dotenv::dotenv;
use serde::Deserialize;
use uuid::Uuid;

use importer::configure::load_config;
use importer::import::adapters::{
    AuditBus, CentrifugoChannel, HttpAuditBus, ObjectStorage, PushChannel, S3ObjectStorage,
};
use importer::import::{
    CancelOutcome, CancellationHandler, ExpiryWatcher, GrantConfig, ImportProcessor, ImportStore,
    InvoiceEventRecorder, ObjectCreated, UploadGrantIssuer,
};
use importer::logger::setup_logger;

#[derive(Parser, Debug)]
struct Args {
    /// Configuration file
    #[arg(long, default_value = "config/config.yaml")]
    config: String,
}

struct AppState {
    grants: UploadGrantIssuer,
    canceller: CancellationHandler,
    processor: ImportProcessor,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GrantRequest {
    connection_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelRequest {
    transaction_id: String,
    connection_id: String,
}

/// Object-store write notification, possibly batched.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    records: Vec<ObjectCreated>,
}

async fn request_grant(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<GrantRequest>,
) -> StatusCode {
    let request_id = Uuid::new_v4().to_string();

    match state.grants.issue(&payload.connection_id, &request_id).await {
        Ok(_) => StatusCode::NO_CONTENT,
        Err(e) => {
            log::error!("grant request {} failed: {:#}", request_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn cancel_import(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CancelRequest>,
) -> StatusCode {
    match state
        .canceller
        .handle(&payload.transaction_id, &payload.connection_id)
        .await
    {
        Ok(CancelOutcome::Canceled) => StatusCode::NO_CONTENT,
        Ok(CancelOutcome::NotFound) => StatusCode::UNPROCESSABLE_ENTITY,
        Err(e) => {
            log::error!("cancellation of {} failed: {:#}", payload.transaction_id, e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn object_created(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    // Per-record failures are isolated and logged inside the processor.
    state.processor.process_batch(payload.records).await;
    StatusCode::NO_CONTENT
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let config = load_config(&args.config)?;
    setup_logger(&config)?;

    let store = Arc::new(ImportStore::open(&config.data_dir)?);
    let storage: Arc<dyn ObjectStorage> = Arc::new(S3ObjectStorage::new(
        &config.s3_bucket,
        &config.s3_region,
        &config.s3_endpoint,
        &config.s3_access_key,
        &config.s3_secret_key,
    )?);
    let channel: Arc<dyn PushChannel> = Arc::new(CentrifugoChannel::new(
        config.push_api_url.clone(),
        config.push_api_key.clone(),
    ));
    let bus: Arc<dyn AuditBus> = Arc::new(HttpAuditBus::new(config.audit_bus_url.clone()));

    // Change-stream consumers and the TTL sweep run for the process
    // lifetime; each gets its own subscription.
    Arc::new(ExpiryWatcher::new(channel.clone(), bus.clone())).spawn(store.subscribe());
    Arc::new(InvoiceEventRecorder::new(store.clone())).spawn(store.subscribe());
    store
        .clone()
        .spawn_ttl_sweeper(Duration::from_millis(config.sweep_interval_ms));

    let grant_config = GrantConfig {
        expires_in: config.grant_expires_secs,
        ttl_secs: config.transaction_ttl_secs,
    };
    let state = Arc::new(AppState {
        grants: UploadGrantIssuer::new(
            store.clone(),
            storage.clone(),
            channel.clone(),
            grant_config,
        ),
        canceller: CancellationHandler::new(store.clone(), channel.clone()),
        processor: ImportProcessor::new(store.clone(), storage.clone(), channel.clone(), bus.clone()),
    });

    let app = Router::new()
        .route("/imports/grant", post(request_grant))
        .route("/imports/cancel", post(cancel_import))
        .route("/hooks/object-created", post(object_created))
        .layer(Extension(state));

    log::info!("import server listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
