use std::sync::Arc;

use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;

use crate::config::ServerConfig;
use crate::escalation::{AdvanceRequest, ADVANCE_PATH};
use crate::metrics::Metrics;
use crate::storage::StorageEvent;
use crate::transition::{TransitionOutcome, TransitionProcessor};

pub const STORAGE_PATH: &str = "/trigger/storage";

/// Shared by every worker of the server.
pub struct AppState {
    pub processor: Arc<TransitionProcessor>,
    pub metrics: Arc<Metrics>,
}

#[derive(Serialize, Debug)]
struct AdvanceResponse {
    #[serde(rename = "orderId")]
    order_id: String,
    #[serde(flatten)]
    outcome: TransitionOutcome,
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route(ADVANCE_PATH, web::post().to(advance_handler))
        .route(STORAGE_PATH, web::post().to(storage_handler))
        .route("/metrics", web::get().to(metrics_handler))
        .route("/health", web::get().to(health_handler));
}

/// Serve the transition triggers plus metrics and health until shutdown.
pub async fn start_server(state: AppState, cfg: &ServerConfig) -> std::io::Result<()> {
    tracing::info!(
        "🌐 Starting trigger server on http://{}:{}",
        cfg.bind_host,
        cfg.bind_port
    );

    let state = web::Data::new(state);
    HttpServer::new(move || App::new().app_data(state.clone()).configure(configure))
        .bind((cfg.bind_host.as_str(), cfg.bind_port))?
        .run()
        .await
}

async fn advance_handler(
    state: web::Data<AppState>,
    request: web::Json<AdvanceRequest>,
) -> HttpResponse {
    let order_id = request.into_inner().order_id;

    match state.processor.advance(&order_id).await {
        Ok(outcome) => HttpResponse::Ok().json(AdvanceResponse { order_id, outcome }),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "orderId": order_id,
            "error": e.to_string(),
        })),
    }
}

async fn storage_handler(
    state: web::Data<AppState>,
    event: web::Json<StorageEvent>,
) -> HttpResponse {
    match state.processor.handle_storage_event(&event).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": e.to_string(),
            "failed": e.failed(),
        })),
    }
}

async fn metrics_handler(state: web::Data<AppState>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.metrics.registry().gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }

    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(buffer)
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "order-lifecycle"
    }))
}
