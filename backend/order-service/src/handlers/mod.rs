//! HTTP surface: order endpoints plus the health and metrics probes every
//! service exposes.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};
use sqlx::PgPool;

pub mod orders;

pub use orders::{cancel_order, create_order, get_order, retry_payment};

pub async fn health_summary(pool: web::Data<PgPool>) -> HttpResponse {
    match sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "order-service",
            "version": env!("CARGO_PKG_VERSION"),
        })),
        Err(e) => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "unhealthy",
            "error": format!("PostgreSQL connection failed: {e}"),
            "service": "order-service",
        })),
    }
}

pub async fn readiness(pool: web::Data<PgPool>) -> HttpResponse {
    let postgres_ok = sqlx::query("SELECT 1").fetch_one(pool.get_ref()).await.is_ok();

    let body = serde_json::json!({
        "ready": postgres_ok,
        "checks": {
            "postgresql": if postgres_ok { "healthy" } else { "unhealthy" },
        },
        "timestamp": Utc::now().to_rfc3339(),
    });

    if postgres_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

pub async fn liveness() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"alive": true}))
}

pub async fn serve_metrics() -> HttpResponse {
    let metric_families = prometheus::default_registry().gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
