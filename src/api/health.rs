use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;
use tracing::error;

use crate::scheduler::JobScheduler;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    transcoder: String,
    workers: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Health check endpoint
///
/// General health check including transcoder binary resolution.
/// Use for load balancers and uptime monitors.
#[get("/health")]
async fn health_check(scheduler: web::Data<JobScheduler>) -> impl Responder {
    let binary = scheduler.current_settings().ffmpeg_binary;
    match which::which(&binary) {
        Ok(resolved) => HttpResponse::Ok().json(HealthResponse {
            status: "healthy".to_string(),
            transcoder: resolved.display().to_string(),
            workers: scheduler.live_workers(),
            error: None,
        }),
        Err(e) => {
            error!("Health check failed: transcoder '{}' not resolvable: {}", binary, e);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "unhealthy".to_string(),
                transcoder: "unresolved".to_string(),
                workers: scheduler.live_workers(),
                error: Some(format!("Transcoder binary not found: {binary}")),
            })
        }
    }
}

/// Readiness check endpoint
///
/// Checks if the service can accept jobs: the transcoder must resolve and
/// at least one worker must be alive.
///
/// Returns 503 if not ready, but the process recovers once the pool is
/// resized or the binary becomes available.
#[get("/ready")]
async fn readiness_check(scheduler: web::Data<JobScheduler>) -> impl Responder {
    let binary = scheduler.current_settings().ffmpeg_binary;
    let workers = scheduler.live_workers();
    match which::which(&binary) {
        Ok(resolved) if workers > 0 => HttpResponse::Ok().json(HealthResponse {
            status: "ready".to_string(),
            transcoder: resolved.display().to_string(),
            workers,
            error: None,
        }),
        Ok(_) => HttpResponse::ServiceUnavailable().json(HealthResponse {
            status: "not_ready".to_string(),
            transcoder: binary,
            workers,
            error: Some("No live workers".to_string()),
        }),
        Err(_) => {
            error!("Readiness check failed: transcoder '{}' unavailable", binary);
            HttpResponse::ServiceUnavailable().json(HealthResponse {
                status: "not_ready".to_string(),
                transcoder: "unresolved".to_string(),
                workers,
                error: Some(format!("Transcoder binary not found: {binary}")),
            })
        }
    }
}

/// Liveness check endpoint
///
/// Simple check that the process is alive. Does not check dependencies.
#[get("/live")]
async fn liveness_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "alive".to_string(),
        transcoder: "not_checked".to_string(),
        workers: 0,
        error: None,
    })
}

pub fn health_config(config: &mut web::ServiceConfig) {
    config
        .service(health_check)
        .service(readiness_check)
        .service(liveness_check);
}
