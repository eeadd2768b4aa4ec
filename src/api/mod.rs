use actix_web::{HttpResponse, ResponseError};
use tracing::{error, warn};

use crate::scheduler::SchedulerError;
use crate::api::validation::ErrorResponse;

pub mod health;
pub mod job;
pub mod settings;
pub mod validation;

impl ResponseError for SchedulerError {
    fn error_response(&self) -> HttpResponse {
        match self {
            SchedulerError::SpecInvalid(msg) => {
                warn!("Rejected watermark spec: {}", msg);
                HttpResponse::BadRequest().json(ErrorResponse {
                    error: "Invalid watermark spec".to_string(),
                    fields: serde_json::json!({"message": msg}),
                })
            }
            SchedulerError::ConfigInvalid(msg) => {
                warn!("Rejected settings update: {}", msg);
                HttpResponse::BadRequest().json(ErrorResponse {
                    error: "Invalid configuration".to_string(),
                    fields: serde_json::json!({"message": msg}),
                })
            }
            SchedulerError::NotFound(id) => {
                warn!("Job not found: {}", id);
                HttpResponse::NotFound().json(ErrorResponse {
                    error: "Not found".to_string(),
                    fields: serde_json::json!({"message": format!("Job with id {id} not found")}),
                })
            }
            SchedulerError::NotCancellable(id) => {
                warn!("Cancel rejected for job {}", id);
                HttpResponse::Conflict().json(ErrorResponse {
                    error: "Job not cancellable".to_string(),
                    fields: serde_json::json!({
                        "message": "Only queued jobs can be cancelled"
                    }),
                })
            }
            SchedulerError::ExecutionFailed { .. } | SchedulerError::Io(_) => {
                error!("Internal error: {}", self);
                HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Failed to process request".to_string(),
                    fields: serde_json::json!({"message": self.to_string()}),
                })
            }
        }
    }
}
