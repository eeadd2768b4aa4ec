use actix_web::{
    get, patch,
    web::{Data, ServiceConfig},
    HttpResponse,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::scheduler::{JobScheduler, PoolConfig, PoolConfigUpdate, SchedulerError};

/// Current pool configuration as exposed over the API
#[derive(Serialize)]
pub struct SettingsResponse {
    pub max_parallel_jobs: usize,
    pub allow_gpu: bool,
    pub default_output_format: String,
    pub ffmpeg_binary: String,
}

impl From<PoolConfig> for SettingsResponse {
    fn from(config: PoolConfig) -> Self {
        Self {
            max_parallel_jobs: config.max_parallel_jobs,
            allow_gpu: config.allow_gpu,
            default_output_format: config.default_output_format,
            ffmpeg_binary: config.ffmpeg_binary,
        }
    }
}

/// Partial settings update; absent fields are left unchanged
#[derive(Debug, Deserialize, Validate)]
pub struct SettingsUpdateDto {
    #[validate(range(min = 1, message = "max_parallel_jobs must be at least 1"))]
    pub max_parallel_jobs: Option<i64>,
    #[validate(length(min = 1, message = "default_output_format cannot be empty"))]
    pub default_output_format: Option<String>,
    #[validate(length(min = 1, message = "ffmpeg_binary cannot be empty"))]
    pub ffmpeg_binary: Option<String>,
    pub allow_gpu: Option<bool>,
}

#[get("")]
async fn get_settings(scheduler: Data<JobScheduler>) -> HttpResponse {
    HttpResponse::Ok().json(SettingsResponse::from(scheduler.current_settings()))
}

#[patch("")]
async fn update_settings(
    scheduler: Data<JobScheduler>,
    payload: actix_web_validator::Json<SettingsUpdateDto>,
) -> Result<HttpResponse, SchedulerError> {
    let payload = payload.into_inner();
    let updated = scheduler.update_settings(PoolConfigUpdate {
        max_parallel_jobs: payload.max_parallel_jobs,
        default_output_format: payload.default_output_format,
        ffmpeg_binary: payload.ffmpeg_binary,
        allow_gpu: payload.allow_gpu,
    })?;
    Ok(HttpResponse::Ok().json(SettingsResponse::from(updated)))
}

pub fn settings_config(config: &mut ServiceConfig) {
    config.service(
        actix_web::web::scope("/api/settings")
            .service(get_settings)
            .service(update_settings),
    );
}
