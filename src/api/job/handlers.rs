use std::collections::HashMap;
use std::path::{Path, PathBuf};

use actix_multipart::form::{tempfile::TempFile, text::Text, MultipartForm};
use actix_web::{
    get, post,
    web::{Data, Path as UrlPath, ServiceConfig},
    HttpResponse, Responder,
};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::scheduler::{
    AnchorPosition, JobRequest, JobScheduler, SchedulerError, TargetDevice, WatermarkSpec,
};

use super::dto::{JobCreateResponse, JobDetail, JobListItem, JobLogResponse};

/// Multipart submission form.
///
/// Mirrors the scheduler's submission boundary: uploaded videos become the
/// ordered input list, the watermark fields become a validated spec, and
/// everything else is passed through as overrides.
#[derive(Debug, MultipartForm)]
pub struct CreateJobForm {
    pub files: Vec<TempFile>,
    pub watermark_type: Text<String>,
    pub watermark_text: Option<Text<String>>,
    pub watermark_image: Option<TempFile>,
    pub watermark_image_path: Option<Text<String>>,
    pub font_size: Option<Text<u32>>,
    pub color: Option<Text<String>>,
    pub opacity: Option<Text<f64>>,
    pub position: Option<Text<String>>,
    pub offset_x: Option<Text<u32>>,
    pub offset_y: Option<Text<u32>>,
    pub font_path: Option<Text<String>>,
    pub output_format: Option<Text<String>>,
    pub target_device: Option<Text<String>>,
    pub preset: Option<Text<String>>,
}

#[post("")]
async fn create_job(
    config: Data<Config>,
    scheduler: Data<JobScheduler>,
    MultipartForm(form): MultipartForm<CreateJobForm>,
) -> Result<HttpResponse, SchedulerError> {
    if form.files.is_empty() {
        return Err(SchedulerError::SpecInvalid(
            "no video files provided".to_string(),
        ));
    }

    let position = match form.position {
        Some(p) => p.parse::<AnchorPosition>()?,
        None => AnchorPosition::TopRight,
    };
    let target_device = match form.target_device {
        Some(d) => d.parse::<TargetDevice>()?,
        None => TargetDevice::Cpu,
    };
    let font_size = form.font_size.map(|t| t.into_inner()).unwrap_or(36);
    let color = form
        .color
        .map(|t| t.into_inner())
        .unwrap_or_else(|| "white".to_string());
    let opacity = form.opacity.map(|t| t.into_inner()).unwrap_or(1.0);
    let offset_x = form.offset_x.map(|t| t.into_inner()).unwrap_or(20);
    let offset_y = form.offset_y.map(|t| t.into_inner()).unwrap_or(20);

    let upload_dir = config.upload_path();
    let watermark = match form.watermark_type.as_str() {
        "text" => {
            let text = form
                .watermark_text
                .map(|t| t.into_inner())
                .unwrap_or_default();
            let font_path = form
                .font_path
                .map(|t| PathBuf::from(t.into_inner()))
                .filter(|p| !p.as_os_str().is_empty());
            WatermarkSpec::text(
                text, font_path, font_size, color, opacity, position, offset_x, offset_y,
            )?
        }
        "image" => {
            let image_path = if let Some(upload) = form.watermark_image {
                save_upload(&upload, &upload_dir, "watermark").await?
            } else if let Some(path) = form.watermark_image_path {
                let path = PathBuf::from(path.into_inner());
                if !path.is_file() {
                    return Err(SchedulerError::SpecInvalid(format!(
                        "watermark image not found: {}",
                        path.display()
                    )));
                }
                path
            } else {
                return Err(SchedulerError::SpecInvalid(
                    "image watermark requires a file or path".to_string(),
                ));
            };
            WatermarkSpec::image(image_path, opacity, position, offset_x, offset_y)?
        }
        other => {
            return Err(SchedulerError::SpecInvalid(format!(
                "unknown watermark type: {other}"
            )));
        }
    };

    let mut input_files = Vec::with_capacity(form.files.len());
    for upload in &form.files {
        input_files.push(save_upload(upload, &upload_dir, "input").await?);
    }
    info!("Stored {} upload(s) in {}", input_files.len(), upload_dir.display());

    let mut metadata = HashMap::new();
    if let Some(preset) = form.preset {
        let preset = preset.into_inner();
        if !preset.is_empty() {
            metadata.insert("preset".to_string(), preset);
        }
    }

    let job_id = scheduler.submit(JobRequest {
        input_files,
        watermark,
        output_format: form.output_format.map(|t| t.into_inner()),
        target_device,
        metadata,
    })?;

    Ok(HttpResponse::Created().json(JobCreateResponse { job_id }))
}

#[get("")]
async fn list_jobs(scheduler: Data<JobScheduler>) -> impl Responder {
    let jobs: Vec<JobListItem> = scheduler.list_jobs().iter().map(JobListItem::from).collect();
    HttpResponse::Ok().json(jobs)
}

#[get("/{job_id}")]
async fn get_job(
    scheduler: Data<JobScheduler>,
    path: UrlPath<Uuid>,
) -> Result<HttpResponse, SchedulerError> {
    let job = scheduler.get_job(path.into_inner())?;
    Ok(HttpResponse::Ok().json(JobDetail::from(job)))
}

#[get("/{job_id}/log")]
async fn get_job_log(
    scheduler: Data<JobScheduler>,
    path: UrlPath<Uuid>,
) -> Result<HttpResponse, SchedulerError> {
    let log = scheduler.job_log(path.into_inner())?;
    Ok(HttpResponse::Ok().json(JobLogResponse { log }))
}

#[post("/{job_id}/cancel")]
async fn cancel_job(
    scheduler: Data<JobScheduler>,
    path: UrlPath<Uuid>,
) -> Result<HttpResponse, SchedulerError> {
    let job_id = path.into_inner();
    scheduler.cancel_job(job_id)?;
    let job = scheduler.get_job(job_id)?;
    Ok(HttpResponse::Ok().json(JobDetail::from(job)))
}

/// Persist an uploaded temp file under the storage root with a unique name
/// that keeps the original extension. Uses async filesystem calls so a
/// large copy never parks the server worker handling the request.
async fn save_upload(upload: &TempFile, dir: &Path, prefix: &str) -> Result<PathBuf, SchedulerError> {
    let extension = upload
        .file_name
        .as_deref()
        .map(Path::new)
        .and_then(|n| n.extension())
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let destination = dir.join(format!("{prefix}_{}{extension}", Uuid::new_v4().simple()));
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::copy(upload.file.path(), &destination).await?;
    Ok(destination)
}

pub fn job_config(config: &mut ServiceConfig) {
    config.service(
        actix_web::web::scope("/api/jobs")
            .service(create_job)
            .service(list_jobs)
            .service(get_job)
            .service(get_job_log)
            .service(cancel_job),
    );
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn fake_upload(name: Option<&str>, content: &[u8]) -> TempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content).unwrap();
        TempFile {
            file,
            content_type: None,
            file_name: name.map(str::to_string),
            size: content.len(),
        }
    }

    #[tokio::test]
    async fn save_upload_copies_content_and_keeps_extension() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = dir.path().join("uploads");
        let upload = fake_upload(Some("clip.mp4"), b"frame-data");

        let destination = save_upload(&upload, &uploads, "input").await.unwrap();

        let name = destination.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("input_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"frame-data");
    }

    #[tokio::test]
    async fn save_upload_without_file_name_omits_extension() {
        let dir = tempfile::tempdir().unwrap();
        let upload = fake_upload(None, b"x");

        let destination = save_upload(&upload, dir.path(), "watermark").await.unwrap();

        let name = destination.file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("watermark_"));
        assert!(!name.contains('.'));
    }
}
