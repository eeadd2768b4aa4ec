use std::sync::Arc;

use actix_multipart::form::MultipartFormConfig;
use actix_web::{web, App, HttpServer};
use tracing::{info, warn};
use tracing_subscriber::{filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer};

mod api;
mod config;
mod ffmpeg;
mod scheduler;
mod shutdown;

use crate::api::{health::health_config, job::job_config, settings::settings_config, validation};
use crate::scheduler::JobScheduler;
use crate::shutdown::ShutdownCoordinator;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load configuration from environment
    let config = config::Config::from_env().expect("Failed to load configuration");

    // Create logs and storage directories if they don't exist
    std::fs::create_dir_all(&config.log_dir).expect("Failed to create logs directory");
    std::fs::create_dir_all(config.upload_path()).expect("Failed to create upload directory");
    std::fs::create_dir_all(config.output_path()).expect("Failed to create output directory");

    // Initialize file-based logging with daily rotation and level separation
    // Log files will be created as: logs/info.2024-12-22.log, logs/error.2024-12-22.log, etc.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());

    // Create daily rotating file appenders for each log level
    let info_file = tracing_appender::rolling::daily(&config.log_dir, "info.log");
    let warn_file = tracing_appender::rolling::daily(&config.log_dir, "warn.log");
    let error_file = tracing_appender::rolling::daily(&config.log_dir, "error.log");
    let debug_file = tracing_appender::rolling::daily(&config.log_dir, "debug.log");

    // Create layers for each log level
    let info_layer = tracing_subscriber::fmt::layer()
        .with_writer(info_file)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    let warn_layer = tracing_subscriber::fmt::layer()
        .with_writer(warn_file)
        .with_ansi(false)
        .with_filter(LevelFilter::WARN);

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_file)
        .with_ansi(false)
        .with_filter(LevelFilter::ERROR);

    let debug_layer = tracing_subscriber::fmt::layer()
        .with_writer(debug_file)
        .with_ansi(false)
        .with_filter(LevelFilter::DEBUG);

    // Create console/stdout layer for terminal output
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true);

    // Initialize the subscriber with all layers (including console)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer) // Add console output
        .with(info_layer)
        .with(warn_layer)
        .with(error_layer)
        .with(debug_layer)
        .init();

    info!("Starting watermark-processor application");
    info!("Configuration loaded successfully:");
    info!("  - Storage root: {}", config.storage_root.display());
    info!("  - Max parallel jobs: {}", config.max_parallel_jobs);
    info!("  - Transcoder binary: {}", config.ffmpeg_binary);
    info!("  - GPU devices allowed: {}", config.allow_gpu);
    info!("  - Default output format: {}", config.default_output_format);
    info!("  - Max payload size: {} bytes", config.max_payload_size);

    // Jobs referencing an unresolvable transcoder will fail at execution
    // time; surface the problem at boot as well.
    if which::which(&config.ffmpeg_binary).is_err() {
        warn!(
            "Transcoder binary '{}' not found on PATH, jobs will fail until it is installed",
            config.ffmpeg_binary
        );
    }

    // Build the scheduling engine; this spawns the initial worker pool
    let scheduler = Arc::new(JobScheduler::new(config.pool_config(), config.output_path()));
    info!("Worker pool started with {} worker(s)", scheduler.live_workers());

    let scheduler_data = web::Data::from(scheduler.clone());
    let server_config = config.clone();
    let max_payload_size = config.max_payload_size;

    let server = HttpServer::new(move || {
        // Configure payload size limits globally
        let payload_config = web::PayloadConfig::default().limit(max_payload_size);

        let multipart_config = MultipartFormConfig::default()
            .total_limit(max_payload_size)
            .memory_limit(max_payload_size);

        App::new()
            .app_data(scheduler_data.clone()) // Share the scheduler across workers
            .app_data(web::Data::new(server_config.clone()))
            .app_data(payload_config) // Global payload size limit
            .app_data(multipart_config) // Global multipart/file upload size limit
            .app_data(validation::json_config()) // Global validation config
            .configure(health_config) // Health check endpoints
            .configure(job_config)
            .configure(settings_config)
    });

    info!("Server starting on http://127.0.0.1:8080");

    // Bind and start the server
    let server = server.bind(("127.0.0.1", 8080))?.run();

    // Get server handle for graceful shutdown
    let server_handle = server.handle();

    // Spawn server in background
    let server_task = tokio::spawn(server);

    // Create shutdown coordinator and wait for shutdown signal
    let coordinator = ShutdownCoordinator::new(server_handle, server_task, scheduler);

    coordinator.wait_for_shutdown().await
}
