//! Oathkeeper - Main Entry Point
//!
//! Wires the detection pipeline from the data directory and environment,
//! runs it until Ctrl+C, then stops it cleanly.

use std::sync::Arc;

use oathkeeper_core::constants::{self, APP_NAME, APP_VERSION, CONFIG_FILE, DATABASE_FILE};
use oathkeeper_core::logic::capture::SpoolDirCapture;
use oathkeeper_core::logic::config::ConfigStore;
use oathkeeper_core::logic::error::PipelineError;
use oathkeeper_core::logic::model::{ClassifierConfig, OnnxClassifier};
use oathkeeper_core::logic::notify::{AlertSink, LogSink, Notifier, WebhookSink};
use oathkeeper_core::logic::pipeline::{PipelineContext, Scheduler};
use oathkeeper_core::logic::storage::{EventStore, StoreKey};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting {} v{}...", APP_NAME, APP_VERSION);

    if let Err(e) = run().await {
        log::error!("{} failed to start: {}", APP_NAME, e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let data_dir = constants::get_data_dir();
    log::info!("Data directory: {}", data_dir.display());

    // Config
    let config = Arc::new(ConfigStore::load_or_default(&data_dir.join(CONFIG_FILE)));
    config.apply_env_overrides();
    log::info!("Capture interval: {}ms", config.snapshot().capture_interval_ms);

    // Event store
    let key_hex = constants::get_store_key_hex().ok_or_else(|| {
        PipelineError::Storage("OATHKEEPER_STORE_KEY is not set (64 hex chars)".to_string())
    })?;
    let key = StoreKey::from_hex(&key_hex)?;
    let store = Arc::new(EventStore::open(&data_dir.join(DATABASE_FILE), &key)?);

    let report = store.verify_integrity()?;
    if !report.is_intact() {
        log::warn!(
            "Event store integrity check failed: {} tampered events, {} missing events, audit chain broken at {:?}",
            report.tampered_events.len(),
            report.missing_events.len(),
            report.broken_audit_entry
        );
    }

    // Classifier
    let engine = Arc::new(OnnxClassifier::load(&constants::get_model_path(), ClassifierConfig::default())?);

    // Capture + alerts
    let spool_dir = constants::get_spool_dir();
    std::fs::create_dir_all(&spool_dir)?;
    log::info!("Reading frames from {}", spool_dir.display());
    let capture = Arc::new(SpoolDirCapture::new(spool_dir).consuming());

    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];
    if let Some(url) = constants::get_webhook_url() {
        log::info!("Webhook alerts enabled");
        sinks.push(Arc::new(WebhookSink::new(url)));
    }
    let notifier = Arc::new(Notifier::new(sinks));

    // Pipeline
    let scheduler = Scheduler::new();
    let context = PipelineContext::new(engine, store, config, capture, notifier);
    scheduler.arm(context)?;
    scheduler.start()?;

    log::info!("{} running, press Ctrl+C to stop", APP_NAME);
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
    }

    log::info!("Shutting down...");
    scheduler.stop().await;

    let stats = scheduler.stats();
    log::info!(
        "Session summary: {} ticks, {} recorded, {} discarded, {} failed, {} dropped",
        stats.ticks,
        stats.recorded,
        stats.discarded,
        stats.failed,
        stats.dropped_ticks
    );
    Ok(())
}
