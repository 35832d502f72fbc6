//! Pipeline Context
//!
//! Everything one detection cycle needs, constructed once and passed by
//! handle. Owned by the scheduler from `arm` until `Stopped`.

use std::sync::Arc;

use crate::logic::capture::CaptureProvider;
use crate::logic::config::ConfigStore;
use crate::logic::model::InferenceEngine;
use crate::logic::notify::Notifier;
use crate::logic::storage::EventStore;

pub struct PipelineContext {
    pub engine: Arc<dyn InferenceEngine>,
    pub store: Arc<EventStore>,
    pub config: Arc<ConfigStore>,
    pub capture: Arc<dyn CaptureProvider>,
    pub notifier: Arc<Notifier>,
}

impl PipelineContext {
    pub fn new(
        engine: Arc<dyn InferenceEngine>,
        store: Arc<EventStore>,
        config: Arc<ConfigStore>,
        capture: Arc<dyn CaptureProvider>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self { engine, store, config, capture, notifier }
    }

    /// Unload the classifier and close the store.
    ///
    /// If another handle is still alive (an abandoned cycle), the store
    /// closes when that handle drops; the classifier is unloaded regardless,
    /// so the straggler fails fast with `ModelUnavailable`.
    pub fn release(self: Arc<Self>) {
        self.engine.unload();

        let ctx = match Arc::try_unwrap(self) {
            Ok(ctx) => ctx,
            Err(_) => {
                log::warn!("[Pipeline] Context still shared by an abandoned cycle; store closes when it finishes");
                return;
            }
        };

        match Arc::try_unwrap(ctx.store) {
            Ok(store) => {
                if let Err(e) = store.close() {
                    log::error!("[Pipeline] Failed to close event store: {}", e);
                }
            }
            Err(_) => log::debug!("[Pipeline] Event store shared elsewhere, leaving it open"),
        }
        log::info!("[Pipeline] Context released");
    }
}
