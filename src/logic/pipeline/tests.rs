//! Integration Tests for the Detection Pipeline
//!
//! Fake classifier, capture and alert sink wired through a real in-memory
//! event store and config store.

#[cfg(test)]
mod integration_tests {
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use image::DynamicImage;
    use parking_lot::Mutex;

    use crate::logic::capture::{CaptureProvider, CapturedFrame};
    use crate::logic::config::{ConfigStore, PipelineConfig};
    use crate::logic::error::{PipelineError, PipelineResult};
    use crate::logic::model::{ClassificationResult, InferenceEngine, Label};
    use crate::logic::notify::{Alert, AlertSink, Notifier, SinkError, WebhookSink};
    use crate::logic::pipeline::{
        run_cycle, CycleOutcome, PipelineContext, Scheduler, SchedulerError, SchedulerState,
    };
    use crate::logic::policy::Severity;
    use crate::logic::storage::{EventFilter, EventStore, StoreKey};

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    struct FakeEngine {
        scores: [f32; 5],
        delay: Duration,
        loaded: AtomicBool,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeEngine {
        /// Scores in model output order: drawings, hentai, neutral, porn, sexy
        fn new(scores: [f32; 5]) -> Self {
            Self {
                scores,
                delay: Duration::ZERO,
                loaded: AtomicBool::new(true),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        fn slow(scores: [f32; 5], delay: Duration) -> Self {
            Self { delay, ..Self::new(scores) }
        }
    }

    impl InferenceEngine for FakeEngine {
        fn classify(&self, _image: &DynamicImage) -> PipelineResult<ClassificationResult> {
            if !self.loaded.load(Ordering::SeqCst) {
                return Err(PipelineError::ModelUnavailable("unloaded".to_string()));
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.active.fetch_sub(1, Ordering::SeqCst);
            ClassificationResult::from_raw(&self.scores)
        }

        fn is_loaded(&self) -> bool {
            self.loaded.load(Ordering::SeqCst)
        }

        fn unload(&self) {
            self.loaded.store(false, Ordering::SeqCst);
        }
    }

    struct FakeCapture {
        available: bool,
    }

    impl CaptureProvider for FakeCapture {
        fn capture_frame(&self) -> PipelineResult<CapturedFrame> {
            if !self.available {
                return Err(PipelineError::CaptureUnavailable("permission revoked".to_string()));
            }
            Ok(CapturedFrame {
                source_context: Some("Browser".to_string()),
                ..CapturedFrame::now(DynamicImage::new_rgb8(4, 4))
            })
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<Alert>>);

    impl AlertSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }
        fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
            self.0.lock().push(alert.clone());
            Ok(())
        }
    }

    struct Harness {
        engine: Arc<FakeEngine>,
        store: Arc<EventStore>,
        config: Arc<ConfigStore>,
        sink: Arc<RecordingSink>,
        context: PipelineContext,
    }

    fn harness(engine: FakeEngine, capture_available: bool, config: PipelineConfig) -> Harness {
        let engine = Arc::new(engine);
        let store = Arc::new(EventStore::open_in_memory(&StoreKey::generate()).unwrap());
        let config = Arc::new(ConfigStore::new(config).unwrap());
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(Notifier::new(vec![sink.clone() as Arc<dyn AlertSink>]));

        let context = PipelineContext::new(
            engine.clone(),
            store.clone(),
            config.clone(),
            Arc::new(FakeCapture { available: capture_available }),
            notifier,
        );
        Harness { engine, store, config, sink, context }
    }

    const PORN_075: [f32; 5] = [0.05, 0.05, 0.10, 0.75, 0.05];
    const NEUTRAL_099: [f32; 5] = [0.0, 0.0, 0.99, 0.005, 0.005];

    fn fast_config() -> PipelineConfig {
        PipelineConfig { capture_interval_ms: 500, ..Default::default() }
    }

    // ------------------------------------------------------------------------
    // Single cycle
    // ------------------------------------------------------------------------

    #[test]
    fn test_high_risk_recorded_critical_and_notified() {
        let h = harness(FakeEngine::new(PORN_075), true, PipelineConfig::default());

        let outcome = run_cycle(&h.context);
        let CycleOutcome::Recorded { event_id, severity, notified, .. } = outcome.clone() else {
            panic!("expected Recorded, got {:?}", outcome);
        };
        assert_eq!(severity, Severity::Critical);
        assert!(notified);

        let stored = h.store.get(event_id).unwrap().unwrap();
        assert_eq!(stored.label, Label::Porn);
        assert_eq!(stored.severity, Severity::Critical);
        assert_eq!(stored.confidence, 0.75);
        assert_eq!(stored.source_context.as_deref(), Some("Browser"));

        let alerts = h.sink.0.lock();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].title, "Critical Content Detected");
        assert_eq!(alerts[0].message, "Detected: porn (75.0%)");
    }

    #[test]
    fn test_benign_neither_persisted_nor_notified() {
        let h = harness(FakeEngine::new(NEUTRAL_099), true, PipelineConfig::default());

        let outcome = run_cycle(&h.context);
        assert!(matches!(outcome, CycleOutcome::Discarded { label: Label::Neutral, .. }));
        assert_eq!(h.store.count().unwrap(), 0);
        assert!(h.sink.0.lock().is_empty());
    }

    #[test]
    fn test_notifications_disabled_still_persists() {
        let config = PipelineConfig { notifications_enabled: false, ..Default::default() };
        let h = harness(FakeEngine::new(PORN_075), true, config);

        assert!(matches!(run_cycle(&h.context), CycleOutcome::Recorded { notified: false, .. }));
        assert_eq!(h.store.count().unwrap(), 1);
        assert!(h.sink.0.lock().is_empty());
    }

    #[test]
    fn test_threshold_change_applies_next_cycle() {
        let h = harness(FakeEngine::new(PORN_075), true, PipelineConfig::default());
        assert!(matches!(run_cycle(&h.context), CycleOutcome::Recorded { severity: Severity::Critical, .. }));

        h.config.update(|c| c.thresholds.porn.high = 0.9).unwrap();
        assert!(matches!(run_cycle(&h.context), CycleOutcome::Recorded { severity: Severity::Warning, .. }));

        let warnings = h.store.list(&EventFilter::with_severity(Severity::Warning)).unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_silent_webhook_does_not_hold_the_cycle() {
        // Endpoint accepts the connection and never answers
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/alerts", listener.local_addr().unwrap());
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                held.push(stream);
            }
        });

        let store = Arc::new(EventStore::open_in_memory(&StoreKey::generate()).unwrap());
        let notifier = Arc::new(Notifier::new(vec![Arc::new(WebhookSink::new(url)) as Arc<dyn AlertSink>]));
        let context = PipelineContext::new(
            Arc::new(FakeEngine::new(PORN_075)),
            store.clone(),
            Arc::new(ConfigStore::new(PipelineConfig::default()).unwrap()),
            Arc::new(FakeCapture { available: true }),
            notifier,
        );

        let started = Instant::now();
        for _ in 0..3 {
            assert!(matches!(run_cycle(&context), CycleOutcome::Recorded { notified: true, .. }));
        }
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_capture_failure_skips_cycle() {
        let h = harness(FakeEngine::new(PORN_075), false, PipelineConfig::default());

        let outcome = run_cycle(&h.context);
        assert!(matches!(outcome, CycleOutcome::Failed { kind: "capture_unavailable", .. }));
        assert_eq!(h.engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.store.count().unwrap(), 0);
    }

    #[test]
    fn test_unloaded_model_skips_cycle() {
        let h = harness(FakeEngine::new(PORN_075), true, PipelineConfig::default());
        h.engine.unload();

        assert!(matches!(run_cycle(&h.context), CycleOutcome::Failed { kind: "model_unavailable", .. }));
        assert_eq!(h.store.count().unwrap(), 0);
    }

    // ------------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_transitions() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.start(), Err(SchedulerError::NotArmed));

        let h = harness(FakeEngine::new(NEUTRAL_099), true, fast_config());
        scheduler.arm(h.context).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Armed);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(scheduler.start(), Err(SchedulerError::AlreadyRunning));

        scheduler.pause().await;
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(h.engine.is_loaded(), "pause keeps resources");

        scheduler.start().unwrap();
        scheduler.stop().await;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!h.engine.is_loaded(), "stop unloads the classifier");

        assert_eq!(scheduler.start(), Err(SchedulerError::Stopped));
        let again = harness(FakeEngine::new(NEUTRAL_099), true, fast_config());
        assert_eq!(scheduler.arm(again.context), Err(SchedulerError::Stopped));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_completion_signal() {
        let h = harness(FakeEngine::new(PORN_075), true, fast_config());
        let scheduler = Scheduler::new();
        let mut reports = scheduler.subscribe();
        scheduler.arm(h.context).unwrap();
        scheduler.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), reports.changed())
            .await
            .expect("no cycle completed")
            .unwrap();
        let report = reports.borrow().clone().unwrap();
        assert_eq!(report.cycle, 1);
        assert!(matches!(report.outcome, CycleOutcome::Recorded { severity: Severity::Critical, .. }));

        scheduler.stop().await;
        assert!(h.store.count().unwrap() >= 1);
        assert!(scheduler.stats().recorded >= 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_after_cycle_leaves_no_context_handles() {
        let h = harness(FakeEngine::new(PORN_075), true, fast_config());
        let scheduler = Scheduler::new();
        let mut reports = scheduler.subscribe();
        scheduler.arm(h.context).unwrap();
        scheduler.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), reports.changed())
            .await
            .expect("no cycle completed")
            .unwrap();
        scheduler.stop().await;

        // Only the harness still holds the store once the context is released
        assert_eq!(Arc::strong_count(&h.store), 1);
        assert!(!h.engine.is_loaded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_at_most_one_cycle_in_flight() {
        // 1250ms cycle on a 500ms interval: ticks at 1000 and 1500 land mid-cycle
        let interval = fast_config().capture_interval_ms;
        let cycle = Duration::from_millis(1250);
        let expected_drops = cycle.as_millis() as u64 / interval;

        let h = harness(FakeEngine::slow(NEUTRAL_099, cycle), true, fast_config());
        let scheduler = Scheduler::new();
        let mut reports = scheduler.subscribe();
        scheduler.arm(h.context).unwrap();
        scheduler.start().unwrap();

        tokio::time::timeout(Duration::from_secs(5), reports.changed())
            .await
            .expect("first cycle never completed")
            .unwrap();
        scheduler.stop().await;

        let stats = scheduler.stats();
        assert_eq!(h.engine.max_active.load(Ordering::SeqCst), 1);
        assert_eq!(stats.cycles_started, 1, "stats: {:?}", stats);
        assert_eq!(stats.dropped_ticks, expected_drops, "stats: {:?}", stats);
        assert_eq!(stats.ticks, stats.cycles_started + stats.dropped_ticks);
        assert!(!scheduler.is_cycle_in_flight());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_failures_do_not_end_scheduler() {
        let h = harness(FakeEngine::new(PORN_075), false, fast_config());
        let scheduler = Scheduler::new();
        scheduler.arm(h.context).unwrap();
        scheduler.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.stop().await;

        let stats = scheduler.stats();
        assert!(stats.failed >= 1);
        assert_eq!(stats.recorded, 0);
        assert_eq!(h.store.count().unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_abandons_after_grace() {
        let h = harness(FakeEngine::slow(NEUTRAL_099, Duration::from_millis(1500)), true, fast_config());
        let scheduler = Scheduler::with_grace(Duration::from_millis(100));
        scheduler.arm(h.context).unwrap();
        scheduler.start().unwrap();

        let deadline = Instant::now() + Duration::from_secs(3);
        while !scheduler.is_cycle_in_flight() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(scheduler.is_cycle_in_flight());

        let started = Instant::now();
        scheduler.stop().await;
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!h.engine.is_loaded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_drop_releases_context() {
        let h = harness(FakeEngine::new(NEUTRAL_099), true, fast_config());
        {
            let scheduler = Scheduler::new();
            scheduler.arm(h.context).unwrap();
            scheduler.start().unwrap();
        }
        assert!(!h.engine.is_loaded());
    }
}
