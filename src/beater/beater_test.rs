use super::*;
use crate::clock::MockClock;
use crate::input::okta::client::MockLogSource;
use crate::input::okta::{LogEvent, LogPage, OktaError, PageRequest};
use crate::publisher::sink::CollectingSink;
use crate::server::{create_metrics, shutdown_channel, ShutdownReason, Signal};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

fn beat_config(period: Duration) -> BeatConfig {
    BeatConfig {
        period,
        queue_size: 8,
        ..BeatConfig::default()
    }
}

fn log_event(uuid: &str) -> LogEvent {
    LogEvent::from_value(json!({
        "uuid": uuid,
        "published": "2024-03-01T12:00:00Z",
        "eventType": "user.session.start"
    }))
    .unwrap()
}

/// Source whose first fetch parks until the test releases it
#[derive(Default)]
struct GatedSource {
    started: Notify,
    release: Notify,
    fetches: AtomicUsize,
}

#[async_trait]
impl LogSource for GatedSource {
    async fn fetch_page(&self, _request: &PageRequest) -> Result<LogPage, OktaError> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(LogPage::default());
        }
        self.started.notify_one();
        self.release.notified().await;
        Ok(LogPage {
            events: vec![log_event("a"), log_event("b")],
            skipped: 0,
            next: None,
        })
    }
}

fn build(
    period: Duration,
    source: Arc<dyn LogSource>,
    sink: CollectingSink,
    lifecycle: Lifecycle,
    metrics: Option<SharedMetrics>,
) -> Oktabeat {
    Oktabeat::with_parts(
        &beat_config(period),
        source,
        Box::new(sink),
        Arc::new(MockClock::new(Utc::now())),
        lifecycle,
        metrics,
    )
}

#[tokio::test]
async fn test_run_reaches_running_then_terminates_on_shutdown() {
    let lifecycle = Lifecycle::new();
    let beat = build(
        Duration::from_secs(3600),
        Arc::new(MockLogSource::new()),
        CollectingSink::new(),
        lifecycle.clone(),
        None,
    );
    let (controller, signal) = shutdown_channel();

    let handle = tokio::spawn(beat.run(signal));
    tokio::time::timeout(
        Duration::from_secs(1),
        lifecycle.wait_for(LifecycleState::Running),
    )
    .await
    .expect("beat should reach running");

    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));
    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("beat should stop promptly")
        .unwrap()
        .unwrap();

    assert_eq!(stats, PublishStats::default());
    assert_eq!(lifecycle.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn test_no_fetch_before_first_period() {
    let source = Arc::new(MockLogSource::new());
    let lifecycle = Lifecycle::new();
    let beat = build(
        Duration::from_secs(3600),
        source.clone(),
        CollectingSink::new(),
        lifecycle.clone(),
        None,
    );
    let (controller, signal) = shutdown_channel();

    let handle = tokio::spawn(beat.run(signal));
    lifecycle.wait_for(LifecycleState::Running).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));
    handle.await.unwrap().unwrap();

    assert!(source.requests().is_empty(), "first tick must wait one period");
}

#[tokio::test]
async fn test_events_are_drained_on_shutdown() {
    let source = Arc::new(MockLogSource::new());
    source.push_page(Ok(LogPage {
        events: vec![log_event("a"), log_event("b")],
        skipped: 0,
        next: None,
    }));
    let sink = CollectingSink::new();
    let lifecycle = Lifecycle::new();
    let metrics = create_metrics().unwrap();
    let beat = build(
        Duration::from_millis(20),
        source.clone(),
        sink.clone(),
        lifecycle.clone(),
        Some(metrics.clone()),
    );
    let (controller, signal) = shutdown_channel();

    let handle = tokio::spawn(beat.run(signal));
    // Wait for at least two cycles
    for _ in 0..100 {
        if source.requests().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));
    let stats = handle.await.unwrap().unwrap();

    assert_eq!(stats.published, 2, "later cycles must not republish");
    assert_eq!(sink.events().len(), 2);
    let text = metrics.encode().unwrap();
    assert!(text.contains("oktabeat_events_published_total 2"));
    assert!(text.contains(r#"oktabeat_fetch_total{result="success"}"#));
}

#[tokio::test]
async fn test_fetch_errors_do_not_stop_the_beat() {
    let source = Arc::new(MockLogSource::new());
    source.push_page(Err(OktaError::Retryable { status: 503 }));
    source.push_page(Err(OktaError::Api {
        status: 401,
        body: "unauthorized".to_string(),
    }));
    source.push_page(Ok(LogPage {
        events: vec![log_event("a")],
        skipped: 0,
        next: None,
    }));
    let sink = CollectingSink::new();
    let lifecycle = Lifecycle::new();
    let beat = build(
        Duration::from_millis(20),
        source.clone(),
        sink.clone(),
        lifecycle.clone(),
        None,
    );
    let (controller, signal) = shutdown_channel();

    let handle = tokio::spawn(beat.run(signal));
    for _ in 0..100 {
        if source.requests().len() >= 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(lifecycle.is_running(), "errors must not stop the beat");
    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));
    handle.await.unwrap().unwrap();

    assert_eq!(sink.events().len(), 1);
}

#[tokio::test]
async fn test_shutdown_before_run_still_terminates() {
    let lifecycle = Lifecycle::new();
    let beat = build(
        Duration::from_secs(3600),
        Arc::new(MockLogSource::new()),
        CollectingSink::new(),
        lifecycle.clone(),
        None,
    );
    let (controller, signal) = shutdown_channel();
    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));

    beat.run(signal).await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Terminated);
}

#[tokio::test]
async fn test_run_rejects_a_lifecycle_that_already_stopped() {
    let lifecycle = Lifecycle::new();
    lifecycle.transition(LifecycleState::Stopping).unwrap();
    let beat = build(
        Duration::from_secs(3600),
        Arc::new(MockLogSource::new()),
        CollectingSink::new(),
        lifecycle.clone(),
        None,
    );
    let (_controller, signal) = shutdown_channel();

    let err = beat.run(signal).await.unwrap_err();
    assert!(matches!(err, BeatError::Lifecycle(_)));
}

#[tokio::test]
async fn test_new_opens_file_output() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "oktabeat:\n  okta_base_url: http://127.0.0.1:9/api/v1\noutput:\n  file:\n    path: {}\n",
        dir.path().join("data").display()
    );
    let config = Config::from_yaml(&yaml).unwrap();

    let beat = Oktabeat::new(&config, Lifecycle::new(), None).await.unwrap();
    let (controller, signal) = shutdown_channel();
    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));
    beat.run(signal).await.unwrap();

    assert!(dir.path().join("data").join("oktabeat.ndjson").exists());
}

#[tokio::test]
async fn test_shutdown_lets_an_in_progress_fetch_finish() {
    let source = Arc::new(GatedSource::default());
    let sink = CollectingSink::new();
    let lifecycle = Lifecycle::new();
    let beat = build(
        Duration::from_millis(20),
        source.clone(),
        sink.clone(),
        lifecycle.clone(),
        None,
    );
    let (controller, signal) = shutdown_channel();

    let handle = tokio::spawn(beat.run(signal));
    tokio::time::timeout(Duration::from_secs(1), source.started.notified())
        .await
        .expect("first fetch should start");

    controller.shutdown(ShutdownReason::Signal(Signal::Terminate));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!handle.is_finished(), "stop must wait for the fetch");
    assert_eq!(lifecycle.state(), LifecycleState::Running);

    source.release.notify_one();
    let stats = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("beat should stop once the fetch returns")
        .unwrap()
        .unwrap();

    assert_eq!(stats.published, 2);
    assert_eq!(sink.events().len(), 2);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    assert_eq!(lifecycle.state(), LifecycleState::Terminated);
}
