use chrono::{DateTime, Duration, Utc};
use claude_usage_badge::error::FetchError;
use claude_usage_badge::models::*;
use claude_usage_badge::services::badge::BadgeProjector;
use claude_usage_badge::services::key_order::KeyOrderResolver;
use claude_usage_badge::services::poll_orchestrator::PollOrchestrator;
use claude_usage_badge::services::state_store::FileStateStore;
use claude_usage_badge::services::{
    load, BadgeSink, Notifier, StateStore, UsageFetcher, CARD_ORDER_KEY, NOTIFIED_THRESHOLDS_KEY,
    USAGE_DATA_KEY,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Default)]
struct ScriptedFetcher {
    responses: Mutex<VecDeque<Result<MetricSnapshot, FetchError>>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    fn push(&self, response: Result<MetricSnapshot, FetchError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl UsageFetcher for ScriptedFetcher {
    async fn fetch_snapshot(&self) -> Result<MetricSnapshot, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(FetchError::Transport("no scripted response".to_string())))
    }
}

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|n| n.id.clone()).collect()
    }
}

#[async_trait::async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingBadge {
    badges: Mutex<Vec<Badge>>,
}

impl RecordingBadge {
    fn last(&self) -> Option<Badge> {
        self.badges.lock().unwrap().last().cloned()
    }

    fn count(&self) -> usize {
        self.badges.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl BadgeSink for RecordingBadge {
    async fn set_badge(&self, badge: &Badge) -> anyhow::Result<()> {
        self.badges.lock().unwrap().push(badge.clone());
        Ok(())
    }
}

struct Harness {
    _dir: TempDir,
    store: Arc<FileStateStore>,
    fetcher: Arc<ScriptedFetcher>,
    notifier: Arc<RecordingNotifier>,
    badge: Arc<RecordingBadge>,
    orchestrator: PollOrchestrator,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(FileStateStore::open(dir.path().join("state.json")).unwrap());
    let fetcher = Arc::new(ScriptedFetcher::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let badge = Arc::new(RecordingBadge::default());

    let orchestrator = PollOrchestrator::new(
        fetcher.clone(),
        store.clone(),
        notifier.clone(),
        badge.clone(),
        BadgeProjector::default(),
    );

    Harness {
        _dir: dir,
        store,
        fetcher,
        notifier,
        badge,
        orchestrator,
    }
}

fn entry(utilization: f64, resets_at: Option<DateTime<Utc>>) -> MetricEntry {
    MetricEntry {
        utilization,
        resets_at,
    }
}

fn five_hour_at(utilization: f64) -> MetricSnapshot {
    MetricSnapshot {
        five_hour: Some(entry(utilization, None)),
        ..Default::default()
    }
}

async fn stored_state(store: &FileStateStore) -> PersistedState {
    load::<PersistedState, _>(store, USAGE_DATA_KEY)
        .await
        .unwrap()
        .expect("usage state should be stored")
}

#[tokio::test]
async fn test_first_poll_failure_shows_degraded_badge() {
    let h = harness();
    h.fetcher.push(Err(FetchError::AuthMissing));

    h.orchestrator.poll().await;

    let state = stored_state(&h.store).await;
    assert_eq!(state.snapshot, None);
    assert_eq!(state.error.as_deref(), Some("NO_COOKIES"));

    let badge = h.badge.last().unwrap();
    assert_eq!(badge.text, "!");
    assert_eq!(badge.background_color, "#666666");
    assert!(h.notifier.ids().is_empty());
}

#[tokio::test]
async fn test_successful_poll_projects_badge_and_fires_crossed_thresholds() {
    let h = harness();
    let now = Utc::now();
    let resets_at = now + Duration::hours(3) + Duration::minutes(40);
    h.fetcher.push(Ok(MetricSnapshot {
        five_hour: Some(entry(82.0, Some(resets_at))),
        seven_day: Some(entry(20.0, None)),
        ..Default::default()
    }));

    h.orchestrator.poll_at(now).await;

    let badge = h.badge.last().unwrap();
    assert_eq!(badge.text, "82");
    assert_eq!(badge.background_color, "#FF9800");
    assert_eq!(badge.text_color, "#FFFFFF");

    assert_eq!(h.notifier.ids(), vec!["five_hour_50", "five_hour_75"]);
    let sent = h.notifier.sent.lock().unwrap().clone();
    assert!(sent[1].body.contains("Current Session"));
    assert!(sent[1].body.contains("82%"));
    assert!(sent[1].body.contains("Resets in 3h 40m"));

    let state = stored_state(&h.store).await;
    assert_eq!(state.error, None);
    assert_eq!(state.last_updated, now);

    let notified: NotifiedSet = load(h.store.as_ref(), NOTIFIED_THRESHOLDS_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notified.ids().collect::<Vec<_>>(), vec!["five_hour_50", "five_hour_75"]);
}

#[tokio::test]
async fn test_reorder_reprojects_badge_without_fetching() {
    let h = harness();
    h.fetcher.push(Ok(MetricSnapshot {
        five_hour: Some(entry(82.0, None)),
        seven_day_opus: Some(entry(30.0, None)),
        ..Default::default()
    }));
    h.orchestrator.poll().await;
    assert_eq!(h.badge.last().unwrap().text, "82");

    let order = KeyOrder::from(vec![MetricKey::SevenDayOpus, MetricKey::FiveHour]);
    KeyOrderResolver::save(h.store.as_ref(), &order).await.unwrap();
    h.orchestrator.reproject_badge().await.unwrap();

    let badge = h.badge.last().unwrap();
    assert_eq!(badge.text, "30");
    assert_eq!(badge.background_color, "#4CAF50");
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_failure_keeps_last_good_snapshot_until_next_success() {
    let h = harness();
    h.fetcher.push(Ok(five_hour_at(60.0)));
    h.fetcher.push(Err(FetchError::RemoteError(500)));
    h.fetcher.push(Ok(five_hour_at(40.0)));

    h.orchestrator.poll().await;
    let badges_after_success = h.badge.count();

    let failed_at = Utc::now() + Duration::minutes(5);
    h.orchestrator.poll_at(failed_at).await;
    let state = stored_state(&h.store).await;
    assert_eq!(state.snapshot, Some(five_hour_at(60.0)));
    assert_eq!(state.error.as_deref(), Some("API_ERROR_500"));
    assert_eq!(state.last_updated, failed_at);
    // stale data stays on the badge
    assert_eq!(h.badge.count(), badges_after_success);
    assert_eq!(h.notifier.ids(), vec!["five_hour_50"]);

    h.orchestrator.poll().await;
    let state = stored_state(&h.store).await;
    assert_eq!(state.snapshot, Some(five_hour_at(40.0)));
    assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_repeated_failures_refresh_timestamp_and_error() {
    let h = harness();
    h.fetcher.push(Err(FetchError::OrgUnresolved));
    h.fetcher.push(Err(FetchError::Transport("connection refused".to_string())));

    let first = Utc::now();
    h.orchestrator.poll_at(first).await;
    let second = first + Duration::minutes(5);
    h.orchestrator.poll_at(second).await;

    let state = stored_state(&h.store).await;
    assert_eq!(state.snapshot, None);
    assert_eq!(state.error.as_deref(), Some("connection refused"));
    assert_eq!(state.last_updated, second);
    assert_eq!(h.badge.count(), 2);
}

#[tokio::test]
async fn test_threshold_debounce_across_polls() {
    let h = harness();
    for utilization in [45.0, 55.0, 80.0, 85.0, 40.0, 60.0] {
        h.fetcher.push(Ok(five_hour_at(utilization)));
    }

    for _ in 0..6 {
        h.orchestrator.poll().await;
    }

    assert_eq!(
        h.notifier.ids(),
        vec!["five_hour_50", "five_hour_75", "five_hour_50"]
    );

    let notified: NotifiedSet = load(h.store.as_ref(), NOTIFIED_THRESHOLDS_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notified.ids().collect::<Vec<_>>(), vec!["five_hour_50"]);
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = Arc::new(FileStateStore::open(path.clone()).unwrap());
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push(Ok(five_hour_at(77.0)));
        let orchestrator = PollOrchestrator::new(
            fetcher,
            store,
            Arc::new(RecordingNotifier::default()),
            Arc::new(RecordingBadge::default()),
            BadgeProjector::default(),
        );
        orchestrator.poll().await;
    }

    // the same crossings must not fire again after a restart
    let store = Arc::new(FileStateStore::open(path).unwrap());
    let fetcher = Arc::new(ScriptedFetcher::default());
    fetcher.push(Ok(five_hour_at(78.0)));
    let notifier = Arc::new(RecordingNotifier::default());
    let orchestrator = PollOrchestrator::new(
        fetcher,
        store.clone(),
        notifier.clone(),
        Arc::new(RecordingBadge::default()),
        BadgeProjector::default(),
    );
    orchestrator.poll().await;

    assert!(notifier.ids().is_empty());
    assert_eq!(stored_state(&store).await.snapshot, Some(five_hour_at(78.0)));
}

#[tokio::test]
async fn test_run_polls_once_at_startup() {
    let h = harness();
    h.fetcher.push(Ok(five_hour_at(10.0)));

    h.orchestrator
        .run_until(
            std::time::Duration::from_secs(3600),
            h.store.subscribe(),
            tokio::time::sleep(std::time::Duration::from_millis(200)),
        )
        .await
        .unwrap();

    assert_eq!(h.fetcher.calls(), 1);
    assert_eq!(h.badge.last().unwrap().text, "10");
}

fn five_hour_and_opus() -> MetricSnapshot {
    MetricSnapshot {
        five_hour: Some(entry(82.0, None)),
        seven_day_opus: Some(entry(30.0, None)),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_run_reprojects_on_card_order_change() {
    let h = harness();
    h.fetcher.push(Ok(five_hour_and_opus()));
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

    let reorder = async {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(h.badge.last().unwrap().text, "82");

        let order = KeyOrder::from(vec![MetricKey::SevenDayOpus]);
        KeyOrderResolver::save(h.store.as_ref(), &order).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        let _ = stop_tx.send(());
    };
    let (result, _) = tokio::join!(
        h.orchestrator.run_until(
            std::time::Duration::from_secs(3600),
            h.store.subscribe(),
            stop_rx,
        ),
        reorder
    );
    result.unwrap();

    assert_eq!(h.badge.last().unwrap().text, "30");
    assert_eq!(h.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_run_reprojects_after_missing_changes() {
    let h = harness();
    h.fetcher.push(Ok(five_hour_and_opus()));
    h.orchestrator.poll().await;
    let order = KeyOrder::from(vec![MetricKey::SevenDayOpus]);
    KeyOrderResolver::save(h.store.as_ref(), &order).await.unwrap();
    assert_eq!(h.badge.last().unwrap().text, "82");

    // overflow the feed so the receiver lags past any cardOrder message
    let changes = h.store.subscribe();
    for i in 0..50 {
        h.store.set(&format!("filler_{i}"), serde_json::json!(i)).await.unwrap();
    }

    // no scripted response: the startup poll fails and leaves the badge alone
    h.orchestrator
        .run_until(
            std::time::Duration::from_secs(3600),
            changes,
            tokio::time::sleep(std::time::Duration::from_millis(200)),
        )
        .await
        .unwrap();

    assert_eq!(h.badge.last().unwrap().text, "30");
    assert_eq!(h.fetcher.calls(), 2);
}

#[tokio::test]
async fn test_watch_announces_writes_from_another_store() {
    let h = harness();
    let _watcher = h.store.watch().unwrap();
    let mut changes = h.store.subscribe();

    let other = FileStateStore::open(h.store.path().to_path_buf()).unwrap();
    let order = KeyOrder::from(vec![MetricKey::SevenDay]);
    KeyOrderResolver::save(&other, &order).await.unwrap();

    let announced = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if changes.recv().await.unwrap() == CARD_ORDER_KEY {
                break;
            }
        }
    })
    .await;
    assert!(announced.is_ok());

    let order = KeyOrderResolver::load(h.store.as_ref()).await.unwrap().unwrap();
    assert_eq!(order.keys(), &[MetricKey::SevenDay]);
}

#[tokio::test]
async fn test_malformed_card_order_falls_back_to_default_order() {
    let h = harness();
    h.store.set(CARD_ORDER_KEY, serde_json::json!("five_hour")).await.unwrap();
    h.fetcher.push(Ok(five_hour_at(82.0)));

    h.orchestrator.poll().await;

    assert_eq!(h.badge.last().unwrap().text, "82");
    assert_eq!(h.notifier.ids(), vec!["five_hour_50", "five_hour_75"]);
    h.orchestrator.reproject_badge().await.unwrap();
    assert_eq!(h.badge.count(), 2);
}

#[tokio::test]
async fn test_user_config_defaults() {
    let config = UserConfig::default();
    assert_eq!(config.poll_interval_minutes, 5);
    assert_eq!(config.api_base_url, "https://claude.ai/api/organizations");
    assert_eq!(config.badge_palette, BadgePalette::default());
    assert!(config.cookie_file.is_none());
}
