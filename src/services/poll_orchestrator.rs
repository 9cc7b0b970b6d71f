use super::badge::BadgeProjector;
use super::key_order::KeyOrderResolver;
use super::threshold_notifier::ThresholdNotifier;
use super::{
    load, save, BadgeSink, Notifier, StateStore, UsageFetcher, CARD_ORDER_KEY,
    NOTIFIED_THRESHOLDS_KEY, USAGE_DATA_KEY,
};
use crate::error::FetchError;
use crate::models::*;
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{interval, MissedTickBehavior};

/// Fetch, persist, project the badge and raise alerts, once per period.
///
/// Invocations are expected to be serial; nothing here locks.
pub struct PollOrchestrator {
    fetcher: Arc<dyn UsageFetcher>,
    store: Arc<dyn StateStore>,
    notifier: Arc<dyn Notifier>,
    badge_sink: Arc<dyn BadgeSink>,
    projector: BadgeProjector,
}

impl PollOrchestrator {
    pub fn new(
        fetcher: Arc<dyn UsageFetcher>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
        badge_sink: Arc<dyn BadgeSink>,
        projector: BadgeProjector,
    ) -> Self {
        Self {
            fetcher,
            store,
            notifier,
            badge_sink,
            projector,
        }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// One scheduled poll. Failures are recorded, never returned.
    pub async fn poll(&self) {
        self.poll_at(Utc::now()).await;
    }

    pub async fn poll_at(&self, now: DateTime<Utc>) {
        let result = match self.fetcher.fetch_snapshot().await {
            Ok(snapshot) => self.on_success(snapshot, now).await,
            Err(err) => self.on_failure(err, now).await,
        };
        if let Err(e) = result {
            log::error!("Error updating usage: {}", e);
        }
    }

    async fn on_success(&self, snapshot: MetricSnapshot, now: DateTime<Utc>) -> Result<()> {
        log::info!(
            "Fetched usage for {} buckets",
            snapshot.available_keys().len()
        );

        let state = PersistedState {
            snapshot: Some(snapshot.clone()),
            last_updated: now,
            error: None,
        };
        save(self.store.as_ref(), USAGE_DATA_KEY, &state).await?;

        let preference = self.load_preference().await;
        self.show(self.projector.project(&snapshot, preference.as_ref()))
            .await;

        let notified: NotifiedSet = load(self.store.as_ref(), NOTIFIED_THRESHOLDS_KEY)
            .await?
            .unwrap_or_default();
        let (notifications, updated) =
            ThresholdNotifier::evaluate(&snapshot, preference.as_ref(), &notified, now);

        for notification in &notifications {
            if let Err(e) = self.notifier.notify(notification).await {
                log::warn!("Failed to deliver notification {}: {}", notification.id, e);
            }
        }

        if updated != notified {
            save(self.store.as_ref(), NOTIFIED_THRESHOLDS_KEY, &updated).await?;
        }
        Ok(())
    }

    async fn on_failure(&self, err: FetchError, now: DateTime<Utc>) -> Result<()> {
        log::warn!("Usage fetch failed: {}", err);

        let previous: Option<PersistedState> = load(self.store.as_ref(), USAGE_DATA_KEY)
            .await
            .unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable usage state: {}", e);
                None
            });
        let snapshot = previous.and_then(|state| state.snapshot);
        let has_snapshot = snapshot.is_some();

        // Keep the last good snapshot; only the error and timestamp move
        let state = PersistedState {
            snapshot,
            last_updated: now,
            error: Some(err.to_string()),
        };
        save(self.store.as_ref(), USAGE_DATA_KEY, &state).await?;

        if !has_snapshot {
            self.show(self.projector.degraded()).await;
        }
        Ok(())
    }

    /// Redraw the badge from stored data after the card order changed
    /// A malformed `cardOrder` reads as no preference.
    async fn load_preference(&self) -> Option<KeyOrder> {
        KeyOrderResolver::load(self.store.as_ref())
            .await
            .unwrap_or_else(|e| {
                log::warn!("Ignoring unreadable card order: {}", e);
                None
            })
    }

    pub async fn reproject_badge(&self) -> Result<()> {
        let state: Option<PersistedState> = load(self.store.as_ref(), USAGE_DATA_KEY).await?;
        let Some(snapshot) = state.and_then(|s| s.snapshot) else {
            log::debug!("No stored usage to re-project");
            return Ok(());
        };

        let preference = self.load_preference().await;
        let badge = self.projector.project(&snapshot, preference.as_ref());
        self.badge_sink.set_badge(&badge).await
    }

    async fn show(&self, badge: Badge) {
        if let Err(e) = self.badge_sink.set_badge(&badge).await {
            log::warn!("Failed to update badge: {}", e);
        }
    }

    /// Poll at startup and then every `period` until Ctrl-C
    pub async fn run(&self, period: Duration, changes: broadcast::Receiver<String>) -> Result<()> {
        self.run_until(period, changes, tokio::signal::ctrl_c()).await
    }

    /// Poll loop that also re-projects the badge whenever `cardOrder`
    /// appears on the change feed. Returns once `shutdown` resolves.
    pub async fn run_until<F>(
        &self,
        period: Duration,
        mut changes: broadcast::Receiver<String>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future,
    {
        log::info!("Starting usage polling with interval {:?}", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut feed_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("Stopped usage polling");
                    break;
                }
                _ = ticker.tick() => self.poll().await,
                change = changes.recv(), if feed_open => match change {
                    Ok(key) if key == CARD_ORDER_KEY => {
                        if let Err(e) = self.reproject_badge().await {
                            log::error!("Error re-projecting badge: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::warn!("Missed {} state changes, re-projecting badge", skipped);
                        if let Err(e) = self.reproject_badge().await {
                            log::error!("Error re-projecting badge: {}", e);
                        }
                    }
                    Err(RecvError::Closed) => feed_open = false,
                },
            }
        }

        Ok(())
    }
}
