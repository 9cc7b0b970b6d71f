pub mod api_client;
pub mod badge;
pub mod key_order;
pub mod poll_orchestrator;
pub mod sinks;
pub mod state_store;
pub mod threshold_notifier;

use crate::error::FetchError;
use crate::models::*;
use anyhow::Result;
use async_trait::async_trait;

/// Storage key for [`PersistedState`]
pub const USAGE_DATA_KEY: &str = "usageData";
/// Storage key for the user's [`KeyOrder`]
pub const CARD_ORDER_KEY: &str = "cardOrder";
/// Storage key for the [`NotifiedSet`]
pub const NOTIFIED_THRESHOLDS_KEY: &str = "notifiedThresholds";

/// Source of usage snapshots
#[async_trait]
pub trait UsageFetcher: Send + Sync {
    async fn fetch_snapshot(&self) -> Result<MetricSnapshot, FetchError>;
}

/// Durable key-value storage that survives restarts
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
}

/// Delivers one-shot alerts
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Updates the persistent visual indicator
#[async_trait]
pub trait BadgeSink: Send + Sync {
    async fn set_badge(&self, badge: &Badge) -> Result<()>;
}

/// Read a typed value; an absent key or a stored `null` yields `None`
pub async fn load<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
    S: StateStore + ?Sized,
{
    match store.get(key).await? {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
    }
}

pub async fn save<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: serde::Serialize + ?Sized,
    S: StateStore + ?Sized,
{
    store.set(key, serde_json::to_value(value)?).await
}
