pub mod credentials;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use credentials::{CookieSource, SessionCookies};

/// Quota buckets reported by the usage endpoint.
///
/// Declaration order is the default display order; `Ord` follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKey {
    FiveHour,
    SevenDay,
    SevenDaySonnet,
    SevenDayOpus,
    SevenDayCowork,
    SevenDayOauth,
}

impl MetricKey {
    pub const ALL: [MetricKey; 6] = [
        MetricKey::FiveHour,
        MetricKey::SevenDay,
        MetricKey::SevenDaySonnet,
        MetricKey::SevenDayOpus,
        MetricKey::SevenDayCowork,
        MetricKey::SevenDayOauth,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::FiveHour => "five_hour",
            MetricKey::SevenDay => "seven_day",
            MetricKey::SevenDaySonnet => "seven_day_sonnet",
            MetricKey::SevenDayOpus => "seven_day_opus",
            MetricKey::SevenDayCowork => "seven_day_cowork",
            MetricKey::SevenDayOauth => "seven_day_oauth",
        }
    }

    /// Human label shown on cards and in alerts
    pub fn label(&self) -> &'static str {
        match self {
            MetricKey::FiveHour => "Current Session",
            MetricKey::SevenDay => "Weekly All Models",
            MetricKey::SevenDaySonnet => "Weekly Sonnet",
            MetricKey::SevenDayOpus => "Weekly Opus",
            MetricKey::SevenDayCowork => "Weekly Cowork",
            MetricKey::SevenDayOauth => "Weekly OAuth",
        }
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "Unknown metric key: {}. Use one of: {}",
                    s,
                    MetricKey::ALL.map(|k| k.as_str()).join(", ")
                )
            })
    }
}

/// Current state of one quota bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricEntry {
    /// Percentage used, 0-100 (can exceed 100)
    pub utilization: f64,
    pub resets_at: Option<DateTime<Utc>>,
}

impl MetricEntry {
    pub fn rounded_percent(&self) -> u32 {
        // Half-up, matching how the percentage is shown everywhere else
        self.utilization.max(0.0).round() as u32
    }
}

/// One response from the usage endpoint.
///
/// Unknown fields are ignored and missing fields decode as `None`; a `None`
/// bucket does not apply to the account's plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(default)]
    pub five_hour: Option<MetricEntry>,
    #[serde(default)]
    pub seven_day: Option<MetricEntry>,
    #[serde(default)]
    pub seven_day_sonnet: Option<MetricEntry>,
    #[serde(default)]
    pub seven_day_opus: Option<MetricEntry>,
    #[serde(default)]
    pub seven_day_cowork: Option<MetricEntry>,
    #[serde(default)]
    pub seven_day_oauth: Option<MetricEntry>,
}

impl MetricSnapshot {
    pub fn get(&self, key: MetricKey) -> Option<&MetricEntry> {
        match key {
            MetricKey::FiveHour => self.five_hour.as_ref(),
            MetricKey::SevenDay => self.seven_day.as_ref(),
            MetricKey::SevenDaySonnet => self.seven_day_sonnet.as_ref(),
            MetricKey::SevenDayOpus => self.seven_day_opus.as_ref(),
            MetricKey::SevenDayCowork => self.seven_day_cowork.as_ref(),
            MetricKey::SevenDayOauth => self.seven_day_oauth.as_ref(),
        }
    }

    pub fn set(&mut self, key: MetricKey, entry: Option<MetricEntry>) {
        let slot = match key {
            MetricKey::FiveHour => &mut self.five_hour,
            MetricKey::SevenDay => &mut self.seven_day,
            MetricKey::SevenDaySonnet => &mut self.seven_day_sonnet,
            MetricKey::SevenDayOpus => &mut self.seven_day_opus,
            MetricKey::SevenDayCowork => &mut self.seven_day_cowork,
            MetricKey::SevenDayOauth => &mut self.seven_day_oauth,
        };
        *slot = entry;
    }

    /// Keys with a non-null entry, iterated in default order
    pub fn available_keys(&self) -> BTreeSet<MetricKey> {
        MetricKey::ALL
            .iter()
            .copied()
            .filter(|key| self.get(*key).is_some())
            .collect()
    }
}

/// What the poller leaves behind under `usageData`.
///
/// `error` and `snapshot` may both be set: the snapshot is the last good
/// data and the error is the most recent failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(rename = "usage")]
    pub snapshot: Option<MetricSnapshot>,
    pub last_updated: DateTime<Utc>,
    pub error: Option<String>,
}

/// User-chosen card order, stored under `cardOrder`.
///
/// May name keys that are not currently available or omit keys that are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct KeyOrder(pub Vec<MetricKey>);

impl KeyOrder {
    pub fn keys(&self) -> &[MetricKey] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<MetricKey>> for KeyOrder {
    fn from(keys: Vec<MetricKey>) -> Self {
        KeyOrder(keys)
    }
}

impl<'de> Deserialize<'de> for KeyOrder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Keys written by older builds may no longer exist
        let raw = Vec::<String>::deserialize(deserializer)?;
        Ok(KeyOrder(
            raw.iter().filter_map(|s| s.parse().ok()).collect(),
        ))
    }
}

/// Thresholds that have already alerted, stored under `notifiedThresholds`.
///
/// Ids look like `five_hour_75`. An id is present only while the threshold
/// is still satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotifiedSet(BTreeMap<String, bool>);

impl NotifiedSet {
    pub fn id(key: MetricKey, threshold: u32) -> String {
        format!("{}_{}", key.as_str(), threshold)
    }

    pub fn contains(&self, key: MetricKey, threshold: u32) -> bool {
        self.0.get(&Self::id(key, threshold)).copied().unwrap_or(false)
    }

    pub fn insert(&mut self, key: MetricKey, threshold: u32) {
        self.0.insert(Self::id(key, threshold), true);
    }

    pub fn remove(&mut self, key: MetricKey, threshold: u32) -> bool {
        self.0.remove(&Self::id(key, threshold)).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// Severity tier of a rounded percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Band {
    Ok,
    Caution,
    Warning,
    Critical,
}

impl Band {
    /// Lower bounds inclusive: 50 is Caution, 75 is Warning, 90 and up is Critical.
    pub fn from_percent(percent: u32) -> Self {
        match percent {
            0..=49 => Band::Ok,
            50..=74 => Band::Caution,
            75..=89 => Band::Warning,
            _ => Band::Critical,
        }
    }
}

/// Badge colours as `#RRGGBB` strings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BadgePalette {
    pub ok: String,
    pub caution: String,
    pub warning: String,
    pub critical: String,
    pub degraded: String,
    pub text: String,
}

impl BadgePalette {
    pub fn band_color(&self, band: Band) -> &str {
        match band {
            Band::Ok => &self.ok,
            Band::Caution => &self.caution,
            Band::Warning => &self.warning,
            Band::Critical => &self.critical,
        }
    }
}

impl Default for BadgePalette {
    fn default() -> Self {
        Self {
            ok: "#4CAF50".to_string(),
            caution: "#FFC107".to_string(),
            warning: "#FF9800".to_string(),
            critical: "#F44336".to_string(),
            degraded: "#666666".to_string(),
            text: "#FFFFFF".to_string(),
        }
    }
}

/// Text and colours for the persistent indicator. Empty text means "clear it".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Badge {
    pub text: String,
    pub background_color: String,
    pub text_color: String,
}

impl Badge {
    pub fn is_cleared(&self) -> bool {
        self.text.is_empty()
    }
}

/// One-shot alert for a threshold crossing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// `<key>_<threshold>`
    pub id: String,
    pub key: MetricKey,
    pub threshold: u32,
    pub percent: u32,
    pub title: String,
    pub body: String,
}

/// User configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub poll_interval_minutes: u64,
    pub api_base_url: String,
    pub request_timeout_seconds: u64,
    pub cookie_file: Option<PathBuf>,
    pub organization_id: Option<String>,
    #[serde(default)]
    pub badge_palette: BadgePalette,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            poll_interval_minutes: 5,
            api_base_url: "https://claude.ai/api/organizations".to_string(),
            request_timeout_seconds: 30,
            cookie_file: None,
            organization_id: None,
            badge_palette: BadgePalette::default(),
        }
    }
}
