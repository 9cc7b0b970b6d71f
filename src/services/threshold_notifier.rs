use super::key_order::KeyOrderResolver;
use crate::models::*;
use chrono::{DateTime, Utc};

/// Alert ladder, ascending
pub const THRESHOLDS: [u32; 3] = [50, 75, 90];

/// Fires each threshold once per excursion above it, for the primary key only
pub struct ThresholdNotifier;

impl ThresholdNotifier {
    /// Compare the primary key's rounded utilization against the ladder.
    ///
    /// Newly satisfied thresholds produce a notification and are recorded.
    /// Recorded thresholds that any reported key no longer satisfies are
    /// removed so they can fire again, primary or not.
    pub fn evaluate(
        snapshot: &MetricSnapshot,
        preference: Option<&KeyOrder>,
        notified: &NotifiedSet,
        now: DateTime<Utc>,
    ) -> (Vec<Notification>, NotifiedSet) {
        let mut updated = notified.clone();
        let mut notifications = Vec::new();

        for key in MetricKey::ALL {
            let Some(entry) = snapshot.get(key) else {
                continue;
            };
            let percent = entry.rounded_percent();
            for threshold in THRESHOLDS.into_iter().filter(|t| percent < *t) {
                if updated.remove(key, threshold) {
                    log::debug!("Re-armed {} at {}%", key, threshold);
                }
            }
        }

        let key = KeyOrderResolver::primary_key(snapshot, preference);
        let Some(entry) = snapshot.get(key) else {
            return (notifications, updated);
        };
        let percent = entry.rounded_percent();

        for threshold in THRESHOLDS {
            if percent >= threshold && !updated.contains(key, threshold) {
                updated.insert(key, threshold);
                notifications.push(Self::build(key, threshold, percent, entry, now));
            }
        }

        (notifications, updated)
    }

    fn build(
        key: MetricKey,
        threshold: u32,
        percent: u32,
        entry: &MetricEntry,
        now: DateTime<Utc>,
    ) -> Notification {
        let reset = format_time_until_reset(entry.resets_at, now);
        let reset_text = if reset == "soon" {
            "Resets soon.".to_string()
        } else {
            format!("Resets in {reset}.")
        };

        Notification {
            id: NotifiedSet::id(key, threshold),
            key,
            threshold,
            percent,
            title: format!("Claude usage at {percent}%"),
            body: format!("{} has reached {}%. {}", key.label(), percent, reset_text),
        }
    }
}

/// `Xd Yh` above 24 hours, `Xh Ym` above an hour, else `Xm`.
/// A missing or past reset time reads as `soon`.
pub fn format_time_until_reset(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(resets_at) = resets_at else {
        return "soon".to_string();
    };

    let remaining = resets_at.signed_duration_since(now);
    if remaining.num_milliseconds() <= 0 {
        return "soon".to_string();
    }

    let total_minutes = remaining.num_minutes();
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;

    if hours > 24 {
        format!("{}d {}h", hours / 24, hours % 24)
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
