use crate::error::describe_error;
use crate::models::*;
use crate::services::key_order::KeyOrderResolver;
use crate::services::threshold_notifier::format_time_until_reset;
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};

const BAR_WIDTH: usize = 30;

/// Terminal rendering of the stored usage, one card per available bucket
pub struct StatusView<'a> {
    state: Option<&'a PersistedState>,
    preference: Option<&'a KeyOrder>,
}

impl<'a> StatusView<'a> {
    pub fn new(state: Option<&'a PersistedState>, preference: Option<&'a KeyOrder>) -> Self {
        Self { state, preference }
    }

    pub fn render(&self, now: DateTime<Utc>) -> String {
        let Some(state) = self.state else {
            return "Loading usage data...".to_string();
        };

        let Some(snapshot) = &state.snapshot else {
            return match &state.error {
                Some(code) => format!("❌ {}", describe_error(code)).bright_red().to_string(),
                None => "Loading usage data...".to_string(),
            };
        };

        let mut lines = Vec::new();
        lines.push(format!(
            "{}  {}",
            "📊 Claude Usage".bright_cyan().bold(),
            format!("Updated {}", format_updated_ago(state.last_updated, now)).dimmed()
        ));
        lines.push(String::new());

        let ordered = KeyOrderResolver::resolve_snapshot(snapshot, self.preference);
        if ordered.is_empty() {
            lines.push("No usage buckets apply to this account".to_string());
        }
        for key in ordered {
            if let Some(entry) = snapshot.get(key) {
                lines.extend(render_card(key, entry, now));
            }
        }

        if let Some(code) = &state.error {
            lines.push(format!("⚠️  Last refresh failed: {}", describe_error(code)).yellow().to_string());
        }

        lines.join("\n")
    }
}

fn render_card(key: MetricKey, entry: &MetricEntry, now: DateTime<Utc>) -> Vec<String> {
    let percent = entry.rounded_percent();
    let band = Band::from_percent(percent);

    let filled = (percent.min(100) as usize * BAR_WIDTH) / 100;
    let bar = format!(
        "{}{}",
        "█".repeat(filled),
        "░".repeat(BAR_WIDTH - filled)
    );

    vec![
        format!(
            "{:<20} {}",
            key.label().bold(),
            paint(&format!("{percent}%"), band)
        ),
        paint(&bar, band).to_string(),
        reset_text(entry.resets_at, now).dimmed().to_string(),
        String::new(),
    ]
}

fn paint(text: &str, band: Band) -> ColoredString {
    match band {
        Band::Ok => text.green(),
        Band::Caution => text.yellow(),
        Band::Warning => text.truecolor(255, 152, 0),
        Band::Critical => text.red(),
    }
}

/// Card footer; empty when the bucket reports no reset time
pub fn reset_text(resets_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    if resets_at.is_none() {
        return String::new();
    }
    match format_time_until_reset(resets_at, now).as_str() {
        "soon" => "Resetting soon...".to_string(),
        remaining => format!("Resets in {remaining}"),
    }
}

/// `Ns ago` under a minute, then `Nm ago`
pub fn format_updated_ago(last_updated: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(last_updated).num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s ago")
    } else {
        format!("{}m ago", seconds / 60)
    }
}
