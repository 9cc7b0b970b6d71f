use super::key_order::KeyOrderResolver;
use crate::models::*;

/// Glyph shown when no usage data has ever been fetched
pub const DEGRADED_GLYPH: &str = "!";

/// Derives the badge from a snapshot and the resolved card order
pub struct BadgeProjector {
    palette: BadgePalette,
}

impl BadgeProjector {
    pub fn new(palette: BadgePalette) -> Self {
        Self { palette }
    }

    pub fn palette(&self) -> &BadgePalette {
        &self.palette
    }

    /// Never fails; a snapshot with no data yields a cleared badge.
    pub fn project(&self, snapshot: &MetricSnapshot, preference: Option<&KeyOrder>) -> Badge {
        let primary = KeyOrderResolver::primary_key(snapshot, preference);

        let entry = snapshot.get(primary).or_else(|| {
            KeyOrderResolver::resolve_snapshot(snapshot, preference)
                .into_iter()
                .find_map(|key| snapshot.get(key))
        });

        let Some(entry) = entry else {
            return self.cleared();
        };

        let percent = entry.rounded_percent();
        Badge {
            text: percent.to_string(),
            background_color: self.palette.band_color(Band::from_percent(percent)).to_string(),
            text_color: self.palette.text.clone(),
        }
    }

    pub fn degraded(&self) -> Badge {
        Badge {
            text: DEGRADED_GLYPH.to_string(),
            background_color: self.palette.degraded.clone(),
            text_color: self.palette.text.clone(),
        }
    }

    pub fn cleared(&self) -> Badge {
        Badge {
            text: String::new(),
            background_color: self.palette.degraded.clone(),
            text_color: self.palette.text.clone(),
        }
    }
}

impl Default for BadgeProjector {
    fn default() -> Self {
        Self::new(BadgePalette::default())
    }
}
