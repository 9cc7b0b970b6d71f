use super::{load, save, StateStore, CARD_ORDER_KEY};
use crate::models::*;
use anyhow::Result;
use std::collections::BTreeSet;

/// Where a dragged card lands relative to the drop target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Above,
    Below,
}

/// Reconciles the stored card order with the keys that currently have data
pub struct KeyOrderResolver;

impl KeyOrderResolver {
    /// Every available key exactly once: preferred keys first, in preference
    /// order, then the remaining available keys in default order.
    pub fn resolve(available: &BTreeSet<MetricKey>, preference: Option<&KeyOrder>) -> Vec<MetricKey> {
        let mut ordered: Vec<MetricKey> = Vec::with_capacity(available.len());

        if let Some(preference) = preference {
            for key in preference.keys() {
                if available.contains(key) && !ordered.contains(key) {
                    ordered.push(*key);
                }
            }
        }

        // BTreeSet iterates in declaration (default) order
        for key in available {
            if !ordered.contains(key) {
                ordered.push(*key);
            }
        }

        ordered
    }

    pub fn resolve_snapshot(snapshot: &MetricSnapshot, preference: Option<&KeyOrder>) -> Vec<MetricKey> {
        Self::resolve(&snapshot.available_keys(), preference)
    }

    /// First resolved key, or the first default key when nothing has data
    pub fn primary_key(snapshot: &MetricSnapshot, preference: Option<&KeyOrder>) -> MetricKey {
        Self::resolve_snapshot(snapshot, preference)
            .first()
            .copied()
            .unwrap_or(MetricKey::ALL[0])
    }

    /// Move `dragged` next to `target` within `current`.
    ///
    /// Returns `None` when nothing would change: the dragged key is not in
    /// the list, or it was dropped onto itself.
    pub fn move_key(
        current: &[MetricKey],
        dragged: MetricKey,
        target: MetricKey,
        placement: Placement,
    ) -> Option<Vec<MetricKey>> {
        if dragged == target {
            return None;
        }
        let from = current.iter().position(|k| *k == dragged)?;

        let mut ordered = current.to_vec();
        let moved = ordered.remove(from);

        let mut to = ordered.iter().position(|k| *k == target)?;
        if placement == Placement::Below {
            to += 1;
        }
        ordered.insert(to, moved);
        Some(ordered)
    }

    pub async fn load<S: StateStore + ?Sized>(store: &S) -> Result<Option<KeyOrder>> {
        load(store, CARD_ORDER_KEY).await
    }

    /// Persist the full order, replacing whatever was stored
    pub async fn save<S: StateStore + ?Sized>(store: &S, order: &KeyOrder) -> Result<()> {
        log::info!(
            "Saving card order: {}",
            order.keys().iter().map(MetricKey::as_str).collect::<Vec<_>>().join(", ")
        );
        save(store, CARD_ORDER_KEY, order).await
    }

    /// Drop the stored preference so the default order applies again
    pub async fn clear<S: StateStore + ?Sized>(store: &S) -> Result<()> {
        store.set(CARD_ORDER_KEY, serde_json::Value::Null).await
    }
}
