//! Transient Entity Tracker
//!
//! Lifecycle specialization for short-lived, non-client entities
//! (projectiles, world effects). Tracks the owner weak reference captured at
//! spawn and classifies the expiry reason at destroy, producing one summary
//! row per transient in addition to its full per-tick series - downstream
//! detection typically needs both the trajectory and the lifecycle summary.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::record::Tick;
use crate::registry::HandleId;
use crate::schema::FieldRole;
use crate::series::EntitySeries;

/// Why a transient entity left the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiryReason {
    /// Hit something.
    Impact,
    /// Lifetime ran out.
    Timeout,
    /// Removed by the game without a more specific cause.
    Destroyed,
    /// The destroy payload omitted the reason, or the stream ended first.
    Unknown,
}

impl ExpiryReason {
    /// Classify a destroy-record payload. Unrecognized payloads are
    /// `Unknown`, never an error - upstream reporting is best-effort here.
    pub fn from_payload(payload: &str) -> Self {
        match payload.trim().to_ascii_lowercase().as_str() {
            "impact" => Self::Impact,
            "timeout" => Self::Timeout,
            "destroyed" => Self::Destroyed,
            other => {
                if !other.is_empty() {
                    debug!(payload = other, "unrecognized expiry payload");
                }
                Self::Unknown
            }
        }
    }
}

/// Lifecycle summary row for one transient entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransientSummary {
    pub handle: HandleId,
    pub class: String,
    pub spawn_tick: Tick,
    pub destroy_tick: Tick,
    /// Weak reference to the owning client's handle; absent for
    /// world-triggered effects.
    pub owner: Option<HandleId>,
    pub expiry: ExpiryReason,
    /// Last known position at seal time, if the class declares one.
    pub terminal_position: Option<[f64; 3]>,
}

struct OpenTransient {
    spawn_tick: Tick,
    owner: Option<HandleId>,
    expiry: Option<ExpiryReason>,
}

/// Tracks open transients for the configured class set.
pub struct TransientTracker {
    classes: BTreeSet<String>,
    open: HashMap<HandleId, OpenTransient>,
}

impl TransientTracker {
    pub fn new(classes: BTreeSet<String>) -> Self {
        Self {
            classes,
            open: HashMap::new(),
        }
    }

    /// Whether a class gets transient lifecycle handling.
    #[inline]
    pub fn is_tracked(&self, class: &str) -> bool {
        self.classes.contains(class)
    }

    /// Register a freshly spawned transient. `owner` is resolved by the
    /// caller from the spawn record's owner slot at this tick; absence is
    /// valid (world-triggered effects).
    pub fn on_spawn(&mut self, handle: HandleId, tick: Tick, owner: Option<HandleId>) {
        self.open.insert(
            handle,
            OpenTransient {
                spawn_tick: tick,
                owner,
                expiry: None,
            },
        );
    }

    /// Record the expiry reason observed on a destroy record.
    pub fn note_expiry(&mut self, handle: HandleId, reason: ExpiryReason) {
        if let Some(open) = self.open.get_mut(&handle) {
            open.expiry = Some(reason);
        }
    }

    /// Close out a transient at seal time, producing its summary row. The
    /// finalized series supplies the destroy tick and terminal position.
    pub fn on_seal(&mut self, series: &EntitySeries) -> Option<TransientSummary> {
        let open = self.open.remove(&series.handle)?;
        let terminal_position = series
            .schema
            .role_column(FieldRole::Position)
            .and_then(|col| series.value(series.last_seen, col))
            .and_then(|v| v.vec3());
        Some(TransientSummary {
            handle: series.handle,
            class: series.class.clone(),
            spawn_tick: open.spawn_tick,
            destroy_tick: series.last_seen,
            owner: open.owner,
            expiry: open.expiry.unwrap_or(ExpiryReason::Unknown),
            terminal_position,
        })
    }

    /// Open transients not yet sealed (end-of-stream bookkeeping).
    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GapFillPolicy;
    use crate::record::{FieldObservation, FieldValue};
    use crate::schema::{default_projectile_schema, ClassSchema};
    use crate::series::SeriesBuilder;
    use std::sync::Arc;

    fn projectile_series(handle: HandleId, spawn: Tick, seal: Tick) -> EntitySeries {
        let schema = Arc::new(default_projectile_schema());
        let mut builder = SeriesBuilder::new();
        builder.open(
            handle,
            schema.clone(),
            vec![GapFillPolicy::HoldLast; schema.len()],
            spawn,
        );
        let origin = schema.column("origin").unwrap();
        builder.append(
            handle,
            spawn,
            &[(
                origin,
                FieldObservation::Value(FieldValue::Vec3([1.0, 2.0, 3.0])),
            )],
        );
        builder.finalize(handle, seal).unwrap()
    }

    #[test]
    fn test_expiry_classification() {
        assert_eq!(ExpiryReason::from_payload("impact"), ExpiryReason::Impact);
        assert_eq!(ExpiryReason::from_payload(" Timeout "), ExpiryReason::Timeout);
        assert_eq!(ExpiryReason::from_payload("destroyed"), ExpiryReason::Destroyed);
        assert_eq!(ExpiryReason::from_payload("exploded"), ExpiryReason::Unknown);
        assert_eq!(ExpiryReason::from_payload(""), ExpiryReason::Unknown);
    }

    #[test]
    fn test_summary_row() {
        let mut tracker = TransientTracker::new(BTreeSet::from(["projectile".to_string()]));
        tracker.on_spawn(9, 2, Some(1));
        tracker.note_expiry(9, ExpiryReason::Impact);
        let series = projectile_series(9, 2, 7);
        let summary = tracker.on_seal(&series).unwrap();
        assert_eq!(summary.spawn_tick, 2);
        assert_eq!(summary.destroy_tick, 7);
        assert_eq!(summary.owner, Some(1));
        assert_eq!(summary.expiry, ExpiryReason::Impact);
        assert_eq!(summary.terminal_position, Some([1.0, 2.0, 3.0]));
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn test_missing_expiry_defaults_unknown() {
        let mut tracker = TransientTracker::new(BTreeSet::from(["projectile".to_string()]));
        tracker.on_spawn(4, 1, None);
        let series = projectile_series(4, 1, 3);
        let summary = tracker.on_seal(&series).unwrap();
        assert_eq!(summary.owner, None);
        assert_eq!(summary.expiry, ExpiryReason::Unknown);
    }

    #[test]
    fn test_untracked_handle_yields_no_summary() {
        let mut tracker = TransientTracker::new(BTreeSet::new());
        let series = projectile_series(4, 1, 3);
        assert!(tracker.on_seal(&series).is_none());
    }

    #[test]
    fn test_terminal_position_absent_without_position_field() {
        let schema = Arc::new(ClassSchema::new("spark"));
        let mut builder = SeriesBuilder::new();
        builder.open(2, schema, Vec::new(), 5);
        let series = builder.finalize(2, 6).unwrap();

        let mut tracker = TransientTracker::new(BTreeSet::from(["spark".to_string()]));
        tracker.on_spawn(2, 5, None);
        let summary = tracker.on_seal(&series).unwrap();
        assert_eq!(summary.terminal_position, None);
        assert_eq!(summary.destroy_tick, 6);
    }
}
