//! Error Taxonomy
//!
//! Structural errors abort the run; per-record pathologies are recovered with
//! a documented action, counted, and surfaced in the run summary. No silent
//! best-effort: every recovery is logged at the site it happens.

use serde::{Deserialize, Serialize};

use crate::record::{SlotId, Tick};

/// Errors raised by the reconciliation core.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileError {
    /// Input violated the non-decreasing tick invariant. Fatal: every
    /// downstream gap-fill assumes ordering.
    OutOfOrderTick { previous: Tick, observed: Tick },
    /// Update/destroy arrived for a slot that was never spawned. Recovered by
    /// synthesizing a spawn at first sight.
    UnknownSlot { slot: SlotId, tick: Tick },
    /// A record arrived for an already-sealed entity. Recovered by dropping
    /// the record; applying it would mutate a frozen series.
    SealedEntityMutation { slot: SlotId, tick: Tick },
    /// A requested derived feature references a field whose declared type
    /// cannot support it. Fatal at configuration validation, before any
    /// record is processed.
    UnsupportedFieldType {
        class: String,
        field: String,
        expected: &'static str,
        actual: &'static str,
        feature: &'static str,
    },
}

impl ReconcileError {
    /// Whether the pipeline may recover from this error and continue.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnknownSlot { .. } | Self::SealedEntityMutation { .. }
        )
    }
}

impl std::fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfOrderTick { previous, observed } => write!(
                f,
                "out-of-order tick: observed {} after {}",
                observed, previous
            ),
            Self::UnknownSlot { slot, tick } => {
                write!(f, "record for never-spawned slot {} at tick {}", slot, tick)
            }
            Self::SealedEntityMutation { slot, tick } => write!(
                f,
                "record for sealed entity on slot {} at tick {}",
                slot, tick
            ),
            Self::UnsupportedFieldType {
                class,
                field,
                expected,
                actual,
                feature,
            } => write!(
                f,
                "feature '{}' on class '{}' requires field '{}' of type {}, declared as {}",
                feature, class, field, expected, actual
            ),
        }
    }
}

impl std::error::Error for ReconcileError {}

/// Counters for recovered per-record pathologies.
///
/// Recoveries never abort the stream; they are tallied here and reported in
/// the run summary so a consumer can judge how trustworthy the input was.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryCounters {
    /// Spawns synthesized for never-spawned slots seen in update records.
    pub synthesized_spawns: u64,
    /// One-tick entities synthesized for never-spawned slots seen in destroy
    /// records.
    pub synthesized_one_tick: u64,
    /// Records dropped because their entity was already sealed.
    pub sealed_drops: u64,
    /// Handles implicitly sealed by a spawn arriving on a live slot with no
    /// preceding destroy.
    pub implicit_seals: u64,
    /// Field observations dropped because the name is not in the class schema.
    pub unknown_fields: u64,
    /// Field observations dropped because the value did not match the
    /// declared type.
    pub type_mismatches: u64,
    /// Records dropped because their class has no declared schema.
    pub unconfigured_class_records: u64,
    /// Vector-component patches dropped because the field had no prior value
    /// to patch onto.
    pub orphan_vec_components: u64,
}

impl RecoveryCounters {
    /// Whether any recovery fired during the run.
    pub fn has_recoveries(&self) -> bool {
        self.synthesized_spawns > 0
            || self.synthesized_one_tick > 0
            || self.sealed_drops > 0
            || self.implicit_seals > 0
            || self.unknown_fields > 0
            || self.type_mismatches > 0
            || self.unconfigured_class_records > 0
            || self.orphan_vec_components > 0
    }

    /// Total recovered pathologies.
    pub fn total(&self) -> u64 {
        self.synthesized_spawns
            + self.synthesized_one_tick
            + self.sealed_drops
            + self.implicit_seals
            + self.unknown_fields
            + self.type_mismatches
            + self.unconfigured_class_records
            + self.orphan_vec_components
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(ReconcileError::UnknownSlot { slot: 1, tick: 2 }.is_recoverable());
        assert!(ReconcileError::SealedEntityMutation { slot: 1, tick: 2 }.is_recoverable());
        assert!(!ReconcileError::OutOfOrderTick {
            previous: 5,
            observed: 4
        }
        .is_recoverable());
    }

    #[test]
    fn test_display_carries_context() {
        let err = ReconcileError::OutOfOrderTick {
            previous: 10,
            observed: 7,
        };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains("7"));
    }

    #[test]
    fn test_counters_totals() {
        let mut counters = RecoveryCounters::default();
        assert!(!counters.has_recoveries());
        counters.synthesized_spawns = 2;
        counters.unknown_fields = 3;
        assert!(counters.has_recoveries());
        assert_eq!(counters.total(), 5);
    }
}
