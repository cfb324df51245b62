//! Time-Series Builder
//!
//! Assembles sparse, irregularly-reported per-tick observations into a dense
//! table per entity. The builder keeps one carry-forward state per live
//! handle: the last-known value of every declared field. Ticks with no record
//! for an entity are filled by policy (hold-last by default), so a finalized
//! series always covers `[first_seen, last_seen]` with one row per tick and
//! no gaps.
//!
//! Carry-forward state is local to each handle and released on finalize -
//! memory is bounded by currently-live entities, not session length, and a
//! value can never leak from one entity to another (in particular not across
//! a slot reuse).

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::GapFillPolicy;
use crate::record::{FieldObservation, FieldValue, Tick};
use crate::registry::HandleId;
use crate::schema::ClassSchema;

/// A finalized, immutable per-entity table. One row per tick in
/// `[first_seen, last_seen]`; a cell is `None` until the field's first real
/// observation (the unknown sentinel, distinct from any true value).
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySeries {
    pub handle: HandleId,
    pub class: String,
    pub first_seen: Tick,
    pub last_seen: Tick,
    pub schema: Arc<ClassSchema>,
    rows: Vec<Vec<Option<FieldValue>>>,
}

impl EntitySeries {
    /// Number of rows; always `last_seen - first_seen + 1`.
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Snapshot at an absolute tick.
    pub fn row(&self, tick: Tick) -> Option<&[Option<FieldValue>]> {
        if tick < self.first_seen || tick > self.last_seen {
            return None;
        }
        self.rows
            .get((tick - self.first_seen) as usize)
            .map(|r| r.as_slice())
    }

    /// Cell value at an absolute tick and column.
    pub fn value(&self, tick: Tick, col: usize) -> Option<&FieldValue> {
        self.row(tick).and_then(|r| r.get(col)).and_then(|v| v.as_ref())
    }

    /// Iterate `(tick, snapshot)` pairs in tick order.
    pub fn iter_rows(&self) -> impl Iterator<Item = (Tick, &[Option<FieldValue>])> {
        self.rows
            .iter()
            .enumerate()
            .map(move |(i, r)| (self.first_seen + i as Tick, r.as_slice()))
    }
}

/// Per-handle accumulation state while the entity is live.
struct ActiveSeries {
    class: String,
    schema: Arc<ClassSchema>,
    fill: Vec<GapFillPolicy>,
    first_seen: Tick,
    last_known: Vec<Option<FieldValue>>,
    rows: Vec<Vec<Option<FieldValue>>>,
}

impl ActiveSeries {
    /// Row for `tick`, creating it and any gap rows before it by policy.
    fn row_mut(&mut self, tick: Tick) -> &mut Vec<Option<FieldValue>> {
        let idx = (tick - self.first_seen) as usize;
        while self.rows.len() <= idx {
            let row = self
                .fill
                .iter()
                .enumerate()
                .map(|(col, policy)| match policy {
                    GapFillPolicy::HoldLast => self.last_known[col].clone(),
                    GapFillPolicy::Unknown => None,
                })
                .collect();
            self.rows.push(row);
        }
        &mut self.rows[idx]
    }
}

/// Builds dense per-entity series from per-tick observations.
#[derive(Default)]
pub struct SeriesBuilder {
    active: HashMap<HandleId, ActiveSeries>,
}

impl SeriesBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start accumulating for a freshly spawned handle.
    pub fn open(
        &mut self,
        handle: HandleId,
        schema: Arc<ClassSchema>,
        fill: Vec<GapFillPolicy>,
        tick: Tick,
    ) {
        debug_assert_eq!(fill.len(), schema.len());
        let width = schema.len();
        self.active.insert(
            handle,
            ActiveSeries {
                class: schema.class.clone(),
                schema,
                fill,
                first_seen: tick,
                last_known: vec![None; width],
                rows: Vec::new(),
            },
        );
    }

    /// Whether a handle is currently accumulating.
    #[inline]
    pub fn is_open(&self, handle: HandleId) -> bool {
        self.active.contains_key(&handle)
    }

    /// Number of live series (the memory bound of the run).
    #[inline]
    pub fn open_count(&self) -> usize {
        self.active.len()
    }

    /// Record observations for a handle at a tick. Fields absent from the
    /// observation list are filled by policy. Returns the number of vector
    /// component patches that had no prior value to patch onto (dropped).
    ///
    /// Ticks must be non-decreasing per handle; the pipeline guarantees this
    /// once the ingester has accepted the stream.
    pub fn append(
        &mut self,
        handle: HandleId,
        tick: Tick,
        observations: &[(usize, FieldObservation)],
    ) -> u64 {
        let series = match self.active.get_mut(&handle) {
            Some(series) => series,
            None => {
                debug!(handle, tick, "append for unopened handle ignored");
                return 0;
            }
        };
        debug_assert!(tick >= series.first_seen);

        let mut orphans = 0u64;
        // Split borrow: the row is created first, then cells and carry-forward
        // state are updated together.
        series.row_mut(tick);
        let idx = (tick - series.first_seen) as usize;
        for (col, obs) in observations {
            let col = *col;
            match obs {
                FieldObservation::Value(value) => {
                    series.rows[idx][col] = Some(value.clone());
                    series.last_known[col] = Some(value.clone());
                }
                FieldObservation::VecComponent { axis, value } => {
                    let base = series.rows[idx][col]
                        .clone()
                        .or_else(|| series.last_known[col].clone());
                    match base {
                        Some(FieldValue::Vec3(mut v)) => {
                            v[*axis as usize] = *value;
                            series.rows[idx][col] = Some(FieldValue::Vec3(v));
                            series.last_known[col] = Some(FieldValue::Vec3(v));
                        }
                        _ => {
                            debug!(
                                handle,
                                tick, col, "vector component patch with no prior value dropped"
                            );
                            orphans += 1;
                        }
                    }
                }
            }
        }
        orphans
    }

    /// Freeze a handle's table through `sealed_at` (inclusive) and release
    /// its carry-forward state.
    pub fn finalize(&mut self, handle: HandleId, sealed_at: Tick) -> Option<EntitySeries> {
        let mut series = self.active.remove(&handle)?;
        let sealed_at = sealed_at.max(series.first_seen);
        series.row_mut(sealed_at);
        let last_seen = series.first_seen + (series.rows.len() - 1) as Tick;
        debug!(
            handle,
            class = series.class.as_str(),
            first_seen = series.first_seen,
            last_seen,
            rows = series.rows.len(),
            "finalized entity series"
        );
        Some(EntitySeries {
            handle,
            class: series.class,
            first_seen: series.first_seen,
            last_seen,
            schema: series.schema,
            rows: series.rows,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;

    fn test_schema() -> Arc<ClassSchema> {
        Arc::new(
            ClassSchema::new("client")
                .field("health", FieldType::Int)
                .field("origin", FieldType::Vec3)
                .field("ping", FieldType::Int),
        )
    }

    fn hold_last(width: usize) -> Vec<GapFillPolicy> {
        vec![GapFillPolicy::HoldLast; width]
    }

    fn obs(col: usize, value: FieldValue) -> (usize, FieldObservation) {
        (col, FieldObservation::Value(value))
    }

    #[test]
    fn test_hold_last_gap_fill() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(7, schema.clone(), hold_last(schema.len()), 1);
        builder.append(7, 1, &[obs(0, FieldValue::Int(100))]);
        builder.append(7, 5, &[obs(0, FieldValue::Int(80))]);
        let series = builder.finalize(7, 5).unwrap();

        assert_eq!(series.len(), 5);
        for tick in 1..=4 {
            assert_eq!(series.value(tick, 0), Some(&FieldValue::Int(100)));
        }
        assert_eq!(series.value(5, 0), Some(&FieldValue::Int(80)));
    }

    #[test]
    fn test_unknown_until_first_observation() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(7, schema.clone(), hold_last(schema.len()), 1);
        builder.append(7, 1, &[obs(0, FieldValue::Int(100))]);
        builder.append(7, 3, &[obs(2, FieldValue::Int(40))]);
        let series = builder.finalize(7, 4).unwrap();

        // ping was never observed before tick 3: unknown, not zero.
        assert_eq!(series.value(1, 2), None);
        assert_eq!(series.value(2, 2), None);
        assert_eq!(series.value(3, 2), Some(&FieldValue::Int(40)));
        // and held afterwards
        assert_eq!(series.value(4, 2), Some(&FieldValue::Int(40)));
    }

    #[test]
    fn test_dense_range_invariant() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(3, schema.clone(), hold_last(schema.len()), 10);
        builder.append(3, 12, &[obs(0, FieldValue::Int(1))]);
        builder.append(3, 19, &[]);
        let series = builder.finalize(3, 23).unwrap();
        assert_eq!(series.first_seen, 10);
        assert_eq!(series.last_seen, 23);
        assert_eq!(series.len() as Tick, series.last_seen - series.first_seen + 1);
        for tick in 10..=23 {
            assert!(series.row(tick).is_some());
        }
        assert!(series.row(9).is_none());
        assert!(series.row(24).is_none());
    }

    #[test]
    fn test_unknown_policy_does_not_carry() {
        let schema = test_schema();
        let mut fill = hold_last(schema.len());
        fill[0] = GapFillPolicy::Unknown;
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), fill, 1);
        builder.append(1, 1, &[obs(0, FieldValue::Int(100)), obs(2, FieldValue::Int(30))]);
        builder.append(1, 3, &[]);
        let series = builder.finalize(1, 3).unwrap();

        assert_eq!(series.value(1, 0), Some(&FieldValue::Int(100)));
        assert_eq!(series.value(2, 0), None);
        assert_eq!(series.value(3, 0), None);
        // hold-last column still carries
        assert_eq!(series.value(3, 2), Some(&FieldValue::Int(30)));
    }

    #[test]
    fn test_vector_component_patch() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), hold_last(schema.len()), 1);
        builder.append(1, 1, &[obs(1, FieldValue::Vec3([10.0, 20.0, 5.0]))]);
        builder.append(
            1,
            2,
            &[(1, FieldObservation::VecComponent { axis: 2, value: -63.9 })],
        );
        let series = builder.finalize(1, 2).unwrap();
        assert_eq!(
            series.value(2, 1),
            Some(&FieldValue::Vec3([10.0, 20.0, -63.9]))
        );
    }

    #[test]
    fn test_same_tick_xy_vector_plus_z_component() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), hold_last(schema.len()), 1);
        let orphans = builder.append(
            1,
            1,
            &[
                obs(1, FieldValue::Vec3([1.0, 2.0, 0.0])),
                (1, FieldObservation::VecComponent { axis: 2, value: 9.0 }),
            ],
        );
        assert_eq!(orphans, 0);
        let series = builder.finalize(1, 1).unwrap();
        assert_eq!(series.value(1, 1), Some(&FieldValue::Vec3([1.0, 2.0, 9.0])));
    }

    #[test]
    fn test_orphan_component_patch_dropped() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), hold_last(schema.len()), 1);
        let orphans = builder.append(
            1,
            1,
            &[(1, FieldObservation::VecComponent { axis: 2, value: 9.0 })],
        );
        assert_eq!(orphans, 1);
        let series = builder.finalize(1, 1).unwrap();
        assert_eq!(series.value(1, 1), None);
    }

    #[test]
    fn test_multiple_records_same_tick_merge() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), hold_last(schema.len()), 2);
        builder.append(1, 2, &[obs(0, FieldValue::Int(100))]);
        builder.append(1, 2, &[obs(2, FieldValue::Int(25))]);
        let series = builder.finalize(1, 2).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.value(2, 0), Some(&FieldValue::Int(100)));
        assert_eq!(series.value(2, 2), Some(&FieldValue::Int(25)));
    }

    #[test]
    fn test_finalize_releases_state() {
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), hold_last(schema.len()), 1);
        builder.open(2, schema.clone(), hold_last(schema.len()), 1);
        assert_eq!(builder.open_count(), 2);
        builder.finalize(1, 1).unwrap();
        assert_eq!(builder.open_count(), 1);
        assert!(!builder.is_open(1));
        assert!(builder.finalize(1, 2).is_none());
    }

    #[test]
    fn test_no_cross_entity_leakage() {
        // Same slot semantics are the registry's concern; here we verify two
        // handles never share carry-forward state.
        let schema = test_schema();
        let mut builder = SeriesBuilder::new();
        builder.open(1, schema.clone(), hold_last(schema.len()), 1);
        builder.append(1, 1, &[obs(0, FieldValue::Int(100))]);
        builder.finalize(1, 3).unwrap();

        builder.open(2, schema.clone(), hold_last(schema.len()), 4);
        builder.append(2, 5, &[]);
        let series = builder.finalize(2, 5).unwrap();
        assert_eq!(series.value(4, 0), None);
        assert_eq!(series.value(5, 0), None);
    }
}
