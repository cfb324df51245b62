//! Event Ingester
//!
//! Normalizes the raw decoded record stream into ordered per-tick batches:
//!
//! - enforces the non-decreasing tick invariant (violation is fatal - every
//!   downstream gap-fill assumes ordering)
//! - groups records of the same tick into one batch
//! - applies the same-slot coalescing rule: a destroy is applied before a
//!   spawn for the same slot within one tick, so a reused slot always yields
//!   two distinct entities
//! - rewrites component-suffixed field names (`origin[2]`) into vector
//!   component patches, matching source engines that report an XY vector plus
//!   a separate Z float-array element

use tracing::debug;

use crate::error::ReconcileError;
use crate::feed::RecordFeed;
use crate::record::{FieldObservation, FieldValue, Lifecycle, RawRecord, SlotId, Tick};

/// A record after ingest normalization. Field names are base names; vector
/// component updates have been folded into `FieldObservation::VecComponent`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub slot: SlotId,
    pub class: String,
    pub lifecycle: Lifecycle,
    pub fields: Vec<(String, FieldObservation)>,
}

/// All records observed at one tick, in application order.
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
    pub tick: Tick,
    pub records: Vec<NormalizedRecord>,
}

/// Pull-based ingester over a record feed.
pub struct Ingester<'a> {
    feed: &'a mut dyn RecordFeed,
    pending: Option<RawRecord>,
    last_tick: Option<Tick>,
}

impl<'a> Ingester<'a> {
    pub fn new(feed: &'a mut dyn RecordFeed) -> Self {
        Self {
            feed,
            pending: None,
            last_tick: None,
        }
    }

    /// Tick of the most recently emitted batch.
    #[inline]
    pub fn last_tick(&self) -> Option<Tick> {
        self.last_tick
    }

    /// Pull the next tick batch. `Ok(None)` at end of stream.
    pub fn next_batch(&mut self) -> Result<Option<TickBatch>, ReconcileError> {
        let first = match self.pull()? {
            Some(record) => record,
            None => return Ok(None),
        };
        let tick = first.tick;
        let mut records = vec![normalize_record(first)];

        loop {
            match self.pull()? {
                Some(record) if record.tick == tick => records.push(normalize_record(record)),
                Some(record) => {
                    self.pending = Some(record);
                    break;
                }
                None => break,
            }
        }

        order_same_slot_lifecycle(&mut records);
        self.last_tick = Some(tick);
        Ok(Some(TickBatch { tick, records }))
    }

    fn pull(&mut self) -> Result<Option<RawRecord>, ReconcileError> {
        let record = match self.pending.take().or_else(|| self.feed.next_record()) {
            Some(record) => record,
            None => return Ok(None),
        };
        if let Some(last) = self.last_tick {
            if record.tick < last {
                return Err(ReconcileError::OutOfOrderTick {
                    previous: last,
                    observed: record.tick,
                });
            }
        }
        Ok(Some(record))
    }
}

/// Fold component-suffixed field names into vector patches.
fn normalize_record(record: RawRecord) -> NormalizedRecord {
    let fields = record
        .fields
        .into_iter()
        .map(|(name, value)| match split_component_suffix(&name, &value) {
            Some((base, axis, scalar)) => {
                debug!(field = base.as_str(), axis, "folded component-suffixed field");
                (base, FieldObservation::VecComponent { axis, value: scalar })
            }
            None => (name, FieldObservation::Value(value)),
        })
        .collect();
    NormalizedRecord {
        slot: record.slot,
        class: record.class,
        lifecycle: record.lifecycle,
        fields,
    }
}

/// Parse `name[i]` with `i` in 0..=2 and a numeric value. Anything else is
/// left untouched (and will fall out as an unknown field downstream).
fn split_component_suffix(name: &str, value: &FieldValue) -> Option<(String, u8, f64)> {
    let open = name.rfind('[')?;
    let close = name.rfind(']')?;
    if close != name.len() - 1 || close <= open + 1 {
        return None;
    }
    let axis: u8 = name[open + 1..close].parse().ok()?;
    if axis > 2 {
        return None;
    }
    let scalar = value.as_f64()?;
    Some((name[..open].to_string(), axis, scalar))
}

/// Within one tick, a destroy must be applied before a spawn for the same
/// slot. Arrival order is preserved for everything else - in particular,
/// records for unrelated slots are never reordered, and an update followed by
/// a destroy (no respawn) keeps its arrival order.
fn order_same_slot_lifecycle(records: &mut Vec<NormalizedRecord>) {
    loop {
        let mut violation = None;
        'scan: for (j, record) in records.iter().enumerate() {
            if record.lifecycle != Lifecycle::Spawn {
                continue;
            }
            for (k, later) in records.iter().enumerate().skip(j + 1) {
                if later.slot == record.slot && later.lifecycle == Lifecycle::Destroy {
                    violation = Some((j, k));
                    break 'scan;
                }
            }
        }
        match violation {
            Some((spawn_idx, destroy_idx)) => {
                let destroy = records.remove(destroy_idx);
                records.insert(spawn_idx, destroy);
            }
            None => break,
        }
    }
}
