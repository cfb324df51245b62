//! Replay Record Model
//!
//! Canonical input types for the reconciliation engine. One `RawRecord` is a
//! single observation of one entity slot at one tick, as produced by an
//! external demo decoder. Records are sparse: a field appears only when the
//! replay protocol reported a change for it.

use serde::{Deserialize, Serialize};

/// Discrete simulation time unit. The engine's only clock.
pub type Tick = u32;

/// Raw, reusable entity identifier supplied by the upstream decoder.
/// Not a stable identity: the same slot can host different entities over the
/// course of a session.
pub type SlotId = u32;

/// Lifecycle tag attached to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Entity enters the world on this slot.
    Spawn,
    /// State change for an already-live entity.
    Update,
    /// Entity leaves the world; the slot becomes reusable.
    Destroy,
}

/// A typed field value decoded from the replay.
///
/// "Unknown" is deliberately not representable here: snapshots model it as
/// the absence of a value (`Option<FieldValue>::None`), so a true zero
/// observation is always distinguishable from never-observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Vec3([f64; 3]),
    Text(String),
}

impl FieldValue {
    /// Vector component accessor; `None` for non-vector values.
    #[inline]
    pub fn vec3(&self) -> Option<[f64; 3]> {
        match self {
            Self::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of scalar values; `None` for bool/text/vector.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// One field observation inside a record.
///
/// Most observations carry a full value. Source engines that report a
/// 3-vector as an XY pair plus a separate `name[2]` float-array element are
/// normalized into `VecComponent` patches by the ingester; the series builder
/// merges a patch onto the last-known vector for that field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldObservation {
    /// Full replacement value for the field.
    Value(FieldValue),
    /// Single-axis update for a vector field (axis 0..=2).
    VecComponent { axis: u8, value: f64 },
}

impl FieldObservation {
    #[inline]
    pub fn full(value: FieldValue) -> Self {
        Self::Value(value)
    }
}

/// One observation for one entity slot at one tick.
///
/// `class` is the server-class name the decoder resolved for the slot's
/// occupant. Field names not declared in the class schema are tolerated and
/// ignored by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub tick: Tick,
    pub slot: SlotId,
    pub class: String,
    pub lifecycle: Lifecycle,
    /// Sparse field map, in decoder order.
    pub fields: Vec<(String, FieldValue)>,
}

impl RawRecord {
    /// Convenience constructor for a record with no fields.
    pub fn bare(tick: Tick, slot: SlotId, class: impl Into<String>, lifecycle: Lifecycle) -> Self {
        Self {
            tick,
            slot,
            class: class.into(),
            lifecycle,
            fields: Vec::new(),
        }
    }

    /// Builder-style field attachment.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.push((name.into(), value));
        self
    }

    /// Look up a field value by name (first match wins, as in the decoder).
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
}
