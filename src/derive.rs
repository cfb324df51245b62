//! Feature Deriver
//!
//! Computes per-tick derived signals from a dense entity series. Every
//! computation is a pure function of the current and immediately preceding
//! snapshot (plus the previous tick's speed for acceleration), so derivation
//! holds O(entities) state, never O(entities x ticks).
//!
//! A derived row exists only for ticks where at least one enabled signal
//! produced a value, and never for a series' first tick - there is no prior
//! state to diff against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::DerivedFeature;
use crate::record::{FieldValue, Tick};
use crate::registry::HandleId;
use crate::schema::FieldRole;
use crate::series::EntitySeries;

/// Signed minimal difference between two orientation values in degrees,
/// mapped to `(-180, 180]`.
///
/// Naive subtraction produces spurious near-360 jumps when the value crosses
/// the wrap boundary; `179 -> -179` is a `+2` turn, not `-358`.
#[inline]
pub fn signed_angle_delta(prev_deg: f64, curr_deg: f64) -> f64 {
    let mut delta = (curr_deg - prev_deg) % 360.0;
    if delta <= -180.0 {
        delta += 360.0;
    } else if delta > 180.0 {
        delta -= 360.0;
    }
    delta
}

/// Euclidean distance between two positions.
#[inline]
fn distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let dz = b[2] - a[2];
    (dx * dx + dy * dy + dz * dz).sqrt()
}

/// One derived-signal row for an entity at a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedFeatureRow {
    pub handle: HandleId,
    pub tick: Tick,
    /// Signed angular delta per orientation field, in schema order.
    pub angle_deltas: Vec<(String, f64)>,
    /// Distance covered over the last tick interval.
    pub speed: Option<f64>,
    /// Change in speed over the last tick interval. Needs two prior
    /// position samples, so it first appears one tick after speed does.
    pub acceleration: Option<f64>,
    /// New visibility state; present only on a transition tick.
    pub visibility: Option<bool>,
}

impl DerivedFeatureRow {
    fn is_empty(&self) -> bool {
        self.angle_deltas.is_empty()
            && self.speed.is_none()
            && self.acceleration.is_none()
            && self.visibility.is_none()
    }
}

/// Derive all enabled signals for one finalized series.
///
/// Signals whose role fields are absent from the class schema are silently
/// skipped for that class; configuration validation has already rejected
/// role fields of unusable type.
pub fn derive_series(
    series: &EntitySeries,
    features: &BTreeSet<DerivedFeature>,
) -> Vec<DerivedFeatureRow> {
    let schema = &series.schema;
    let want_speed = features.contains(&DerivedFeature::Speed);
    let want_accel = features.contains(&DerivedFeature::Acceleration);
    let position_col = if want_speed || want_accel {
        schema.role_column(FieldRole::Position)
    } else {
        None
    };
    let orientation_cols: Vec<usize> = if features.contains(&DerivedFeature::AngleDelta) {
        schema.role_columns(FieldRole::Orientation)
    } else {
        Vec::new()
    };
    let visibility_col = if features.contains(&DerivedFeature::VisibilityEdges) {
        schema.role_column(FieldRole::Visibility)
    } else {
        None
    };

    let mut rows = Vec::new();
    let mut iter = series.iter_rows();
    let mut prev = match iter.next() {
        Some((_, snapshot)) => snapshot,
        None => return rows,
    };
    let mut prev_speed: Option<f64> = None;

    for (tick, curr) in iter {
        let mut row = DerivedFeatureRow {
            handle: series.handle,
            tick,
            angle_deltas: Vec::new(),
            speed: None,
            acceleration: None,
            visibility: None,
        };

        for &col in &orientation_cols {
            if let (Some(p), Some(c)) = (
                prev[col].as_ref().and_then(FieldValue::as_f64),
                curr[col].as_ref().and_then(FieldValue::as_f64),
            ) {
                row.angle_deltas
                    .push((schema.fields[col].name.clone(), signed_angle_delta(p, c)));
            }
        }

        let speed = position_col.and_then(|col| {
            match (
                prev[col].as_ref().and_then(FieldValue::vec3),
                curr[col].as_ref().and_then(FieldValue::vec3),
            ) {
                (Some(p), Some(c)) => Some(distance(p, c)),
                _ => None,
            }
        });
        if want_speed {
            row.speed = speed;
        }
        if want_accel {
            row.acceleration = match (prev_speed, speed) {
                (Some(p), Some(c)) => Some(c - p),
                _ => None,
            };
        }
        prev_speed = speed;

        if let Some(col) = visibility_col {
            if let (Some(p), Some(c)) = (
                prev[col].as_ref().and_then(FieldValue::as_bool),
                curr[col].as_ref().and_then(FieldValue::as_bool),
            ) {
                if p != c {
                    row.visibility = Some(c);
                }
            }
        }

        if !row.is_empty() {
            rows.push(row);
        }
        prev = curr;
    }
    rows
}
