//! Table Exporter Interface
//!
//! The boundary contract between this core and whatever persists the output.
//! The core only produces table objects with lazy row iterators and stable
//! per-class column sets; serialization format (CSV, database, anything) is
//! the consumer's business. For a given configuration the column set of a
//! class never changes between runs.

use anyhow::Result;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::DerivedFeature;
use crate::derive::DerivedFeatureRow;
use crate::record::{FieldValue, Tick};
use crate::registry::HandleId;
use crate::schema::{ClassSchema, FieldRole};
use crate::series::EntitySeries;
use crate::transient::TransientSummary;

/// One state-table row: the dense snapshot of one entity at one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct StateRow<'a> {
    pub handle: HandleId,
    pub tick: Tick,
    /// Cells in schema column order; `None` is the unknown sentinel.
    pub values: &'a [Option<FieldValue>],
}

/// All output for one entity class: every finalized series plus the derived
/// feature rows, with the column contracts to interpret them.
#[derive(Debug, Clone)]
pub struct ClassTable {
    pub class: String,
    pub schema: Arc<ClassSchema>,
    features: BTreeSet<DerivedFeature>,
    pub series: Vec<EntitySeries>,
    pub derived: Vec<DerivedFeatureRow>,
}

impl ClassTable {
    pub fn new(
        class: String,
        schema: Arc<ClassSchema>,
        features: BTreeSet<DerivedFeature>,
    ) -> Self {
        Self {
            class,
            schema,
            features,
            series: Vec::new(),
            derived: Vec::new(),
        }
    }

    /// Column names of the state table: row key first, then the declared
    /// fields in schema order.
    pub fn state_columns(&self) -> Vec<String> {
        let mut columns = vec!["handle_id".to_string(), "tick".to_string()];
        columns.extend(self.schema.fields.iter().map(|f| f.name.clone()));
        columns
    }

    /// Column names of the derived-feature table. Only signals both enabled
    /// and supported by this class's schema appear.
    pub fn feature_columns(&self) -> Vec<String> {
        let mut columns = vec!["handle_id".to_string(), "tick".to_string()];
        if self.features.contains(&DerivedFeature::AngleDelta) {
            for col in self.schema.role_columns(FieldRole::Orientation) {
                columns.push(format!("angle_delta_{}", self.schema.fields[col].name));
            }
        }
        if self.features.contains(&DerivedFeature::Speed)
            && self.schema.role_column(FieldRole::Position).is_some()
        {
            columns.push("speed".to_string());
        }
        if self.features.contains(&DerivedFeature::Acceleration)
            && self.schema.role_column(FieldRole::Position).is_some()
        {
            columns.push("acceleration".to_string());
        }
        if self.features.contains(&DerivedFeature::VisibilityEdges)
            && self.schema.role_column(FieldRole::Visibility).is_some()
        {
            columns.push("visibility".to_string());
        }
        columns
    }

    /// Lazily iterate every state row of every entity of this class, in
    /// `(handle, tick)` order.
    pub fn state_rows(&self) -> impl Iterator<Item = StateRow<'_>> + '_ {
        self.series.iter().flat_map(|series| {
            series.iter_rows().map(move |(tick, values)| StateRow {
                handle: series.handle,
                tick,
                values,
            })
        })
    }

    /// Lazily iterate derived-feature rows, in `(handle, tick)` order.
    pub fn feature_rows(&self) -> impl Iterator<Item = &DerivedFeatureRow> + '_ {
        self.derived.iter()
    }

    /// Total state rows across all entities of the class.
    pub fn state_row_count(&self) -> usize {
        self.series.iter().map(EntitySeries::len).sum()
    }
}

/// Consumer-side sink. The pipeline hands finished tables to an
/// implementation of this trait; the core itself never writes storage.
pub trait TableSink {
    /// Called once per class before its rows, with the column contracts.
    fn begin_class(&mut self, table: &ClassTable) -> Result<()>;

    /// One dense state row.
    fn state_row(&mut self, class: &str, row: &StateRow<'_>) -> Result<()>;

    /// One derived-feature row.
    fn feature_row(&mut self, class: &str, row: &DerivedFeatureRow) -> Result<()>;

    /// One transient lifecycle summary.
    fn transient_summary(&mut self, summary: &TransientSummary) -> Result<()>;

    /// Called after all rows have been delivered.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}
