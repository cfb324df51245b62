//! Reconciliation Pipeline
//!
//! Wires the ingester, entity registry, series builder, feature deriver and
//! transient tracker into one pass over a record feed:
//!
//! ```text
//! RecordFeed (decoded replay records, tick-ordered)
//!    |
//! Ingester (order guard, tick batches, same-slot destroy-before-spawn)
//!    |
//! EntityRegistry (slot -> stable handle, seal on destroy)
//!    |
//! SeriesBuilder (dense per-entity tables, gap fill)
//!    |
//! derive_series (angle delta / speed / acceleration / visibility edges)
//!    |
//! ClassTable + TransientSummary + RunSummary
//! ```
//!
//! Identity resolution is strictly sequential - slot reuse makes it order
//! dependent. Feature derivation has no cross-entity state and runs over the
//! finalized series in parallel.
//!
//! Recoverable pathologies are logged, counted and never abort the stream.
//! An out-of-order tick aborts: the error carries the tables of entities
//! finalized before the abort (in-flight entities are not flushed, their
//! partial series would violate the dense-range contract).

use anyhow::Context;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, GapFillPolicy};
use crate::error::{ReconcileError, RecoveryCounters};
use crate::feed::RecordFeed;
use crate::ingest::{Ingester, NormalizedRecord};
use crate::record::{FieldObservation, FieldValue, Lifecycle, SlotId, Tick};
use crate::registry::{EntityHandle, EntityRegistry, HandleId, Resolution};
use crate::schema::{ClassSchema, FieldRole};
use crate::series::{EntitySeries, SeriesBuilder};
use crate::table::{ClassTable, TableSink};
use crate::transient::{ExpiryReason, TransientSummary, TransientTracker};

// =============================================================================
// RUN RESULTS
// =============================================================================

/// Aggregate statistics for one completed (or aborted) run.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RunSummary {
    pub first_tick: Option<Tick>,
    pub last_tick: Option<Tick>,
    pub records_consumed: u64,
    pub entities_opened: u64,
    pub entities_sealed_by_destroy: u64,
    pub entities_sealed_at_end: u64,
    pub state_rows: u64,
    pub feature_rows: u64,
    pub transient_summaries: u64,
    /// Recovered per-record pathologies. Non-zero counters mean the input
    /// was incomplete or inconsistent; the tables are still valid.
    pub counters: RecoveryCounters,
}

/// Everything a run produces: per-class tables, transient lifecycle
/// summaries, the handle arena, and the run summary.
#[derive(Debug)]
pub struct RunOutput {
    /// Tables keyed by class name, deterministic order.
    pub tables: BTreeMap<String, ClassTable>,
    pub transients: Vec<TransientSummary>,
    /// Every handle allocated during the run, in allocation order, with
    /// identity metadata attached.
    pub handles: Vec<EntityHandle>,
    pub summary: RunSummary,
}

impl RunOutput {
    /// Drive a consumer sink over all tables: column contracts first, then
    /// state rows, feature rows, and transient summaries.
    pub fn export_into(&self, sink: &mut dyn TableSink) -> anyhow::Result<()> {
        for table in self.tables.values() {
            sink.begin_class(table)
                .with_context(|| format!("sink rejected class '{}'", table.class))?;
            for row in table.state_rows() {
                sink.state_row(&table.class, &row)?;
            }
            for row in table.feature_rows() {
                sink.feature_row(&table.class, row)?;
            }
        }
        for summary in &self.transients {
            sink.transient_summary(summary)?;
        }
        sink.finish()
    }
}

/// Fatal abort of a run. Tables for entities finalized before the abort are
/// salvaged and remain valid; entities still in flight are not flushed.
#[derive(Debug)]
pub struct RunAbort {
    pub cause: ReconcileError,
    pub salvaged: RunOutput,
}

impl std::fmt::Display for RunAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "run aborted: {} ({} entity tables salvaged)",
            self.cause,
            self.salvaged
                .tables
                .values()
                .map(|t| t.series.len())
                .sum::<usize>()
        )
    }
}

impl std::error::Error for RunAbort {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

/// Single-use reconciliation pipeline over one record feed.
pub struct Pipeline {
    config: EngineConfig,
    schemas: BTreeMap<String, Arc<ClassSchema>>,
    registry: EntityRegistry,
    builder: SeriesBuilder,
    tracker: TransientTracker,
    finalized: Vec<EntitySeries>,
    transients: Vec<TransientSummary>,
    summary: RunSummary,
}

impl Pipeline {
    /// Build a pipeline from a validated configuration. Configuration errors
    /// are fatal here, before any record is processed.
    pub fn new(config: EngineConfig) -> Result<Self, ReconcileError> {
        config.validate()?;
        let schemas = config.shared_schemas();
        let tracker = TransientTracker::new(config.transient_classes.clone());
        Ok(Self {
            config,
            schemas,
            registry: EntityRegistry::new(),
            builder: SeriesBuilder::new(),
            tracker,
            finalized: Vec::new(),
            transients: Vec::new(),
            summary: RunSummary::default(),
        })
    }

    /// Consume the feed to exhaustion and produce all tables.
    pub fn run(mut self, feed: &mut dyn RecordFeed) -> Result<RunOutput, RunAbort> {
        info!(
            feed = feed.name(),
            classes = self.schemas.len(),
            "starting reconciliation run"
        );
        let mut ingester = Ingester::new(feed);
        loop {
            match ingester.next_batch() {
                Ok(Some(batch)) => {
                    self.summary.first_tick.get_or_insert(batch.tick);
                    self.summary.last_tick = Some(batch.tick);
                    for record in batch.records {
                        self.summary.records_consumed += 1;
                        self.apply_record(batch.tick, record);
                    }
                }
                Ok(None) => break,
                Err(cause) => {
                    tracing::error!(error = %cause, "aborting run");
                    return Err(RunAbort {
                        cause,
                        salvaged: self.into_output(),
                    });
                }
            }
        }

        // End of stream: everything still live is sealed at the final input
        // tick, so surviving entities share an aligned table edge.
        let final_tick = ingester.last_tick().unwrap_or(0);
        for id in self.registry.open_handle_ids() {
            self.registry.seal(id, final_tick);
            self.seal_entity(id, final_tick, false);
        }
        let output = self.into_output();
        info!(
            records = output.summary.records_consumed,
            entities = output.summary.entities_opened,
            state_rows = output.summary.state_rows,
            feature_rows = output.summary.feature_rows,
            recoveries = output.summary.counters.total(),
            "reconciliation run complete"
        );
        Ok(output)
    }

    // -------------------------------------------------------------------------
    // Record application
    // -------------------------------------------------------------------------

    fn apply_record(&mut self, tick: Tick, record: NormalizedRecord) {
        let schema = match self.schemas.get(&record.class) {
            Some(schema) => schema.clone(),
            None => {
                debug!(class = record.class.as_str(), "record for unconfigured class dropped");
                self.summary.counters.unconfigured_class_records += 1;
                return;
            }
        };

        match self
            .registry
            .resolve(record.slot, &record.class, tick, record.lifecycle)
        {
            Ok(Resolution::Update(handle)) => {
                self.append_fields(handle, tick, &schema, &record);
            }
            Ok(Resolution::Spawned {
                handle,
                implicit_seal,
            }) => {
                if let Some(previous) = implicit_seal {
                    warn!(
                        slot = record.slot,
                        tick, "spawn on live slot; sealing previous entity"
                    );
                    self.summary.counters.implicit_seals += 1;
                    self.seal_entity(previous, tick, true);
                }
                self.open_entity(handle, tick, &schema, &record);
            }
            Ok(Resolution::Destroyed(handle)) => {
                self.append_fields(handle, tick, &schema, &record);
                self.note_expiry_from(handle, &schema, &record);
                self.seal_entity(handle, tick, true);
            }
            Err(err @ ReconcileError::UnknownSlot { .. }) => {
                warn!(error = %err, "recovering: synthesizing spawn");
                let (handle, _) = self.registry.spawn(record.slot, &record.class, tick);
                self.open_entity(handle, tick, &schema, &record);
                if record.lifecycle == Lifecycle::Destroy {
                    self.summary.counters.synthesized_one_tick += 1;
                    self.note_expiry_from(handle, &schema, &record);
                    self.registry.seal(handle, tick);
                    self.seal_entity(handle, tick, true);
                } else {
                    self.summary.counters.synthesized_spawns += 1;
                }
            }
            Err(err @ ReconcileError::SealedEntityMutation { .. }) => {
                warn!(error = %err, "recovering: dropping record for sealed entity");
                self.summary.counters.sealed_drops += 1;
            }
            Err(err) => {
                // resolve() only produces the two recoverable kinds.
                warn!(error = %err, "unexpected resolve error, record dropped");
            }
        }
    }

    /// Open accumulation state for a new handle and apply its first record.
    fn open_entity(
        &mut self,
        handle: HandleId,
        tick: Tick,
        schema: &Arc<ClassSchema>,
        record: &NormalizedRecord,
    ) {
        self.summary.entities_opened += 1;
        let fill: Vec<GapFillPolicy> = schema
            .fields
            .iter()
            .map(|f| self.config.gap_fill_for(&f.name))
            .collect();
        self.builder.open(handle, schema.clone(), fill, tick);
        if self.tracker.is_tracked(&record.class) {
            let owner = self.resolve_owner(schema, record);
            self.tracker.on_spawn(handle, tick, owner);
        }
        self.append_fields(handle, tick, schema, record);
    }

    /// Validate and append a record's fields to the entity's series, and
    /// capture identity metadata along the way.
    fn append_fields(
        &mut self,
        handle: HandleId,
        tick: Tick,
        schema: &Arc<ClassSchema>,
        record: &NormalizedRecord,
    ) {
        let mut observations: Vec<(usize, FieldObservation)> = Vec::with_capacity(record.fields.len());
        let mut external_id = None;
        let mut display_name = None;

        for (name, obs) in &record.fields {
            let col = match schema.column(name) {
                Some(col) => col,
                None => {
                    debug!(class = schema.class.as_str(), field = name.as_str(), "unknown field dropped");
                    self.summary.counters.unknown_fields += 1;
                    continue;
                }
            };
            let spec = &schema.fields[col];
            match obs {
                FieldObservation::Value(value) => {
                    if !spec.field_type.accepts(value) {
                        warn!(
                            class = schema.class.as_str(),
                            field = name.as_str(),
                            declared = spec.field_type.name(),
                            "type mismatch, observation dropped"
                        );
                        self.summary.counters.type_mismatches += 1;
                        continue;
                    }
                    match spec.role {
                        FieldRole::ExternalId => external_id = text_of(value),
                        FieldRole::DisplayName => display_name = text_of(value),
                        _ => {}
                    }
                    observations.push((col, obs.clone()));
                }
                FieldObservation::VecComponent { .. } => {
                    if spec.field_type != crate::schema::FieldType::Vec3 {
                        warn!(
                            class = schema.class.as_str(),
                            field = name.as_str(),
                            "component patch on non-vector field dropped"
                        );
                        self.summary.counters.type_mismatches += 1;
                        continue;
                    }
                    observations.push((col, obs.clone()));
                }
            }
        }

        if external_id.is_some() || display_name.is_some() {
            self.registry.set_metadata(handle, external_id, display_name);
        }
        self.summary.counters.orphan_vec_components +=
            self.builder.append(handle, tick, &observations);
    }

    /// Owner weak reference: the live handle bound to the owner slot named by
    /// the spawn record, at this tick.
    fn resolve_owner(&self, schema: &ClassSchema, record: &NormalizedRecord) -> Option<HandleId> {
        let owner_col = schema.role_column(FieldRole::Owner)?;
        let owner_name = &schema.fields[owner_col].name;
        let value = record.fields.iter().find_map(|(name, obs)| {
            if name == owner_name {
                match obs {
                    FieldObservation::Value(FieldValue::Int(slot)) => Some(*slot),
                    _ => None,
                }
            } else {
                None
            }
        })?;
        let slot = SlotId::try_from(value).ok()?;
        self.registry.live_binding(slot)
    }

    fn note_expiry_from(
        &mut self,
        handle: HandleId,
        schema: &ClassSchema,
        record: &NormalizedRecord,
    ) {
        if !self.tracker.is_tracked(&schema.class) {
            return;
        }
        let Some(expiry_col) = schema.role_column(FieldRole::ExpiryReason) else {
            return;
        };
        let expiry_name = &schema.fields[expiry_col].name;
        let reason = record
            .fields
            .iter()
            .find_map(|(name, obs)| match obs {
                FieldObservation::Value(FieldValue::Text(payload)) if name == expiry_name => {
                    Some(ExpiryReason::from_payload(payload))
                }
                _ => None,
            })
            .unwrap_or(ExpiryReason::Unknown);
        self.tracker.note_expiry(handle, reason);
    }

    /// Finalize a handle's series, emit its transient summary if tracked.
    fn seal_entity(&mut self, handle: HandleId, tick: Tick, by_destroy: bool) {
        let Some(series) = self.builder.finalize(handle, tick) else {
            return;
        };
        if by_destroy {
            self.summary.entities_sealed_by_destroy += 1;
        } else {
            self.summary.entities_sealed_at_end += 1;
        }
        if let Some(summary) = self.tracker.on_seal(&series) {
            self.transients.push(summary);
        }
        self.finalized.push(series);
    }

    // -------------------------------------------------------------------------
    // Output assembly
    // -------------------------------------------------------------------------

    /// Derive features over the finalized series and assemble per-class
    /// tables. Derivation is independent per entity and runs in parallel.
    fn into_output(mut self) -> RunOutput {
        self.finalized.sort_by_key(|s| s.handle);

        let features = self.config.derived_features.clone();
        let derived: Vec<Vec<crate::derive::DerivedFeatureRow>> = if features.is_empty() {
            self.finalized.iter().map(|_| Vec::new()).collect()
        } else {
            self.finalized
                .par_iter()
                .map(|series| crate::derive::derive_series(series, &features))
                .collect()
        };

        let mut tables: BTreeMap<String, ClassTable> = self
            .schemas
            .iter()
            .map(|(class, schema)| {
                (
                    class.clone(),
                    ClassTable::new(class.clone(), schema.clone(), features.clone()),
                )
            })
            .collect();

        for (series, rows) in self.finalized.into_iter().zip(derived) {
            // Series are only ever opened for configured schemas.
            let Some(table) = tables.get_mut(&series.class) else {
                continue;
            };
            self.summary.state_rows += series.len() as u64;
            self.summary.feature_rows += rows.len() as u64;
            table.derived.extend(rows);
            table.series.push(series);
        }

        self.transients.sort_by_key(|t| t.handle);
        self.summary.transient_summaries = self.transients.len() as u64;

        RunOutput {
            tables,
            transients: self.transients,
            handles: self.registry.handles().to_vec(),
            summary: self.summary,
        }
    }
}

/// Convenience entry point: validate, run, and fold abort/config errors into
/// one `anyhow` error chain.
pub fn run_feed(feed: &mut dyn RecordFeed, config: EngineConfig) -> anyhow::Result<RunOutput> {
    let pipeline = Pipeline::new(config).context("invalid engine configuration")?;
    pipeline
        .run(feed)
        .map_err(anyhow::Error::new)
        .context("reconciliation run failed")
}

fn text_of(value: &FieldValue) -> Option<String> {
    match value {
        FieldValue::Text(s) => Some(s.clone()),
        FieldValue::Int(i) => Some(i.to_string()),
        _ => None,
    }
}
