//! Replay Reconciliation Engine
//!
//! Derives per-entity, per-tick time-series tables from a stream of decoded
//! game-replay records, for downstream static cheat-detection and analysis
//! tooling.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          Pipeline                               │
//! │  (owns the event loop, enforces tick ordering, counts           │
//! │   recoveries, assembles tables)                                 │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!        ┌───────────────────────┼───────────────────────┐
//!        ▼                       ▼                       ▼
//! ┌─────────────┐        ┌─────────────┐        ┌─────────────┐
//! │ RecordFeed  │        │  Ingester   │        │ EngineConfig│
//! │ (decoded    │───────▶│ (order      │        │ (schemas,   │
//! │  records)   │        │  guard,     │        │  features,  │
//! └─────────────┘        │  batches)   │        │  gap fill)  │
//!                        └──────┬──────┘        └─────────────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │ Entity      │  slot -> stable handle,
//!                        │ Registry    │  seal on destroy, slot reuse
//!                        └──────┬──────┘
//!                               ▼
//!                        ┌─────────────┐
//!                        │ Series      │  dense per-entity tables,
//!                        │ Builder     │  hold-last gap fill
//!                        └──────┬──────┘
//!                               ▼
//!               ┌───────────────┴──────────────┐
//!               ▼                              ▼
//!        ┌─────────────┐               ┌─────────────┐
//!        │ Feature     │               │ Transient   │
//!        │ Deriver     │               │ Tracker     │
//!        └──────┬──────┘               └──────┬──────┘
//!               ▼                              ▼
//!        ┌─────────────────────────────────────────┐
//!        │  ClassTable / TransientSummary /        │
//!        │  RunSummary  (lazy rows -> TableSink)   │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Identity**: raw slot ids are never identity; slot reuse after a
//!   destroy yields distinct handles
//! - **Density**: every finalized series covers `[first_seen, last_seen]`
//!   with one row per tick, no gaps
//! - **Ordering**: input must be non-decreasing in tick; violations abort
//! - **Memory**: carry-forward state is per live entity and released on seal
//! - **Determinism**: same input and configuration always produce the same
//!   tables and counters

pub mod config;
pub mod derive;
pub mod error;
pub mod feed;
pub mod ingest;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod schema;
pub mod series;
pub mod table;
pub mod transient;


pub use config::{DerivedFeature, EngineConfig, GapFillPolicy};
pub use derive::{derive_series, signed_angle_delta, DerivedFeatureRow};
pub use error::{ReconcileError, RecoveryCounters};
pub use feed::{RecordFeed, RecordFeedExt, VecFeed};
pub use pipeline::{run_feed, Pipeline, RunAbort, RunOutput, RunSummary};
pub use record::{FieldObservation, FieldValue, Lifecycle, RawRecord, SlotId, Tick};
pub use registry::{EntityHandle, EntityRegistry, HandleId, Resolution};
pub use schema::{
    default_client_schema, default_projectile_schema, ClassSchema, FieldRole, FieldSpec, FieldType,
};
pub use series::{EntitySeries, SeriesBuilder};
pub use table::{ClassTable, StateRow, TableSink};
pub use transient::{ExpiryReason, TransientSummary, TransientTracker};
