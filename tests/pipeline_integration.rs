//! End-to-end pipeline integration tests
//!
//! Feeds a small synthetic session - two clients and one owned projectile -
//! through the full pipeline and verifies the resulting tables, summaries and
//! exporter output against the expected shapes.

use std::collections::BTreeMap;

use ticktable::{
    run_feed, ClassTable, DerivedFeatureRow, EngineConfig, ExpiryReason, FieldValue, GapFillPolicy,
    Lifecycle, RawRecord, RecordFeed, StateRow, TableSink, Tick, TransientSummary, VecFeed,
};

/// Route engine logs through the test harness; `RUST_LOG=debug` shows the
/// recovery/lifecycle trail for a failing test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn spawn(tick: Tick, slot: u32, class: &str) -> RawRecord {
    RawRecord::bare(tick, slot, class, Lifecycle::Spawn)
}

fn update(tick: Tick, slot: u32, class: &str) -> RawRecord {
    RawRecord::bare(tick, slot, class, Lifecycle::Update)
}

/// Two clients live over ticks 1..=9; client A (slot 1) fires a projectile at
/// tick 2 which impacts at tick 7.
fn session() -> Vec<RawRecord> {
    vec![
        spawn(1, 1, "client")
            .with_field("origin", FieldValue::Vec3([0.0, 0.0, 0.0]))
            .with_field("view_angle", FieldValue::Float(179.0))
            .with_field("health", FieldValue::Int(150))
            .with_field("in_pvs", FieldValue::Bool(true))
            .with_field("name", FieldValue::Text("alpha".into())),
        spawn(1, 2, "client")
            .with_field("origin", FieldValue::Vec3([100.0, 0.0, 0.0]))
            .with_field("in_pvs", FieldValue::Bool(false)),
        spawn(2, 30, "projectile")
            .with_field("origin", FieldValue::Vec3([0.0, 0.0, 32.0]))
            .with_field("owner", FieldValue::Int(1)),
        update(2, 1, "client").with_field("view_angle", FieldValue::Float(-179.0)),
        update(3, 30, "projectile").with_field("origin", FieldValue::Vec3([50.0, 0.0, 32.0])),
        update(3, 2, "client").with_field("in_pvs", FieldValue::Bool(true)),
        update(5, 1, "client")
            .with_field("origin", FieldValue::Vec3([3.0, 4.0, 0.0]))
            .with_field("health", FieldValue::Int(120)),
        RawRecord::bare(7, 30, "projectile", Lifecycle::Destroy)
            .with_field("origin", FieldValue::Vec3([250.0, 0.0, 32.0]))
            .with_field("expiry", FieldValue::Text("impact".into())),
        update(9, 1, "client").with_field("health", FieldValue::Int(110)),
        update(9, 2, "client").with_field("in_pvs", FieldValue::Bool(false)),
    ]
}

#[test]
fn test_end_to_end_session_shapes() {
    init_tracing();
    let mut feed = VecFeed::new("session", session());
    let output = run_feed(&mut feed, EngineConfig::standard()).unwrap();

    // Two client series covering the full observed range.
    let clients = &output.tables["client"];
    assert_eq!(clients.series.len(), 2);
    for series in &clients.series {
        assert_eq!((series.first_seen, series.last_seen), (1, 9));
        assert_eq!(series.len(), 9);
    }

    // One projectile series of length 6 (ticks 2..=7).
    let projectiles = &output.tables["projectile"];
    assert_eq!(projectiles.series.len(), 1);
    let trajectory = &projectiles.series[0];
    assert_eq!((trajectory.first_seen, trajectory.last_seen), (2, 7));
    assert_eq!(trajectory.len(), 6);

    // One projectile summary owned by client A.
    assert_eq!(output.transients.len(), 1);
    let summary = &output.transients[0];
    let client_a = output
        .handles
        .iter()
        .find(|h| h.slot == 1 && h.class == "client")
        .unwrap();
    assert_eq!(summary.owner, Some(client_a.id));
    assert_eq!(summary.expiry, ExpiryReason::Impact);
    assert_eq!(summary.spawn_tick, 2);
    assert_eq!(summary.destroy_tick, 7);
    assert_eq!(summary.terminal_position, Some([250.0, 0.0, 32.0]));

    assert_eq!(output.summary.records_consumed, 10);
    assert!(!output.summary.counters.has_recoveries());
}

#[test]
fn test_end_to_end_derived_signals() {
    let mut feed = VecFeed::new("session", session());
    let output = run_feed(&mut feed, EngineConfig::standard()).unwrap();

    let clients = &output.tables["client"];
    let client_a = output
        .handles
        .iter()
        .find(|h| h.slot == 1 && h.class == "client")
        .unwrap();
    let rows: Vec<&DerivedFeatureRow> = clients
        .feature_rows()
        .filter(|r| r.handle == client_a.id)
        .collect();

    // No derived row at the first tick of the series.
    assert!(rows.iter().all(|r| r.tick > 1));

    // Wrap-around: 179 -> -179 is +2 degrees, seen at tick 2.
    let tick2 = rows.iter().find(|r| r.tick == 2).unwrap();
    assert_eq!(
        tick2
            .angle_deltas
            .iter()
            .find(|(name, _)| name == "view_angle")
            .map(|(_, d)| *d),
        Some(2.0)
    );

    // Position held over ticks 2..=4, then moves to (3,4,0) at tick 5:
    // speed 0 through tick 4, 5.0 at tick 5.
    let tick4 = rows.iter().find(|r| r.tick == 4).unwrap();
    assert_eq!(tick4.speed, Some(0.0));
    let tick5 = rows.iter().find(|r| r.tick == 5).unwrap();
    assert_eq!(tick5.speed, Some(5.0));
    assert_eq!(tick5.acceleration, Some(5.0));

    // Client B flips visibility at ticks 3 and 9, nowhere else.
    let client_b = output
        .handles
        .iter()
        .find(|h| h.slot == 2 && h.class == "client")
        .unwrap();
    let edges: Vec<(Tick, bool)> = clients
        .feature_rows()
        .filter(|r| r.handle == client_b.id)
        .filter_map(|r| r.visibility.map(|v| (r.tick, v)))
        .collect();
    assert_eq!(edges, vec![(3, true), (9, false)]);
}

#[test]
fn test_gap_fill_override_changes_series() {
    let mut config = EngineConfig::standard();
    config
        .gap_fill_overrides
        .insert("health".to_string(), GapFillPolicy::Unknown);
    let mut feed = VecFeed::new("session", session());
    let output = run_feed(&mut feed, config).unwrap();

    let clients = &output.tables["client"];
    let health = clients.schema.column("health").unwrap();
    let client_a = &clients.series[0];
    // Explicit observations at ticks 1, 5 and 9 survive; gaps are unknown
    // instead of held.
    assert_eq!(client_a.value(1, health), Some(&FieldValue::Int(150)));
    assert_eq!(client_a.value(2, health), None);
    assert_eq!(client_a.value(5, health), Some(&FieldValue::Int(120)));
    assert_eq!(client_a.value(8, health), None);
    assert_eq!(client_a.value(9, health), Some(&FieldValue::Int(110)));
}

// =============================================================================
// EXPORTER BOUNDARY
// =============================================================================

/// Sink that records everything it is handed, for contract verification.
#[derive(Default)]
struct CollectingSink {
    columns: BTreeMap<String, (Vec<String>, Vec<String>)>,
    state_rows: Vec<(String, u64, Tick)>,
    feature_rows: Vec<(String, Tick)>,
    summaries: Vec<TransientSummary>,
    finished: bool,
}

impl TableSink for CollectingSink {
    fn begin_class(&mut self, table: &ClassTable) -> anyhow::Result<()> {
        self.columns.insert(
            table.class.clone(),
            (table.state_columns(), table.feature_columns()),
        );
        Ok(())
    }

    fn state_row(&mut self, class: &str, row: &StateRow<'_>) -> anyhow::Result<()> {
        self.state_rows
            .push((class.to_string(), row.handle, row.tick));
        Ok(())
    }

    fn feature_row(&mut self, class: &str, row: &DerivedFeatureRow) -> anyhow::Result<()> {
        self.feature_rows.push((class.to_string(), row.tick));
        Ok(())
    }

    fn transient_summary(&mut self, summary: &TransientSummary) -> anyhow::Result<()> {
        self.summaries.push(summary.clone());
        Ok(())
    }

    fn finish(&mut self) -> anyhow::Result<()> {
        self.finished = true;
        Ok(())
    }
}

#[test]
fn test_export_into_sink_honors_contract() {
    let mut feed = VecFeed::new("session", session());
    let output = run_feed(&mut feed, EngineConfig::standard()).unwrap();

    let mut sink = CollectingSink::default();
    output.export_into(&mut sink).unwrap();

    assert!(sink.finished);
    let (client_state, client_features) = &sink.columns["client"];
    assert_eq!(&client_state[..2], &["handle_id", "tick"]);
    assert!(client_features.contains(&"speed".to_string()));

    // Row volume matches the summary exactly.
    assert_eq!(sink.state_rows.len() as u64, output.summary.state_rows);
    assert_eq!(sink.feature_rows.len() as u64, output.summary.feature_rows);
    assert_eq!(sink.summaries.len(), 1);

    // State rows arrive keyed and ordered per entity.
    let client_rows: Vec<_> = sink
        .state_rows
        .iter()
        .filter(|(class, _, _)| class == "client")
        .collect();
    assert_eq!(client_rows.len(), 18);
}

#[test]
fn test_projectile_without_owner_is_valid() {
    let records = vec![
        spawn(1, 40, "projectile").with_field("origin", FieldValue::Vec3([0.0, 0.0, 0.0])),
        RawRecord::bare(4, 40, "projectile", Lifecycle::Destroy)
            .with_field("expiry", FieldValue::Text("timeout".into())),
    ];
    let mut feed = VecFeed::new("world-effect", records);
    let output = run_feed(&mut feed, EngineConfig::standard()).unwrap();
    assert_eq!(output.transients.len(), 1);
    assert_eq!(output.transients[0].owner, None);
    assert_eq!(output.transients[0].expiry, ExpiryReason::Timeout);
}

#[test]
fn test_unsupported_feature_rejected_before_run() {
    use ticktable::{ClassSchema, FieldRole, FieldType};

    let mut config = EngineConfig::standard();
    config.schemas = vec![ClassSchema::new("client").field_with_role(
        "origin",
        FieldType::Text,
        FieldRole::Position,
    )];
    let mut feed = VecFeed::new("unused", session());
    let err = run_feed(&mut feed, config).unwrap_err();
    assert!(err.to_string().contains("invalid engine configuration"));
    // No record was consumed: the feed is untouched.
    assert_eq!(feed.remaining(), Some(session().len()));
}
