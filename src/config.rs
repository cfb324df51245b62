//! Engine Configuration
//!
//! The complete, validated-up-front description of a run: which entity
//! classes are tracked (and which of those are transient), which derived
//! features are computed, and the gap-fill policy per field. Validation
//! happens once, before any record is processed - a configuration that asks
//! for an impossible derivation never starts a run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::ReconcileError;
use crate::schema::{default_client_schema, default_projectile_schema, ClassSchema, FieldRole, FieldType};

/// Gap-filling policy for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapFillPolicy {
    /// Repeat the most recent known value until a new one is observed.
    /// Matches a replay protocol that only reports fields when they change.
    HoldLast,
    /// Absent means unknown for that tick; no carry-forward.
    Unknown,
}

impl Default for GapFillPolicy {
    fn default() -> Self {
        Self::HoldLast
    }
}

/// Derived per-tick signals the engine can compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DerivedFeature {
    /// Signed minimal difference between consecutive orientation values on a
    /// circular domain.
    AngleDelta,
    /// Finite difference of position over one tick interval.
    Speed,
    /// Finite difference of speed over one tick interval.
    Acceleration,
    /// Edge detector over the visibility field; rows only on transitions.
    VisibilityEdges,
}

impl DerivedFeature {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AngleDelta => "angle_delta",
            Self::Speed => "speed",
            Self::Acceleration => "acceleration",
            Self::VisibilityEdges => "visibility_edges",
        }
    }

    /// All features, in canonical order.
    pub fn all() -> &'static [DerivedFeature] {
        &[
            Self::AngleDelta,
            Self::Speed,
            Self::Acceleration,
            Self::VisibilityEdges,
        ]
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Declared schemas, one per tracked class. Records for classes not
    /// listed here are dropped and counted.
    pub schemas: Vec<ClassSchema>,
    /// Classes handled by the transient tracker (bounded spawn/destroy
    /// lifecycle, summary row on seal).
    pub transient_classes: BTreeSet<String>,
    /// Derived signals to compute for every class whose schema supports them.
    pub derived_features: BTreeSet<DerivedFeature>,
    /// Per-field gap-fill overrides, by field name, applied across classes.
    /// Fields without an override use `HoldLast`.
    pub gap_fill_overrides: BTreeMap<String, GapFillPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl EngineConfig {
    /// Standard configuration: built-in client and projectile schemas, all
    /// derived features, hold-last everywhere.
    pub fn standard() -> Self {
        Self {
            schemas: vec![default_client_schema(), default_projectile_schema()],
            transient_classes: BTreeSet::from(["projectile".to_string()]),
            derived_features: DerivedFeature::all().iter().copied().collect(),
            gap_fill_overrides: BTreeMap::new(),
        }
    }

    /// Configuration with no derived features; state tables only.
    pub fn state_only() -> Self {
        Self {
            derived_features: BTreeSet::new(),
            ..Self::standard()
        }
    }

    /// Look up the schema declared for a class.
    pub fn schema_for(&self, class: &str) -> Option<&ClassSchema> {
        self.schemas.iter().find(|s| s.class == class)
    }

    /// Effective gap-fill policy for a field name.
    #[inline]
    pub fn gap_fill_for(&self, field: &str) -> GapFillPolicy {
        self.gap_fill_overrides
            .get(field)
            .copied()
            .unwrap_or_default()
    }

    /// Validate the configuration. Fails with `UnsupportedFieldType` when a
    /// requested feature targets a role field whose declared type cannot
    /// support the derivation. A class that simply lacks the role is fine -
    /// the feature is skipped for that class.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        for schema in &self.schemas {
            for feature in &self.derived_features {
                self.check_feature(schema, *feature)?;
            }
            // Transient lifecycle payloads have fixed types as well.
            if self.transient_classes.contains(&schema.class) {
                self.check_role_type(schema, FieldRole::Owner, FieldType::Int, "owner_ref")?;
                self.check_role_type(
                    schema,
                    FieldRole::ExpiryReason,
                    FieldType::Text,
                    "expiry_reason",
                )?;
            }
        }
        for override_name in self.gap_fill_overrides.keys() {
            let declared = self
                .schemas
                .iter()
                .any(|s| s.column(override_name).is_some());
            if !declared {
                tracing::warn!(
                    field = override_name.as_str(),
                    "gap-fill override targets an undeclared field, ignoring"
                );
            }
        }
        Ok(())
    }

    fn check_feature(
        &self,
        schema: &ClassSchema,
        feature: DerivedFeature,
    ) -> Result<(), ReconcileError> {
        match feature {
            DerivedFeature::Speed | DerivedFeature::Acceleration => {
                self.check_role_type(schema, FieldRole::Position, FieldType::Vec3, feature.name())
            }
            DerivedFeature::AngleDelta => {
                for col in schema.role_columns(FieldRole::Orientation) {
                    let spec = &schema.fields[col];
                    if spec.field_type != FieldType::Angle {
                        return Err(ReconcileError::UnsupportedFieldType {
                            class: schema.class.clone(),
                            field: spec.name.clone(),
                            expected: FieldType::Angle.name(),
                            actual: spec.field_type.name(),
                            feature: feature.name(),
                        });
                    }
                }
                Ok(())
            }
            DerivedFeature::VisibilityEdges => {
                self.check_role_type(schema, FieldRole::Visibility, FieldType::Bool, feature.name())
            }
        }
    }

    fn check_role_type(
        &self,
        schema: &ClassSchema,
        role: FieldRole,
        expected: FieldType,
        feature: &'static str,
    ) -> Result<(), ReconcileError> {
        if let Some(col) = schema.role_column(role) {
            let spec = &schema.fields[col];
            if spec.field_type != expected {
                return Err(ReconcileError::UnsupportedFieldType {
                    class: schema.class.clone(),
                    field: spec.name.clone(),
                    expected: expected.name(),
                    actual: spec.field_type.name(),
                    feature,
                });
            }
        }
        Ok(())
    }

    /// Freeze schemas behind `Arc` for sharing across the pipeline. The name
    /// index is rebuilt so schemas that came in through deserialization
    /// resolve columns correctly.
    pub(crate) fn shared_schemas(&self) -> BTreeMap<String, Arc<ClassSchema>> {
        self.schemas
            .iter()
            .map(|s| {
                let mut schema = s.clone();
                schema.reindex();
                (schema.class.clone(), Arc::new(schema))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_config_validates() {
        EngineConfig::standard().validate().unwrap();
    }

    #[test]
    fn test_speed_on_non_vector_position_rejected() {
        let mut config = EngineConfig::standard();
        config.schemas = vec![ClassSchema::new("client").field_with_role(
            "origin",
            FieldType::Float,
            FieldRole::Position,
        )];
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnsupportedFieldType { feature: "speed", .. }
        ));
    }

    #[test]
    fn test_angle_delta_on_plain_float_rejected() {
        let mut config = EngineConfig::standard();
        config.schemas = vec![ClassSchema::new("client").field_with_role(
            "view_angle",
            FieldType::Float,
            FieldRole::Orientation,
        )];
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnsupportedFieldType {
                feature: "angle_delta",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_role_is_not_an_error() {
        let mut config = EngineConfig::standard();
        // No position, orientation, or visibility fields at all.
        config.schemas = vec![ClassSchema::new("client").field("health", FieldType::Int)];
        config.transient_classes.clear();
        config.validate().unwrap();
    }

    #[test]
    fn test_gap_fill_override_lookup() {
        let mut config = EngineConfig::standard();
        config
            .gap_fill_overrides
            .insert("in_pvs".to_string(), GapFillPolicy::Unknown);
        assert_eq!(config.gap_fill_for("in_pvs"), GapFillPolicy::Unknown);
        assert_eq!(config.gap_fill_for("health"), GapFillPolicy::HoldLast);
    }

    #[test]
    fn test_transient_owner_type_enforced() {
        let mut config = EngineConfig::standard();
        config.schemas = vec![ClassSchema::new("projectile").field_with_role(
            "owner",
            FieldType::Text,
            FieldRole::Owner,
        )];
        config.derived_features.clear();
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::UnsupportedFieldType {
                feature: "owner_ref",
                ..
            }
        ));
    }
}
