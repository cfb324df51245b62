//! Declared Field Schemas
//!
//! Every tracked entity class declares its field set up front. This is the
//! canonical definition of what the engine will accept for a class - any
//! field not listed here is not part of the contract and is dropped (counted)
//! at ingest. Declaring the schema eliminates open-ended dynamic field access
//! and lets configuration validation reject impossible derivations before a
//! single record is processed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::record::FieldValue;

/// Declared type of a schema field.
///
/// `Angle` is float-valued on the wire but lives on a circular domain
/// (degrees); it is a distinct type so that angular derivations can be
/// validated at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Int,
    Float,
    Angle,
    Bool,
    Vec3,
    Text,
}

impl FieldType {
    /// Whether a decoded value is acceptable for this declared type.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Int, FieldValue::Int(_))
                | (Self::Float, FieldValue::Float(_))
                | (Self::Float, FieldValue::Int(_))
                | (Self::Angle, FieldValue::Float(_))
                | (Self::Angle, FieldValue::Int(_))
                | (Self::Bool, FieldValue::Bool(_))
                | (Self::Vec3, FieldValue::Vec3(_))
                | (Self::Text, FieldValue::Text(_))
        )
    }

    /// Canonical name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Angle => "angle",
            Self::Bool => "bool",
            Self::Vec3 => "vec3",
            Self::Text => "text",
        }
    }
}

/// Semantic role of a field within its class.
///
/// Roles are what derivations and lifecycle handling key off: the deriver
/// finds the position/orientation/visibility fields through their role, and
/// the transient tracker finds owner and expiry payloads the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRole {
    /// Plain data column, carried through to output untouched.
    Plain,
    /// World position; source of speed/acceleration derivation. Vec3 only.
    Position,
    /// Circular orientation value; source of angle-delta derivation.
    Orientation,
    /// Visibility flag; source of edge detection. Bool only.
    Visibility,
    /// Slot id of the owning client, on transient classes. Int only.
    Owner,
    /// Expiry-reason payload on a transient destroy record. Text only.
    ExpiryReason,
    /// Stable platform identity (e.g. account id); copied onto the handle.
    ExternalId,
    /// Human-readable entity name; copied onto the handle.
    DisplayName,
}

/// One declared field of a class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub role: FieldRole,
}

/// Declared schema for one entity class.
///
/// Column order is declaration order and is stable for a given configuration;
/// output tables rely on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSchema {
    pub class: String,
    pub fields: Vec<FieldSpec>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl ClassSchema {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            fields: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Declare a plain field.
    pub fn field(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.field_with_role(name, field_type, FieldRole::Plain)
    }

    /// Declare a field with a semantic role. Redeclaring a name replaces the
    /// earlier declaration.
    pub fn field_with_role(
        mut self,
        name: impl Into<String>,
        field_type: FieldType,
        role: FieldRole,
    ) -> Self {
        let name = name.into();
        if let Some(&idx) = self.index.get(&name) {
            self.fields[idx] = FieldSpec {
                name,
                field_type,
                role,
            };
        } else {
            self.index.insert(name.clone(), self.fields.len());
            self.fields.push(FieldSpec {
                name,
                field_type,
                role,
            });
        }
        self
    }

    /// Rebuild the name index (needed after deserialization).
    pub fn reindex(&mut self) {
        self.index = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.name.clone(), i))
            .collect();
    }

    /// Column index for a field name.
    #[inline]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// First column carrying the given role, if any.
    pub fn role_column(&self, role: FieldRole) -> Option<usize> {
        self.fields.iter().position(|f| f.role == role)
    }

    /// All columns carrying the given role, in declaration order.
    pub fn role_columns(&self, role: FieldRole) -> Vec<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.role == role)
            .map(|(i, _)| i)
            .collect()
    }
}

// =============================================================================
// BUILT-IN SCHEMAS
// =============================================================================

/// Default client (player) schema, mirroring the field set a Source-engine
/// demo decoder reports per player entity.
pub fn default_client_schema() -> ClassSchema {
    ClassSchema::new("client")
        .field_with_role("origin", FieldType::Vec3, FieldRole::Position)
        .field_with_role("view_angle", FieldType::Angle, FieldRole::Orientation)
        .field_with_role("pitch_angle", FieldType::Angle, FieldRole::Orientation)
        .field("health", FieldType::Int)
        .field("max_health", FieldType::Int)
        .field("player_class", FieldType::Text)
        .field("team", FieldType::Text)
        .field("state", FieldType::Text)
        .field("charge", FieldType::Int)
        .field("ping", FieldType::Int)
        .field_with_role("in_pvs", FieldType::Bool, FieldRole::Visibility)
        .field_with_role("account_id", FieldType::Text, FieldRole::ExternalId)
        .field_with_role("name", FieldType::Text, FieldRole::DisplayName)
}

/// Default projectile schema.
pub fn default_projectile_schema() -> ClassSchema {
    ClassSchema::new("projectile")
        .field_with_role("origin", FieldType::Vec3, FieldRole::Position)
        .field("initial_velocity", FieldType::Vec3)
        .field_with_role("owner", FieldType::Int, FieldRole::Owner)
        .field_with_role("expiry", FieldType::Text, FieldRole::ExpiryReason)
        .field_with_role("in_pvs", FieldType::Bool, FieldRole::Visibility)
}
