//! Treatment records: the glucose, carbohydrate and insulin history.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, RecordId, SyncId, ValidationError};

/// The kind of a treatment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreatmentKind {
    Glucose,
    Carb,
    Insulin,
}

impl TreatmentKind {
    pub const ALL: [Self; 3] = [Self::Glucose, Self::Carb, Self::Insulin];

    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Glucose => "glucose",
            Self::Carb => "carb",
            Self::Insulin => "insulin",
        }
    }

    /// Whether removing or adding a record of this kind changes the
    /// insulin or carbohydrate history the dosing engine works from.
    #[must_use]
    pub const fn affects_dosing(&self) -> bool {
        matches!(self, Self::Carb | Self::Insulin)
    }
}

impl fmt::Display for TreatmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TreatmentKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "glucose" => Ok(Self::Glucose),
            "carb" | "carbs" => Ok(Self::Carb),
            "insulin" => Ok(Self::Insulin),
            _ => Err(ValidationError::InvalidTreatmentKind {
                value: s.to_string(),
            }),
        }
    }
}

/// Kind-specific contents of a treatment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TreatmentPayload {
    /// A glucose reading.
    Glucose { mg_dl: f64 },
    /// Carbohydrates eaten, with optional fat and protein in grams.
    Carb {
        grams: f64,
        #[serde(default)]
        fat: f64,
        #[serde(default)]
        protein: f64,
    },
    /// Insulin delivered.
    Insulin {
        units: f64,
        #[serde(default)]
        bolus: bool,
    },
}

impl TreatmentPayload {
    #[must_use]
    pub const fn kind(&self) -> TreatmentKind {
        match self {
            Self::Glucose { .. } => TreatmentKind::Glucose,
            Self::Carb { .. } => TreatmentKind::Carb,
            Self::Insulin { .. } => TreatmentKind::Insulin,
        }
    }
}

/// A single event in the patient history.
///
/// The local store owns the canonical record and addresses it by `id`.
/// Collaborators hold copies addressed by `sync_id`. The remote log can
/// also drop a whole group of derived siblings by `group_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentRecord {
    pub id: RecordId,
    pub sync_id: SyncId,
    pub timestamp: DateTime<Utc>,
    pub payload: TreatmentPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
}

impl TreatmentRecord {
    /// Creates an ungrouped record with fresh local and sync identifiers.
    #[must_use]
    pub fn new(timestamp: DateTime<Utc>, payload: TreatmentPayload) -> Self {
        Self {
            id: RecordId::generate(),
            sync_id: SyncId::generate(),
            timestamp,
            payload,
            group_id: None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> TreatmentKind {
        self.payload.kind()
    }
}

/// Links `records` as siblings under a new group, returning the group ID.
pub fn assign_group(records: &mut [TreatmentRecord]) -> GroupId {
    let group = GroupId::generate();
    for record in records {
        record.group_id = Some(group.clone());
    }
    group
}
