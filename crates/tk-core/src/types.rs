//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// The grid does not cover exactly one day.
    #[error("time grid must cover one day: {slots} slots of {slot_minutes} minutes")]
    InvalidGrid { slots: usize, slot_minutes: u32 },

    /// A persisted profile document is malformed.
    #[error("invalid profile: {reason}")]
    InvalidProfile { reason: String },

    /// Invalid schedule kind value.
    #[error("invalid schedule kind: {value}")]
    InvalidScheduleKind { value: String },

    /// Invalid treatment kind value.
    #[error("invalid treatment kind: {value}")]
    InvalidTreatmentKind { value: String },

    /// Invalid glucose unit value.
    #[error("invalid glucose unit: {value}")]
    InvalidGlucoseUnit { value: String },
}

/// Generates a validated string ID newtype with common trait implementations.
macro_rules! define_string_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new ID after validation.
            pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
                let id = id.into();
                if id.is_empty() {
                    return Err(ValidationError::Empty { field: $field_name });
                }
                Ok(Self(id))
            }

            /// Creates a fresh random ID.
            #[must_use]
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            /// Returns the ID as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(
    /// The local identifier of a treatment record.
    ///
    /// Only the local store addresses records by this ID.
    RecordId, "record ID"
);

define_string_id!(
    /// The identifier collaborators use for their copy of a record.
    ///
    /// Tracked separately from [`RecordId`] so that the remote log and the
    /// health store never see local identifiers.
    SyncId, "sync ID"
);

define_string_id!(
    /// Links derived sibling records that are deleted together.
    GroupId, "group ID"
);
