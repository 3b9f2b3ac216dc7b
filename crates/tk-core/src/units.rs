//! Glucose unit configuration.
//!
//! Glucose-valued schedules are stored in mg/dL. The user's preferred unit is
//! passed explicitly wherever values are converted for display or export.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ValidationError;

/// mmol/L per mg/dL.
pub const MMOL_PER_MG_DL: f64 = 0.0555;

/// Unit in which glucose values are presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GlucoseUnit {
    #[default]
    #[serde(rename = "mg/dL")]
    MgDl,
    #[serde(rename = "mmol/L")]
    MmolL,
}

impl GlucoseUnit {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::MgDl => "mg/dL",
            Self::MmolL => "mmol/L",
        }
    }

    /// Converts a canonical mg/dL value into this unit.
    #[must_use]
    pub fn from_mg_dl(self, value: f64) -> f64 {
        match self {
            Self::MgDl => value,
            Self::MmolL => round_to(value * MMOL_PER_MG_DL, 1),
        }
    }

    /// Converts a value in this unit into canonical mg/dL.
    #[must_use]
    pub fn to_mg_dl(self, value: f64) -> f64 {
        match self {
            Self::MgDl => value,
            Self::MmolL => (value / MMOL_PER_MG_DL).round(),
        }
    }
}

impl fmt::Display for GlucoseUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for GlucoseUnit {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mg/dl" | "mgdl" => Ok(Self::MgDl),
            "mmol/l" | "mmol" => Ok(Self::MmolL),
            _ => Err(ValidationError::InvalidGlucoseUnit {
                value: s.to_string(),
            }),
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
