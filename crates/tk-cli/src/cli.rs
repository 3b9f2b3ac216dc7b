//! Command-line argument definitions.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tk_core::{ScheduleKind, TreatmentKind};

/// Therapy schedule and treatment record keeper.
///
/// Edits the basal, sensitivity and target schedules and keeps the
/// glucose, carbohydrate and insulin history the dosing engine works from.
#[derive(Debug, Parser)]
#[command(name = "tk", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show record counts and the last dosing recompute.
    Status,

    /// Show or edit a therapy schedule.
    #[command(subcommand)]
    Profile(ProfileAction),

    /// Add, list or delete treatment records.
    #[command(subcommand)]
    Records(RecordsAction),
}

#[derive(Debug, Subcommand)]
pub enum ProfileAction {
    /// Print a schedule in the configured glucose unit.
    Show {
        /// basal, sensitivity or target.
        kind: ScheduleKind,

        /// Print the stored document as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Replace a schedule.
    Set {
        /// basal, sensitivity or target.
        kind: ScheduleKind,

        /// Entries as `HH:MM=value`; targets use `HH:MM=low-high`.
        #[arg(required = true)]
        entries: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum RecordsAction {
    /// Record a new treatment.
    #[command(subcommand)]
    Add(NewRecord),

    /// List stored records, oldest first.
    List {
        /// Only show records of this kind.
        #[arg(long)]
        kind: Option<TreatmentKind>,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a record everywhere it is known.
    Delete {
        /// Local record ID.
        id: String,

        /// Confirm deletions that remove insulin, such as a meal's bolus.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Debug, Clone, Subcommand)]
pub enum NewRecord {
    /// A glucose reading, in the configured unit.
    Glucose {
        value: f64,

        /// When it happened (RFC 3339); defaults to now.
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Carbohydrates eaten, in grams.
    Carb {
        grams: f64,

        #[arg(long, default_value_t = 0.0)]
        fat: f64,

        #[arg(long, default_value_t = 0.0)]
        protein: f64,

        /// Insulin units delivered for this meal, stored as a grouped record.
        #[arg(long)]
        bolus: Option<f64>,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Insulin delivered, in units.
    Insulin {
        units: f64,

        /// Record a temporary basal adjustment instead of a bolus.
        #[arg(long)]
        basal: bool,

        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },
}
