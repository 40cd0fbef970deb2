//! Event selection and weighted-observation extraction for secondary-vertex
//! analyses.
//!
//! ```text
//!   files ──► loader ──► EventTable ──► baseline ∧ region mask
//!                                              │
//!                                              ▼
//!                          ExtractionEngine ──► ObservationSet per (region, file)
//!                                              │
//!                                              ▼
//!                          RegionAggregator ──► pooled observations per region
//! ```

pub mod aggregate;
pub mod catalog;
pub mod config;
pub mod cut;
pub mod data;
pub mod error;
pub mod extract;
pub mod region;
pub mod summary;

pub use aggregate::{LoadOutcome, RegionAggregator, RegionResult, combine};
pub use catalog::{VariableCatalog, VariableDescriptor, VariableKind};
pub use config::{AnalysisConfig, RunConfig, SampleKind};
pub use cut::{CutExpression, evaluate_cut};
pub use data::filter::SelectionSpec;
pub use data::model::{ObservationSet, PooledObservationSet};
pub use error::{Result, SelectionError};
pub use extract::ExtractionEngine;
pub use region::RegionRequest;
pub use summary::{LoadSummary, LoadSummaryTracker};
