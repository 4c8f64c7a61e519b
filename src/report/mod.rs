// src/report/mod.rs

//! Result aggregation and persisted batch state.
//!
//! - [`aggregate`] runs verification hooks over a finished batch and builds
//!   the [`BatchReport`].
//! - [`store`] reads and writes `report.json`, `status.json` and cancel
//!   requests under the batch's state directory.

pub mod aggregate;
pub mod store;

pub use aggregate::{aggregate, output_digest, BatchReport, JobReport, StateCounts, Verification};
pub use store::{BatchStore, StatusSnapshot, StoredStatus};
