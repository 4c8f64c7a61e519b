// src/config/mod.rs

//! Batch configuration: TOML model, loading and validation.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path, load_from_str};
pub use model::{
    BatchConfig, BatchSection, BatchSettings, JobConfig, RawBatchConfig, WorkerConfig,
};
