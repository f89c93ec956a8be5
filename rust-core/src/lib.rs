//! Activity Sensing Engine Library
//!
//! Classifies physical activity (stationary, walking, running, cycling,
//! travelling, ...) from a phone's triaxial accelerometer and estimates
//! energy expenditure in METs.
//!
//! # Design Philosophy
//!
//! - **Bounded memory**: sample batches and calibration measurements are
//!   pre-allocated and recycled through [`pool::TwoWayPool`]s.
//! - **Fail-loud numerics**: corrupted statistics stop the pipeline instead of
//!   producing labels from garbage.
//! - **Single owner**: the processing thread owns the calibrator; everyone
//!   else reads [`CalibrationSnapshot`] copies.
//! - **Orientation-free features**: batches are rotated into a gravity-aligned
//!   world frame before feature extraction.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use activity_sensing::classifier;
//! use activity_sensing::interfaces::{LogDiagnostics, MemorySink};
//! use activity_sensing::pipeline::{Pipeline, PipelineConfig};
//! use activity_sensing::types::SampleBatch;
//!
//! let mut pipeline = Pipeline::new(
//!     PipelineConfig::default(),
//!     classifier::default_model(),
//!     Box::new(MemorySink::new()),
//!     Arc::new(LogDiagnostics),
//! )?;
//!
//! let mut batch = SampleBatch::new(128);
//! batch.fill_uniform(0, 20, &[[0.0, 0.0, 9.81]; 128]);
//! let report = pipeline.process_batch(&mut batch)?;
//! println!("{} ({:.2} MET)", report.label, report.met);
//! # Ok::<(), activity_sensing::SensingError>(())
//! ```

pub mod aggregator;
pub mod calibration;
pub mod classifier;
pub mod config;
pub mod energy;
pub mod engine;
pub mod error;
pub mod features;
pub mod fft;
pub mod interfaces;
pub mod pipeline;
pub mod pool;
pub mod rotation;
pub mod stats;
pub mod types;

#[cfg(test)]
mod stress_tests;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{Engine, EngineSummary};
pub use error::{Result, SensingError};
pub use pipeline::{BatchReport, Pipeline, PipelineConfig};
pub use types::{
    ActivityLabel, CalibrationProfile, CalibrationSnapshot, CalibrationState, Classification,
    FeatureVector, SampleBatch,
};
