//! Engine configuration.
//!
//! Every struct has a `Default` with the production values and deserializes
//! with `#[serde(default)]`, so a JSON file only needs the fields it changes:
//!
//! ```json
//! {
//!   "batch": { "capacity": 256 },
//!   "pipeline": { "calibrator": { "calibration_duration_ms": 10000 } }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::classifier::ClassifierKind;
use crate::error::{Result, SensingError};
use crate::pipeline::PipelineConfig;
use crate::types::FEATURE_COUNT;

/// Sample batch geometry and buffering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Samples per batch.
    pub capacity: usize,
    /// Inter-sample delay (ms).
    pub sample_period_ms: u64,
    /// Number of batches in the double buffer.
    pub pool_capacity: usize,
    /// Bounded wait for either side of the double buffer (ms).
    pub wait_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            capacity: 128,
            sample_period_ms: 20,    // 50 Hz
            pool_capacity: 2,        // double buffering
            wait_timeout_ms: 10_000,
        }
    }
}

impl BatchConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Wall time covered by one full batch.
    pub fn batch_duration_ms(&self) -> u64 {
        self.capacity as u64 * self.sample_period_ms
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub kind: ClassifierKind,
    /// Per-feature nearest-neighbour weights.
    pub weights: Option<[f64; FEATURE_COUNT]>,
    /// JSON model file; the built-in reference model is used when absent.
    pub model_path: Option<PathBuf>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch: BatchConfig,
    pub pipeline: PipelineConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("loading configuration from {}", path.display());
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        let batch = &self.batch;
        if batch.capacity == 0 || batch.pool_capacity == 0 || batch.sample_period_ms == 0 {
            return Err(SensingError::invalid_config(
                "batch capacity, pool capacity and sample period must be > 0",
            ));
        }

        let features = &self.pipeline.features;
        if features.window == 0 || features.window > batch.capacity {
            return Err(SensingError::invalid_config(format!(
                "feature window {} must be within 1..={}",
                features.window, batch.capacity
            )));
        }
        if features.fft_enabled && !features.window.is_power_of_two() {
            return Err(SensingError::invalid_config(format!(
                "feature window {} must be a power of two when FFT is enabled",
                features.window
            )));
        }

        let cal = &self.pipeline.calibrator;
        if !(cal.base_deviation > 0.0) || !(cal.allowed_multiples_of_sd > 0.0) {
            return Err(SensingError::invalid_config(
                "calibrator deviation and allowed multiples must be > 0",
            ));
        }
        if cal.measurement_capacity == 0 {
            return Err(SensingError::invalid_config("measurement capacity must be > 0"));
        }
        let horizon_ms = 2 * cal.calibration_duration_ms.max(cal.uncarried_duration_ms);
        let retained_ms = cal.measurement_capacity as u64 * batch.batch_duration_ms();
        if retained_ms < horizon_ms {
            return Err(SensingError::invalid_config(format!(
                "measurement capacity {} covers {} ms of batches, less than the {} ms calibration horizon",
                cal.measurement_capacity, retained_ms, horizon_ms
            )));
        }

        if self.pipeline.aggregator.history == 0 {
            return Err(SensingError::invalid_config("aggregator history must be > 0"));
        }
        if let Some(weights) = &self.pipeline.classifier.weights {
            if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(SensingError::invalid_config(
                    "classifier weights must be finite and non-negative",
                ));
            }
        }
        self.pipeline.body.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.batch.capacity, 128);
        assert_eq!(config.batch.batch_duration_ms(), 2560);
        assert_eq!(config.pipeline.calibrator.calibration_duration_ms, 5_000);
        assert_eq!(config.pipeline.aggregator.history, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(
            r#"{
                "batch": { "capacity": 256 },
                "pipeline": {
                    "calibrator": { "calibration_duration_ms": 10000 },
                    "classifier": { "kind": "naive_bayes" }
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.batch.capacity, 256);
        assert_eq!(config.batch.sample_period_ms, 20);
        assert_eq!(config.pipeline.calibrator.calibration_duration_ms, 10_000);
        assert_eq!(config.pipeline.calibrator.base_deviation, 0.1);
        assert_eq!(config.pipeline.classifier.kind, ClassifierKind::NaiveBayes);
    }

    #[test]
    fn test_json_round_trip() {
        let config = EngineConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(EngineConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_window_larger_than_batch_rejected() {
        let err = EngineConfig::from_json(r#"{ "batch": { "capacity": 64 } }"#).unwrap_err();
        assert!(matches!(err, SensingError::InvalidConfig { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_measurement_capacity_must_cover_horizon() {
        let mut config = EngineConfig::default();
        // 256 * 2560 ms = 655 s, enough for 2 * 300 s.
        assert_eq!(config.pipeline.calibrator.measurement_capacity, 256);
        config.validate().unwrap();

        config.pipeline.calibrator.measurement_capacity = 64;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, SensingError::InvalidConfig { .. }));

        config.pipeline.calibrator.measurement_capacity = 256;
        config.pipeline.calibrator.calibration_duration_ms = 400_000;
        assert!(config.validate().is_err());
        config.pipeline.calibrator.measurement_capacity = 313;
        config.validate().unwrap();
    }

    #[test]
    fn test_non_power_of_two_window_needs_fft_disabled() {
        let mut config = EngineConfig::default();
        config.pipeline.features.window = 100;
        assert!(config.validate().is_err());
        config.pipeline.features.fft_enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        assert!(matches!(
            EngineConfig::from_json("{ batch: }"),
            Err(SensingError::Json(_))
        ));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = EngineConfig::load("/nonexistent/activity-sensing.json").unwrap_err();
        assert!(matches!(err, SensingError::Io(_)));
    }
}
