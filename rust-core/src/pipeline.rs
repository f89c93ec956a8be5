//! Per-batch activity pipeline integrating all processing stages.
//!
//! This module orchestrates the full data flow for one sample batch:
//!
//! 1. **Statistics**: per-axis mean/sd/sums of the raw batch
//! 2. **Calibration**: stationary detection, calibration, uncarried flag
//! 3. **Correction + Rotation**: apply the profile, rotate into the world frame
//! 4. **Features + Classifier + Aggregator**: raw label, then smoothed label
//! 5. **Energy**: MET from activity counts of the rotated batch
//! 6. **Records**: extend or close the running [`Classification`]
//!
//! Recoverable conditions (motion, degenerate gravity, no features) become
//! labels and diagnostics. Fatal errors propagate out of
//! [`Pipeline::process_batch`] and the caller must stop feeding batches.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::aggregator::{Aggregator, AggregatorConfig};
use crate::calibration::{CalibrationOutcome, Calibrator, CalibratorConfig};
use crate::classifier::{self, Classifier, LabeledModel};
use crate::config::ClassifierConfig;
use crate::energy::{BodyProfile, EnergyEstimator};
use crate::error::{Result, SensingError};
use crate::features::{FeatureConfig, FeatureExtractor};
use crate::interfaces::{ClassificationSink, ConfigStore, Diagnostics};
use crate::rotation;
use crate::stats::Statistics;
use crate::types::*;

/// Configuration for the complete activity pipeline.
///
/// Bundles all sub-component configurations into a single package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Stationary detection and calibration thresholds.
    pub calibrator: CalibratorConfig,

    /// Feature window and spectral features.
    pub features: FeatureConfig,

    /// Classifier strategy and model source.
    pub classifier: ClassifierConfig,

    /// Label smoothing.
    pub aggregator: AggregatorConfig,

    /// Body parameters for the MET estimate.
    pub body: BodyProfile,

    /// Report `UNCALIBRATED` instead of classifying until calibration completes.
    pub require_calibration: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            calibrator: CalibratorConfig::default(),
            features: FeatureConfig::default(),
            classifier: ClassifierConfig::default(),
            aggregator: AggregatorConfig::default(),
            body: BodyProfile::default(),
            require_calibration: true,
        }
    }
}

/// What the pipeline concluded about one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    /// Per-batch label before smoothing.
    pub raw_label: ActivityLabel,
    /// Smoothed label, the one recorded.
    pub label: ActivityLabel,
    pub met: f64,
    /// `None` for an empty batch.
    pub calibration: Option<CalibrationOutcome>,
    /// Whether the batch could be rotated into the world frame.
    pub rotated: bool,
    pub features: Option<FeatureVector>,
}

/// Activity pipeline processor.
///
/// Owned by the processing thread. Other threads read calibration state
/// through [`Pipeline::snapshot`] copies.
pub struct Pipeline {
    config: PipelineConfig,

    // Processing stages
    stats: Statistics<AXES>,
    calibrator: Calibrator,
    extractor: FeatureExtractor,
    classifier: Box<dyn Classifier>,
    aggregator: Aggregator,
    energy: EnergyEstimator,

    // Collaborators
    sink: Box<dyn ClassificationSink>,
    diagnostics: Arc<dyn Diagnostics>,
    store: Option<Box<dyn ConfigStore>>,

    // Record tracking
    current: Option<Classification>,
    batches_processed: u64,
    last_state: CalibrationState,
}

impl Pipeline {
    /// Creates a pipeline. Fails on invalid configuration or model.
    pub fn new(
        config: PipelineConfig,
        model: LabeledModel,
        sink: Box<dyn ClassificationSink>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let classifier = classifier::build(config.classifier.kind, model, config.classifier.weights)?;
        let extractor = FeatureExtractor::from_config(&config.features)?;
        let energy = EnergyEstimator::new(&config.body)?;
        debug!(
            "pipeline created: {} classifier, window {}, fft {}",
            classifier.name(),
            extractor.window(),
            extractor.fft_enabled()
        );

        Ok(Self {
            stats: Statistics::new(),
            calibrator: Calibrator::new(config.calibrator.clone()),
            extractor,
            classifier,
            aggregator: Aggregator::new(&config.aggregator),
            energy,
            sink,
            diagnostics,
            store: None,
            current: None,
            batches_processed: 0,
            last_state: CalibrationState::Uncalibrated,
            config,
        })
    }

    /// Attach a configuration store and resume from the profile it holds.
    pub fn with_store(mut self, store: Box<dyn ConfigStore>) -> Result<Self> {
        if let Some(profile) = store.load_profile()? {
            info!(
                "resuming from stored profile (calibrated: {}, gravity {:.3})",
                profile.calibrated, profile.gravity
            );
            self.calibrator = Calibrator::with_profile(self.config.calibrator.clone(), profile);
            self.last_state = self.calibrator.state();
        }
        self.store = Some(store);
        Ok(self)
    }

    /// Processes one filled batch through every stage.
    ///
    /// Rotation happens in place, so the batch holds world-frame samples
    /// afterwards.
    pub fn process_batch(&mut self, batch: &mut SampleBatch) -> Result<BatchReport> {
        if batch.is_empty() {
            debug!("skipping empty batch {}", batch.sequence);
            return Ok(BatchReport {
                raw_label: ActivityLabel::Unknown,
                label: self.aggregator.current(),
                met: 1.0,
                calibration: None,
                rotated: false,
                features: None,
            });
        }
        let count = batch.len();

        // Stage 1: Statistics
        self.stats.assign(batch.samples(), count)?;

        // Stage 2: Calibration
        let outcome = self.calibrator.process(
            batch.start_ms(),
            self.stats.mean(),
            self.stats.population_sd(),
            self.stats.sum(),
            self.stats.sum_sqr(),
            count,
        )?;
        self.on_calibration(outcome)?;

        // Stage 3: Correction + Rotation
        let profile = self.calibrator.profile();
        let mut gravity = [0.0; AXES];
        for axis in 0..AXES {
            gravity[axis] = (self.stats.mean()[axis] - profile.offset[axis]) * profile.scale[axis];
        }
        if profile.calibrated {
            for sample in batch.samples_mut() {
                *sample = profile.correct(*sample);
            }
        }
        let rotated = rotation::rotate(&gravity, batch.samples_mut(), count);
        if !rotated {
            self.diagnostics
                .notify("unable to rotate batch: gravity vector is degenerate");
        }

        // Stage 4: Features + Classifier + Aggregator
        let features = if rotated {
            self.extractor.extract(batch.samples(), 0)?
        } else {
            None
        };
        let raw_label = self.raw_label(batch.charging, features.as_ref());
        let label = self.aggregator.add(raw_label);

        // Stage 5: Energy
        let met = self.energy.estimate(batch.samples(), batch.timestamps());

        // Stage 6: Records
        self.record(label, batch.start_ms(), batch.end_ms(), met)?;
        self.batches_processed += 1;

        Ok(BatchReport {
            raw_label,
            label,
            met,
            calibration: Some(outcome),
            rotated,
            features,
        })
    }

    fn raw_label(&self, charging: bool, features: Option<&FeatureVector>) -> ActivityLabel {
        if charging {
            return ActivityLabel::Charging;
        }
        if self.calibrator.is_uncarried() {
            return ActivityLabel::Uncarried;
        }
        if self.config.require_calibration && !self.calibrator.is_calibrated() {
            return ActivityLabel::Uncalibrated;
        }
        match features {
            Some(fv) => self.classifier.classify(fv),
            None => ActivityLabel::Unknown,
        }
    }

    fn on_calibration(&mut self, outcome: CalibrationOutcome) -> Result<()> {
        let state = self.calibrator.state();
        if state == CalibrationState::Calibrating && self.last_state != CalibrationState::Calibrating {
            self.diagnostics.notify("performing calibration");
        }
        if outcome.calibrated_now() {
            let gravity = self.calibrator.profile().gravity;
            self.diagnostics
                .notify(&format!("calibration complete, gravity {:.3} m/s²", gravity));
            self.persist_profile()?;
        }
        if let CalibrationOutcome::Skipped { .. } = outcome {
            self.diagnostics
                .notify("calibration skipped: measurement pool exhausted");
        }
        self.last_state = state;
        Ok(())
    }

    fn persist_profile(&mut self) -> Result<()> {
        let profile = self.calibrator.profile().clone();
        if let Some(store) = self.store.as_mut() {
            if let Err(e) = store.save_profile(&profile) {
                return self.absorb(e, "unable to save calibration profile");
            }
        }
        Ok(())
    }

    /// Extend the running record or close it and open a new one.
    fn record(&mut self, label: ActivityLabel, start_ms: u64, end_ms: u64, met: f64) -> Result<()> {
        if let Some(current) = self.current.as_mut() {
            if current.label == label {
                if start_ms < current.end_ms {
                    warn!(
                        "batch starting at {} ms overlaps record ending at {} ms",
                        start_ms, current.end_ms
                    );
                }
                current.extend(end_ms, met);
                return Ok(());
            }
        }
        let start_ms = match &self.current {
            Some(previous) => start_ms.max(previous.end_ms),
            None => start_ms,
        };
        let next = Classification::new(label, start_ms, end_ms.max(start_ms), met);
        if let Some(closed) = self.current.replace(next) {
            self.emit(&closed)?;
        }
        Ok(())
    }

    fn emit(&mut self, record: &Classification) -> Result<()> {
        debug!(
            "closing {} record: {} batches, {} ms, average MET {:.2}",
            record.label,
            record.batch_count,
            record.duration_ms(),
            record.average_met()
        );
        match self.sink.emit(record) {
            Ok(()) => Ok(()),
            Err(e) => self.absorb(e, "unable to emit classification"),
        }
    }

    /// Report a non-fatal error as a diagnostic; propagate a fatal one.
    fn absorb(&self, error: SensingError, what: &str) -> Result<()> {
        if error.is_fatal() {
            return Err(error);
        }
        warn!("{}: {}", what, error);
        self.diagnostics.notify(&format!("{}: {}", what, error));
        Ok(())
    }

    /// Close and emit the running record. Call when input ends.
    pub fn finish(&mut self) -> Result<Option<Classification>> {
        match self.current.take() {
            Some(record) => {
                self.emit(&record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Calibrate from the next confirmed stationary batch.
    pub fn force_calibration(&mut self) {
        self.calibrator.force_calibration();
    }

    pub fn snapshot(&self) -> CalibrationSnapshot {
        self.calibrator.snapshot()
    }

    /// Number of calibration periods started, automatic or forced.
    pub fn calibration_attempts(&self) -> u32 {
        self.calibrator.attempts()
    }

    pub fn current_label(&self) -> ActivityLabel {
        self.aggregator.current()
    }

    pub fn current_record(&self) -> Option<&Classification> {
        self.current.as_ref()
    }

    pub fn batches_processed(&self) -> u64 {
        self.batches_processed
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
