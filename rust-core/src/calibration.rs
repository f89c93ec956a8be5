//! Stationary-period detection and accelerometer calibration.
//!
//! The calibrator watches per-batch statistics. Batches whose standard
//! deviation stays below a motion threshold are "stationary" and are retained
//! as [`Measurement`]s in a bounded pool. Once a movement-consistent run of
//! stationary batches spans long enough, the retained sums are pooled into a
//! new [`CalibrationProfile`]: per-axis mean and sd, and a gravity magnitude.
//!
//! A second, longer stationary threshold marks the device as *uncarried*
//! (left on a table, in a drawer). Motion clears it.
//!
//! State machine:
//!
//! ```text
//!   Uncalibrated ──stationary──▶ Calibrating ──long enough──▶ Calibrated
//!        ▲                            │
//!        └───────────motion───────────┘
//! ```
//!
//! The calibrator is owned by the processing thread. Other threads only see
//! [`CalibrationSnapshot`] copies.

use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pool::{Take, TwoWayPool};
use crate::stats::{guard_variance, magnitude};
use crate::types::{
    CalibrationProfile, CalibrationSnapshot, CalibrationState, Measurement, Orientation, AXES,
    STANDARD_GRAVITY,
};

/// Parameters for stationary detection and calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Minimum per-axis standard deviation used as the motion baseline (m/s²).
    /// Typical phone accelerometer noise floor.
    pub base_deviation: f64,
    /// Multiples of the baseline sd tolerated before a batch counts as motion.
    pub allowed_multiples_of_sd: f64,
    /// Stationary span required before calibrating (ms).
    pub calibration_duration_ms: u64,
    /// Stationary span after which the device is considered uncarried (ms).
    pub uncarried_duration_ms: u64,
    /// Number of stationary measurements that can be retained.
    pub measurement_capacity: usize,
    /// Recalibrate once per stationary period even after a first calibration.
    pub recalibrate_when_stationary: bool,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            base_deviation: 0.1,               // m/s², phone noise floor
            allowed_multiples_of_sd: 3.0,
            calibration_duration_ms: 5_000,    // 5 s of stillness
            uncarried_duration_ms: 300_000,    // 5 min on a surface
            measurement_capacity: 256,         // covers the 600 s trim horizon at 2.56 s batches
            recalibrate_when_stationary: false,
        }
    }
}

/// What the calibrator concluded about one batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    /// The batch was in motion and discarded; the stationary window was reset.
    Motion,
    /// The batch was stationary and retained.
    Stationary {
        /// Span of the current stationary window (ms).
        stationary_ms: u64,
        /// Calibration completed on this batch.
        calibrated_now: bool,
        /// The device is considered uncarried.
        uncarried: bool,
    },
    /// The batch was stationary but no measurement slot could be recycled,
    /// so it was not retained and calibration was not attempted this cycle.
    Skipped {
        /// Span of the retained stationary window (ms).
        stationary_ms: u64,
    },
}

impl CalibrationOutcome {
    pub fn is_stationary(&self) -> bool {
        !matches!(self, CalibrationOutcome::Motion)
    }

    pub fn calibrated_now(&self) -> bool {
        matches!(
            self,
            CalibrationOutcome::Stationary {
                calibrated_now: true,
                ..
            }
        )
    }
}

/// One-shot manual calibration request.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ForcedCalibration {
    Off,
    /// Waiting for a first stationary batch.
    Armed,
    /// A first stationary batch was seen; the next one confirms.
    Confirming { mean: [f64; AXES] },
}

/// Calibration state machine.
#[derive(Debug)]
pub struct Calibrator {
    config: CalibratorConfig,
    profile: CalibrationProfile,
    state: CalibrationState,
    uncarried: bool,
    /// Per-axis sd from the last calibration, used to widen the motion threshold.
    reset_sd: [f64; AXES],
    measurements: TwoWayPool<Measurement>,
    forced: ForcedCalibration,
    calibrated_this_period: bool,
    /// Time of the first batch of the current stationary period.
    period_start_ms: Option<u64>,
    stationary_ms: u64,
    attempts: u32,
}

impl Calibrator {
    /// Create an uncalibrated calibrator.
    pub fn new(config: CalibratorConfig) -> Self {
        let profile = CalibrationProfile::new(config.allowed_multiples_of_sd);
        Self::with_profile(config, profile)
    }

    /// Resume from a persisted profile.
    pub fn with_profile(config: CalibratorConfig, profile: CalibrationProfile) -> Self {
        let measurements = TwoWayPool::new(
            "measurements",
            config.measurement_capacity.max(1),
            Measurement::default,
        );
        let (state, reset_sd) = if profile.calibrated {
            (CalibrationState::Calibrated, profile.sd)
        } else {
            (CalibrationState::Uncalibrated, [0.0; AXES])
        };
        Self {
            config,
            profile,
            state,
            uncarried: false,
            reset_sd,
            measurements,
            forced: ForcedCalibration::Off,
            calibrated_this_period: false,
            period_start_ms: None,
            stationary_ms: 0,
            attempts: 0,
        }
    }

    pub fn state(&self) -> CalibrationState {
        self.state
    }

    pub fn is_calibrated(&self) -> bool {
        self.profile.calibrated
    }

    pub fn is_uncarried(&self) -> bool {
        self.uncarried
    }

    pub fn profile(&self) -> &CalibrationProfile {
        &self.profile
    }

    /// Number of calibration periods started (automatic or forced).
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of stationary measurements currently retained.
    pub fn retained(&self) -> usize {
        self.measurements.pending_filled_count()
    }

    /// Immutable copy for readers on other threads.
    pub fn snapshot(&self) -> CalibrationSnapshot {
        CalibrationSnapshot {
            profile: self.profile.clone(),
            state: self.state,
            uncarried: self.uncarried,
            stationary_ms: self.stationary_ms,
        }
    }

    /// Calibrate from the next confirmed stationary batch, skipping the
    /// duration requirement.
    pub fn force_calibration(&mut self) {
        info!("forced calibration armed");
        self.forced = ForcedCalibration::Armed;
        self.attempts += 1;
    }

    pub fn is_forcing(&self) -> bool {
        self.forced != ForcedCalibration::Off
    }

    /// Per-axis motion threshold.
    fn threshold(&self, axis: usize) -> f64 {
        self.config.base_deviation.max(self.reset_sd[axis]) * self.profile.allowed_multiples_of_sd
    }

    /// Feed the statistics of one batch.
    pub fn process(
        &mut self,
        sample_time_ms: u64,
        mean: &[f64; AXES],
        sd: &[f64; AXES],
        sum: &[f64; AXES],
        sum_sqr: &[f64; AXES],
        count: usize,
    ) -> Result<CalibrationOutcome> {
        if (0..AXES).any(|axis| sd[axis] > self.threshold(axis)) {
            self.on_motion();
            return Ok(CalibrationOutcome::Motion);
        }

        if let Some(outcome) = self.process_forced(mean, sd, sum, sum_sqr, count)? {
            return Ok(outcome);
        }

        if self.evict_inconsistent(mean) > 0 {
            // The period restarts at the oldest measurement that still agrees.
            self.period_start_ms = self.measurements.peek_filled(|oldest| oldest.time_ms);
        }
        self.trim(sample_time_ms);

        let slot = match self.measurements.take_empty(Duration::ZERO) {
            Take::Exhausted => {
                // Full: the retained window slides and the period keeps its start.
                debug!("measurement pool full, recycling the oldest measurement");
                self.recycle_oldest();
                self.measurements.take_empty(Duration::ZERO)
            }
            other => other,
        };
        let retained = match slot {
            Take::Item(mut m) => {
                m.assign(sample_time_ms, *mean, *sd, *sum, *sum_sqr, count);
                self.measurements.return_filled(m)?;
                true
            }
            Take::Exhausted | Take::Cancelled => {
                warn!(
                    "measurement pool exhausted ({} retained); skipping calibration bookkeeping",
                    self.measurements.pending_filled_count()
                );
                false
            }
        };

        let period_start = *self.period_start_ms.get_or_insert(sample_time_ms);
        self.stationary_ms = sample_time_ms.saturating_sub(period_start);
        self.update_uncarried();

        if !retained {
            return Ok(CalibrationOutcome::Skipped {
                stationary_ms: self.stationary_ms,
            });
        }

        if self.state == CalibrationState::Uncalibrated {
            self.state = CalibrationState::Calibrating;
            self.attempts += 1;
            debug!("stationary period started, calibrating");
        }

        let wants_calibration = !self.profile.calibrated
            || (self.config.recalibrate_when_stationary && !self.calibrated_this_period);
        let mut calibrated_now = false;
        if wants_calibration && self.stationary_ms >= self.config.calibration_duration_ms {
            self.calibrate_from_retained()?;
            calibrated_now = true;
        }

        Ok(CalibrationOutcome::Stationary {
            stationary_ms: self.stationary_ms,
            calibrated_now,
            uncarried: self.uncarried,
        })
    }

    fn on_motion(&mut self) {
        let dropped = self.measurements.drain_filled_to_empty();
        if dropped > 0 {
            debug!("motion detected, discarded {} stationary measurements", dropped);
        }
        if self.uncarried {
            info!("device picked up, no longer uncarried");
        }
        self.uncarried = false;
        self.period_start_ms = None;
        self.stationary_ms = 0;
        self.calibrated_this_period = false;
        if let ForcedCalibration::Confirming { .. } = self.forced {
            self.forced = ForcedCalibration::Armed;
        }
        if self.state == CalibrationState::Calibrating {
            self.state = if self.profile.calibrated {
                CalibrationState::Calibrated
            } else {
                CalibrationState::Uncalibrated
            };
        }
    }

    /// Handle a pending forced calibration. Returns an outcome when the batch
    /// was consumed by it.
    fn process_forced(
        &mut self,
        mean: &[f64; AXES],
        sd: &[f64; AXES],
        sum: &[f64; AXES],
        sum_sqr: &[f64; AXES],
        count: usize,
    ) -> Result<Option<CalibrationOutcome>> {
        match self.forced {
            ForcedCalibration::Off => Ok(None),
            ForcedCalibration::Armed => {
                self.forced = ForcedCalibration::Confirming { mean: *mean };
                self.state = CalibrationState::Calibrating;
                Ok(None)
            }
            ForcedCalibration::Confirming { mean: first } => {
                if (0..AXES).any(|axis| (mean[axis] - first[axis]).abs() > self.threshold(axis)) {
                    // Moved between the two batches: this one becomes the first.
                    self.forced = ForcedCalibration::Confirming { mean: *mean };
                    return Ok(None);
                }
                self.apply_calibration(*sum, *sum_sqr, count, true)?;
                for axis in 0..AXES {
                    self.profile.sd[axis] = sd[axis];
                    self.reset_sd[axis] = sd[axis];
                }
                self.forced = ForcedCalibration::Off;
                Ok(Some(CalibrationOutcome::Stationary {
                    stationary_ms: self.stationary_ms,
                    calibrated_now: true,
                    uncarried: self.uncarried,
                }))
            }
        }
    }

    /// Drop retained measurements from the front until the oldest one agrees
    /// with `mean` within the motion threshold. Returns how many were dropped.
    fn evict_inconsistent(&mut self, mean: &[f64; AXES]) -> usize {
        let mut evicted = 0;
        loop {
            let moved = self.measurements.peek_filled(|oldest| {
                (0..AXES).any(|axis| (mean[axis] - oldest.mean[axis]).abs() > self.threshold(axis))
            });
            if moved != Some(true) {
                return evicted;
            }
            self.recycle_oldest();
            evicted += 1;
        }
    }

    /// Drop measurements older than twice the longest duration threshold.
    fn trim(&mut self, sample_time_ms: u64) {
        let horizon = 2 * self
            .config
            .calibration_duration_ms
            .max(self.config.uncarried_duration_ms);
        while self
            .measurements
            .peek_filled(|oldest| sample_time_ms.saturating_sub(oldest.time_ms) > horizon)
            == Some(true)
        {
            self.recycle_oldest();
        }
    }

    fn recycle_oldest(&mut self) {
        if let Some(m) = self.measurements.try_take_filled() {
            // The item was just taken from this pool, so the return cannot fail.
            let _ = self.measurements.return_empty(m);
        }
    }

    fn update_uncarried(&mut self) {
        if !self.uncarried && self.stationary_ms >= self.config.uncarried_duration_ms {
            info!("stationary for {} ms, device uncarried", self.stationary_ms);
            self.uncarried = true;
        }
    }

    /// Pool every retained measurement into a new profile.
    fn calibrate_from_retained(&mut self) -> Result<()> {
        let mut sum = [0.0; AXES];
        let mut sum_sqr = [0.0; AXES];
        let mut count = 0usize;
        self.measurements.for_each_filled(|m| {
            for axis in 0..AXES {
                sum[axis] += m.sum[axis];
                sum_sqr[axis] += m.sum_sqr[axis];
            }
            count += m.count;
        });
        self.apply_calibration(sum, sum_sqr, count, false)?;
        self.reset_sd = self.profile.sd;
        Ok(())
    }

    fn apply_calibration(
        &mut self,
        sum: [f64; AXES],
        sum_sqr: [f64; AXES],
        count: usize,
        forced: bool,
    ) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let n = count as f64;
        let mut mean = [0.0; AXES];
        let mut sd = [0.0; AXES];
        for axis in 0..AXES {
            mean[axis] = sum[axis] / n;
            let variance = guard_variance("calibration", axis, sum_sqr[axis] / n - mean[axis] * mean[axis])?;
            let root = variance.sqrt();
            sd[axis] = if root.is_nan() { 0.0 } else { root };
        }

        let gravity = magnitude(&mean);
        self.profile.mean = mean;
        self.profile.sd = sd;
        self.profile.gravity = gravity;
        self.profile.count = count;
        self.profile.calibrated = true;
        self.profile.orientation = orientation_of(&mean, gravity);
        self.profile.offset = [0.0; AXES];
        let scale = if gravity > 0.0 { STANDARD_GRAVITY / gravity } else { 1.0 };
        self.profile.scale = [scale; AXES];

        self.state = CalibrationState::Calibrated;
        self.calibrated_this_period = true;
        info!(
            "calibrated{}: gravity {:.3} m/s² from {} samples, sd {:?}, orientation {:?}",
            if forced { " (forced)" } else { "" },
            gravity,
            count,
            sd,
            self.profile.orientation
        );
        Ok(())
    }
}

/// Phone standing on an edge when the Z mean is within ±gravity/2 of zero.
fn orientation_of(mean: &[f64; AXES], gravity: f64) -> Orientation {
    if mean[2].abs() < gravity / 2.0 {
        Orientation::VerticalZ
    } else {
        Orientation::FlatXy
    }
}
