//! Energy expenditure (MET) from accelerometer activity counts.
//!
//! Counts are band-limited zero crossings of the DC-removed, 4× down-sampled
//! signal on each world-frame axis. Counts per minute feed an empirical
//! activity energy model `a·H^p1 + b·V^p2` (kcal/min), where `H` combines the
//! two horizontal axes and `V` is the vertical axis. MET is activity plus
//! resting expenditure over resting expenditure, with resting expenditure
//! from the revised Harris–Benedict equations.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SensingError};
use crate::types::{Vec3, AXES};

/// Samples averaged together before counting.
pub const DOWNSAMPLE: usize = 4;

/// Crossings with a post-crossing amplitude outside `[LOW_BAND, HIGH_BAND]`
/// (m/s²) are treated as noise or impacts and not counted.
pub const LOW_BAND: f64 = 0.1;
pub const HIGH_BAND: f64 = 30.0;

/// Reference height for the count coefficients (cm).
const REFERENCE_HEIGHT_CM: f64 = 170.0;
/// Horizontal and vertical count coefficients per kg at the reference height.
const HORIZONTAL_COEFF_PER_KG: f64 = 0.6e-4;
const VERTICAL_COEFF_PER_KG: f64 = 1.0e-4;
const HORIZONTAL_EXPONENT: f64 = 0.95;
const VERTICAL_EXPONENT: f64 = 1.05;

const MINUTES_PER_DAY: f64 = 1440.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    #[default]
    Male,
    Female,
}

/// Body parameters of the person carrying the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyProfile {
    pub mass_kg: f64,
    pub height_cm: f64,
    pub age_years: f64,
    pub gender: Gender,
}

impl Default for BodyProfile {
    fn default() -> Self {
        Self {
            mass_kg: 70.0,
            height_cm: 175.0,
            age_years: 35.0,
            gender: Gender::Male,
        }
    }
}

impl BodyProfile {
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.mass_kg) || !positive(self.height_cm) || !positive(self.age_years) {
            return Err(SensingError::invalid_config(format!(
                "body profile values must be positive: {:?}",
                self
            )));
        }
        Ok(())
    }

    /// Revised Harris–Benedict basal metabolic rate, kcal/day.
    pub fn basal_kcal_per_day(&self) -> f64 {
        match self.gender {
            Gender::Male => {
                88.362 + 13.397 * self.mass_kg + 4.799 * self.height_cm - 5.677 * self.age_years
            }
            Gender::Female => {
                447.593 + 9.247 * self.mass_kg + 3.098 * self.height_cm - 4.330 * self.age_years
            }
        }
    }
}

/// MET estimator with coefficients fixed at construction.
#[derive(Debug, Clone)]
pub struct EnergyEstimator {
    horizontal_coeff: f64,
    vertical_coeff: f64,
    resting_ee: f64,
    downsampled: Vec<f64>,
}

impl EnergyEstimator {
    pub fn new(body: &BodyProfile) -> Result<Self> {
        body.validate()?;
        let height_factor = body.height_cm / REFERENCE_HEIGHT_CM;
        let resting_ee = body.basal_kcal_per_day() / MINUTES_PER_DAY;
        if !(resting_ee > 0.0) {
            return Err(SensingError::invalid_config(
                "body profile yields a non-positive resting expenditure",
            ));
        }
        Ok(Self {
            horizontal_coeff: body.mass_kg * HORIZONTAL_COEFF_PER_KG * height_factor,
            vertical_coeff: body.mass_kg * VERTICAL_COEFF_PER_KG * height_factor,
            resting_ee,
            downsampled: Vec::new(),
        })
    }

    /// Resting energy expenditure, kcal/min.
    pub fn resting_ee(&self) -> f64 {
        self.resting_ee
    }

    /// Band-limited zero crossings per second on each axis.
    ///
    /// Returns zeros when the batch is too short to down-sample or spans no
    /// time.
    pub fn counts_per_second(&mut self, samples: &[Vec3], timestamps: &[u64]) -> [f64; AXES] {
        let n = samples.len().min(timestamps.len());
        let groups = n / DOWNSAMPLE;
        let mut counts = [0.0; AXES];
        if groups < 2 {
            return counts;
        }
        let duration_s = timestamps[n - 1].saturating_sub(timestamps[0]) as f64 / 1000.0;
        if duration_s <= 0.0 {
            return counts;
        }

        for (axis, count) in counts.iter_mut().enumerate() {
            let mean = samples[..n].iter().map(|s| s[axis] as f64).sum::<f64>() / n as f64;
            self.downsampled.clear();
            for group in samples[..groups * DOWNSAMPLE].chunks_exact(DOWNSAMPLE) {
                let avg = group.iter().map(|s| s[axis] as f64 - mean).sum::<f64>()
                    / DOWNSAMPLE as f64;
                self.downsampled.push(avg);
            }
            let crossings = self
                .downsampled
                .windows(2)
                .filter(|w| {
                    let amplitude = w[1].abs();
                    (w[0] < 0.0) != (w[1] < 0.0) && (LOW_BAND..=HIGH_BAND).contains(&amplitude)
                })
                .count();
            *count = crossings as f64 / duration_s;
        }
        counts
    }

    pub fn counts_per_minute(&mut self, samples: &[Vec3], timestamps: &[u64]) -> [f64; AXES] {
        let mut counts = self.counts_per_second(samples, timestamps);
        for c in counts.iter_mut() {
            *c *= 60.0;
        }
        counts
    }

    /// Activity energy expenditure (kcal/min) from counts per minute.
    pub fn ee_act(&self, counts: &[f64; AXES]) -> f64 {
        let horizontal = (counts[0] * counts[0] + counts[1] * counts[1]).sqrt();
        let vertical = counts[2].max(0.0);
        self.horizontal_coeff * horizontal.powf(HORIZONTAL_EXPONENT)
            + self.vertical_coeff * vertical.powf(VERTICAL_EXPONENT)
    }

    pub fn met(&self, ee_act: f64) -> f64 {
        (ee_act + self.resting_ee) / self.resting_ee
    }

    /// MET for one rotated batch.
    pub fn estimate(&mut self, samples: &[Vec3], timestamps: &[u64]) -> f64 {
        let counts = self.counts_per_minute(samples, timestamps);
        self.met(self.ee_act(&counts))
    }
}
