//! Feature extraction from world-frame sample windows.
//!
//! The horizontal axes are merged into one orientation-free magnitude
//! `sqrt(x² + y²)`; the vertical axis is kept as is. Range, mean and standard
//! deviation of both series, plus an optional spectral peak feature per
//! series, make up the 8-element [`FeatureVector`].

use serde::{Deserialize, Serialize};

use crate::error::{Result, SensingError};
use crate::fft::Fft;
use crate::stats::Statistics;
use crate::types::{FeatureVector, Vec3, FEATURE_COUNT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Samples per feature window. Must be a power of two with FFT enabled.
    pub window: usize,
    /// Compute the two spectral features; zero when disabled.
    pub fft_enabled: bool,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window: 128,
            fft_enabled: true,
        }
    }
}

/// Reduces a rotated window to a [`FeatureVector`].
#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    window: usize,
    fft: Option<Fft>,
    stats: Statistics<2>,
    merged: Vec<[f64; 2]>,
    real: Vec<f64>,
    imag: Vec<f64>,
}

impl FeatureExtractor {
    /// Create an extractor for windows of `window` samples.
    ///
    /// With `fft_enabled` the window must be a power of two.
    pub fn new(window: usize, fft_enabled: bool) -> Result<Self> {
        if window == 0 {
            return Err(SensingError::invalid_config("feature window must be > 0"));
        }
        let fft = if fft_enabled {
            Some(Fft::new(window)?)
        } else {
            None
        };
        Ok(Self {
            window,
            fft,
            stats: Statistics::new(),
            merged: vec![[0.0; 2]; window],
            real: vec![0.0; window],
            imag: vec![0.0; window],
        })
    }

    pub fn from_config(config: &FeatureConfig) -> Result<Self> {
        Self::new(config.window, config.fft_enabled)
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn fft_enabled(&self) -> bool {
        self.fft.is_some()
    }

    /// Extract features from `rotated[window_start..window_start + window]`.
    ///
    /// Returns `Ok(None)` if the window runs past the available samples.
    pub fn extract(&mut self, rotated: &[Vec3], window_start: usize) -> Result<Option<FeatureVector>> {
        let end = match window_start.checked_add(self.window) {
            Some(end) if end <= rotated.len() => end,
            _ => return Ok(None),
        };

        for (slot, s) in self.merged.iter_mut().zip(&rotated[window_start..end]) {
            let x = s[0] as f64;
            let y = s[1] as f64;
            *slot = [(x * x + y * y).sqrt(), s[2] as f64];
        }
        self.stats.assign(&self.merged, self.window)?;

        let range = self.stats.range();
        let mean = *self.stats.mean();
        let sd = *self.stats.population_sd();

        let mut freq = [0.0; 2];
        if let Some(fft) = &self.fft {
            for (axis, slot) in freq.iter_mut().enumerate() {
                for (i, m) in self.merged.iter().enumerate() {
                    self.real[i] = m[axis];
                    self.imag[i] = 0.0;
                }
                let spectrum = fft.transform(&mut self.real, &mut self.imag)?;
                *slot = peak_over_mean(&spectrum);
            }
        }

        let mut values = [0.0; FEATURE_COUNT];
        values[FeatureVector::HORIZONTAL_RANGE] = range[0];
        values[FeatureVector::VERTICAL_RANGE] = range[1];
        values[FeatureVector::HORIZONTAL_MEAN] = mean[0];
        values[FeatureVector::VERTICAL_MEAN] = mean[1];
        values[FeatureVector::HORIZONTAL_SD] = sd[0];
        values[FeatureVector::VERTICAL_SD] = sd[1];
        values[FeatureVector::HORIZONTAL_FREQ] = freq[0];
        values[FeatureVector::VERTICAL_FREQ] = freq[1];
        Ok(Some(FeatureVector::new(values)))
    }
}

/// `max(spectrum) - mean(spectrum)`, or 0 for an empty spectrum.
fn peak_over_mean(spectrum: &[f64]) -> f64 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let max = spectrum.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mean = spectrum.iter().sum::<f64>() / spectrum.len() as f64;
    max - mean
}
