//! Core data types for the activity sensing engine.
//!
//! This module defines the data model shared by every pipeline stage:
//! raw sample batches, calibration measurements and profiles, feature
//! vectors, the closed set of activity labels, and the classification
//! records handed to the sink.
//!
//! Design principle: Types should make intent obvious. If a concept exists,
//! it gets a type. Never pass raw tuples or untyped collections across boundaries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Number of accelerometer axes.
pub const AXES: usize = 3;

/// Number of features in a [`FeatureVector`].
pub const FEATURE_COUNT: usize = 8;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.81;

/// A single triaxial accelerometer reading [x, y, z] in m/s².
pub type Vec3 = [f32; AXES];

// ============================================================================
// SAMPLE BATCH
// ============================================================================

/// A fixed-capacity batch of consecutive accelerometer samples.
///
/// Batches are allocated once and recycled through a
/// [`TwoWayPool`](crate::pool::TwoWayPool). Whoever holds the batch owns it
/// exclusively: the sampler while filling, the processor while consuming.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    samples: Vec<Vec3>,
    timestamps_ms: Vec<u64>,
    size: usize,
    /// Whether the device was charging when the batch was delivered.
    pub charging: bool,
    /// Monotonic sequence number assigned by the sampler side.
    pub sequence: u64,
}

impl SampleBatch {
    /// Create an empty batch able to hold `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![[0.0; AXES]; capacity],
            timestamps_ms: vec![0; capacity],
            size: 0,
            charging: false,
            sequence: 0,
        }
    }

    /// Maximum number of samples.
    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    /// Logical number of samples currently held.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.samples.len()
    }

    /// Reset the logical size so the batch can be refilled.
    pub fn clear(&mut self) {
        self.size = 0;
        self.charging = false;
    }

    /// Append a sample. Returns false when the batch is already full.
    pub fn push(&mut self, timestamp_ms: u64, sample: Vec3) -> bool {
        if self.is_full() {
            return false;
        }
        self.samples[self.size] = sample;
        self.timestamps_ms[self.size] = timestamp_ms;
        self.size += 1;
        true
    }

    /// Fill the batch from a single start time and a fixed inter-sample period.
    pub fn fill_uniform(&mut self, start_ms: u64, period_ms: u64, samples: &[Vec3]) {
        self.clear();
        for (i, s) in samples.iter().enumerate() {
            if !self.push(start_ms + i as u64 * period_ms, *s) {
                break;
            }
        }
    }

    /// The valid samples.
    pub fn samples(&self) -> &[Vec3] {
        &self.samples[..self.size]
    }

    /// The valid samples, mutable (rotation works in place).
    pub fn samples_mut(&mut self) -> &mut [Vec3] {
        &mut self.samples[..self.size]
    }

    /// The per-sample timestamps of the valid samples.
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps_ms[..self.size]
    }

    /// Timestamp of the first sample, or 0 for an empty batch.
    pub fn start_ms(&self) -> u64 {
        self.timestamps().first().copied().unwrap_or(0)
    }

    /// Timestamp of the last sample, or 0 for an empty batch.
    pub fn end_ms(&self) -> u64 {
        self.timestamps().last().copied().unwrap_or(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms().saturating_sub(self.start_ms())
    }
}

// ============================================================================
// CALIBRATION TYPES
// ============================================================================

/// Statistics of one stationary batch, retained by the calibrator.
///
/// Pooled and reused like [`SampleBatch`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Measurement {
    /// Time of the batch in milliseconds.
    pub time_ms: u64,
    pub sum: [f64; AXES],
    pub sum_sqr: [f64; AXES],
    pub mean: [f64; AXES],
    pub sd: [f64; AXES],
    pub count: usize,
}

impl Measurement {
    /// Overwrite this measurement in place.
    pub fn assign(
        &mut self,
        time_ms: u64,
        mean: [f64; AXES],
        sd: [f64; AXES],
        sum: [f64; AXES],
        sum_sqr: [f64; AXES],
        count: usize,
    ) {
        self.time_ms = time_ms;
        self.mean = mean;
        self.sd = sd;
        self.sum = sum;
        self.sum_sqr = sum_sqr;
        self.count = count;
    }
}

/// Which axis group a calibration phase observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Orientation {
    /// Phone lying flat: gravity on Z, X and Y measured at rest.
    #[default]
    FlatXy,
    /// Phone standing on an edge: Z measured at rest.
    VerticalZ,
}

/// Lifecycle of the calibrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CalibrationState {
    /// No calibration has completed.
    #[default]
    Uncalibrated,
    /// A stationary window is accumulating.
    Calibrating,
    /// Calibration has completed at least once.
    Calibrated,
}

/// Persistent calibration parameters.
///
/// Mutated only by the calibrator. Readers receive a
/// [`CalibrationSnapshot`]; the configuration store persists this struct on
/// state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub mean: [f64; AXES],
    pub sd: [f64; AXES],
    pub offset: [f64; AXES],
    pub scale: [f64; AXES],
    /// Euclidean norm of `mean` when calibration completed.
    pub gravity: f64,
    pub count: usize,
    /// Motion sensitivity: multiples of sd tolerated before a batch counts as motion.
    pub allowed_multiples_of_sd: f64,
    pub calibrated: bool,
    /// Axis group of the latest calibration.
    pub orientation: Orientation,
}

impl CalibrationProfile {
    pub fn new(allowed_multiples_of_sd: f64) -> Self {
        Self {
            mean: [0.0; AXES],
            sd: [0.0; AXES],
            offset: [0.0; AXES],
            scale: [1.0; AXES],
            gravity: STANDARD_GRAVITY,
            count: 0,
            allowed_multiples_of_sd,
            calibrated: false,
            orientation: Orientation::FlatXy,
        }
    }

    /// Apply offset and scale to a raw sample.
    pub fn correct(&self, raw: Vec3) -> Vec3 {
        let mut out = [0.0f32; AXES];
        for axis in 0..AXES {
            out[axis] = ((raw[axis] as f64 - self.offset[axis]) * self.scale[axis]) as f32;
        }
        out
    }
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self::new(3.0)
    }
}

/// Immutable copy of calibrator state handed to other threads.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSnapshot {
    pub profile: CalibrationProfile,
    pub state: CalibrationState,
    pub uncarried: bool,
    /// Duration of the current stationary period in milliseconds.
    pub stationary_ms: u64,
}

impl Default for CalibrationSnapshot {
    fn default() -> Self {
        Self {
            profile: CalibrationProfile::default(),
            state: CalibrationState::Uncalibrated,
            uncarried: false,
            stationary_ms: 0,
        }
    }
}

// ============================================================================
// FEATURES AND LABELS
// ============================================================================

/// Fixed 8-element feature vector computed from a rotated window.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeatureVector(pub [f64; FEATURE_COUNT]);

impl FeatureVector {
    pub const HORIZONTAL_RANGE: usize = 0;
    pub const VERTICAL_RANGE: usize = 1;
    pub const HORIZONTAL_MEAN: usize = 2;
    pub const VERTICAL_MEAN: usize = 3;
    pub const HORIZONTAL_SD: usize = 4;
    pub const VERTICAL_SD: usize = 5;
    pub const HORIZONTAL_FREQ: usize = 6;
    pub const VERTICAL_FREQ: usize = 7;

    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[f64; FEATURE_COUNT] {
        &self.0
    }

    pub fn horizontal_range(&self) -> f64 {
        self.0[Self::HORIZONTAL_RANGE]
    }

    pub fn vertical_range(&self) -> f64 {
        self.0[Self::VERTICAL_RANGE]
    }

    pub fn vertical_mean(&self) -> f64 {
        self.0[Self::VERTICAL_MEAN]
    }

    /// Whether every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }
}

/// The closed set of activity identifiers.
///
/// Model files and sinks use the upper-case identifiers returned by
/// [`ActivityLabel::as_str`]. Any other string is rejected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityLabel {
    /// Calibration has not completed yet.
    Uncalibrated,
    /// No confident label.
    #[default]
    Unknown,
    /// Processing has not produced anything yet.
    Idle,
    /// Device is on charge.
    Charging,
    /// Device is not on the user's body.
    Uncarried,
    Stationary,
    Walking,
    Running,
    Cycling,
    /// Riding in a vehicle.
    Travelling,
    /// Processing failed for this batch.
    Error,
}

impl ActivityLabel {
    /// Every label, in declaration order.
    pub const ALL: [ActivityLabel; 11] = [
        ActivityLabel::Uncalibrated,
        ActivityLabel::Unknown,
        ActivityLabel::Idle,
        ActivityLabel::Charging,
        ActivityLabel::Uncarried,
        ActivityLabel::Stationary,
        ActivityLabel::Walking,
        ActivityLabel::Running,
        ActivityLabel::Cycling,
        ActivityLabel::Travelling,
        ActivityLabel::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityLabel::Uncalibrated => "UNCALIBRATED",
            ActivityLabel::Unknown => "UNKNOWN",
            ActivityLabel::Idle => "IDLE",
            ActivityLabel::Charging => "CHARGING",
            ActivityLabel::Uncarried => "UNCARRIED",
            ActivityLabel::Stationary => "STATIONARY",
            ActivityLabel::Walking => "WALKING",
            ActivityLabel::Running => "RUNNING",
            ActivityLabel::Cycling => "CYCLING",
            ActivityLabel::Travelling => "TRAVELLING",
            ActivityLabel::Error => "ERROR",
        }
    }

    /// Pseudo-labels produced by the system rather than by a classifier.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            ActivityLabel::Uncalibrated
                | ActivityLabel::Unknown
                | ActivityLabel::Idle
                | ActivityLabel::Error
        )
    }
}

impl fmt::Display for ActivityLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string is not one of the known activity identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecognizedLabel(pub String);

impl FromStr for ActivityLabel {
    type Err = UnrecognizedLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ActivityLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnrecognizedLabel(s.to_string()))
    }
}

// ============================================================================
// CLASSIFICATION RECORDS
// ============================================================================

/// A run of consecutive batches sharing one label.
///
/// Created and extended by the pipeline; emitted to the sink when the label
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub label: ActivityLabel,
    pub start_ms: u64,
    pub end_ms: u64,
    pub batch_count: u32,
    /// Sum of per-batch MET values.
    pub met_total: f64,
}

impl Classification {
    pub fn new(label: ActivityLabel, start_ms: u64, end_ms: u64, met: f64) -> Self {
        Self {
            label,
            start_ms,
            end_ms,
            batch_count: 1,
            met_total: met,
        }
    }

    /// Extend with another batch. Timestamps never move backwards.
    pub fn extend(&mut self, end_ms: u64, met: f64) {
        self.end_ms = self.end_ms.max(end_ms);
        self.batch_count += 1;
        self.met_total += met;
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_ms.saturating_sub(self.start_ms)
    }

    /// Average MET over the batches of this record.
    pub fn average_met(&self) -> f64 {
        if self.batch_count == 0 {
            0.0
        } else {
            self.met_total / self.batch_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_push_and_capacity() {
        let mut batch = SampleBatch::new(3);
        assert!(batch.is_empty());
        assert!(batch.push(0, [1.0, 0.0, 0.0]));
        assert!(batch.push(20, [0.0, 1.0, 0.0]));
        assert!(batch.push(40, [0.0, 0.0, 1.0]));
        assert!(!batch.push(60, [9.0, 9.0, 9.0]));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.duration_ms(), 40);
        assert_eq!(batch.samples()[2], [0.0, 0.0, 1.0]);

        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.capacity(), 3);
    }

    #[test]
    fn test_fill_uniform_truncates() {
        let mut batch = SampleBatch::new(2);
        batch.fill_uniform(100, 10, &[[1.0; 3], [2.0; 3], [3.0; 3]]);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.timestamps(), &[100, 110]);
    }

    #[test]
    fn test_label_round_trip_and_closure() {
        for label in ActivityLabel::ALL {
            assert_eq!(label.as_str().parse::<ActivityLabel>(), Ok(label));
        }
        assert_eq!("walking".parse::<ActivityLabel>(), Ok(ActivityLabel::Walking));
        assert!("FLYING".parse::<ActivityLabel>().is_err());
    }

    #[test]
    fn test_system_labels() {
        assert!(ActivityLabel::Unknown.is_system());
        assert!(ActivityLabel::Idle.is_system());
        assert!(!ActivityLabel::Stationary.is_system());
        assert!(!ActivityLabel::Uncarried.is_system());
    }

    #[test]
    fn test_classification_extend() {
        let mut c = Classification::new(ActivityLabel::Walking, 1000, 2000, 3.0);
        c.extend(3000, 4.0);
        assert_eq!(c.batch_count, 2);
        assert_eq!(c.duration_ms(), 2000);
        assert!((c.average_met() - 3.5).abs() < 1e-12);

        // An out-of-order end never shrinks the record.
        c.extend(2500, 1.0);
        assert_eq!(c.end_ms, 3000);
    }

    #[test]
    fn test_profile_correct() {
        let mut profile = CalibrationProfile::default();
        profile.offset = [0.5, 0.0, 0.0];
        profile.scale = [2.0, 1.0, 1.0];
        let out = profile.correct([1.5, 2.0, 3.0]);
        assert_eq!(out, [2.0, 2.0, 3.0]);
    }
}
