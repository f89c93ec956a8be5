//! Boundary traits for the collaborators around the engine, plus the
//! implementations used by the CLI and the tests.
//!
//! - [`Sampler`] fills sample batches (a sensor driver in production).
//! - [`ConfigStore`] persists the calibration profile.
//! - [`ClassificationSink`] receives closed classification records.
//! - [`Diagnostics`] receives human-readable status messages.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{CalibrationProfile, Classification, SampleBatch, Vec3};

// ============================================================================
// SAMPLER
// ============================================================================

/// Result of asking a sampler for one batch.
#[derive(Debug, Clone, PartialEq)]
pub enum FillOutcome {
    /// The batch holds new samples (possibly fewer than its capacity).
    Filled,
    /// The sensor failed for this batch; the engine reports it and retries.
    Failed(String),
    /// No more data will come.
    Cancelled,
}

/// Fills sample batches. Runs on the sampling thread.
pub trait Sampler: Send {
    fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome;
}

/// A pre-recorded accelerometer trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    /// Inter-sample delay (ms).
    pub period_ms: u64,
    /// Timestamp of the first sample (ms).
    #[serde(default)]
    pub start_ms: u64,
    #[serde(default)]
    pub charging: bool,
    pub samples: Vec<Vec3>,
}

impl Recording {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let json = fs::read_to_string(path.into())?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Replays a [`Recording`] batch by batch, then reports `Cancelled`.
#[derive(Debug)]
pub struct ReplaySampler {
    recording: Recording,
    cursor: usize,
}

impl ReplaySampler {
    pub fn new(recording: Recording) -> Self {
        Self {
            recording,
            cursor: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.recording.samples.len() - self.cursor
    }
}

impl Sampler for ReplaySampler {
    fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
        if self.remaining() == 0 {
            return FillOutcome::Cancelled;
        }
        let take = self.remaining().min(batch.capacity());
        let start_ms = self.recording.start_ms + self.cursor as u64 * self.recording.period_ms;
        batch.fill_uniform(
            start_ms,
            self.recording.period_ms,
            &self.recording.samples[self.cursor..self.cursor + take],
        );
        batch.charging = self.recording.charging;
        self.cursor += take;
        FillOutcome::Filled
    }
}

/// Generates a constant vector with an optional vertical oscillation.
#[derive(Debug, Clone)]
pub struct SyntheticSampler {
    /// Mean acceleration in device coordinates.
    pub base: Vec3,
    /// Oscillation amplitude along `base` (m/s²).
    pub amplitude: f32,
    pub frequency_hz: f32,
    pub period_ms: u64,
    /// Gap between the end of one batch and the start of the next (ms).
    pub gap_ms: u64,
    pub charging: bool,
    /// Stop after this many batches.
    pub max_batches: Option<u64>,
    next_ms: u64,
    produced: u64,
}

impl SyntheticSampler {
    pub fn stationary(base: Vec3, period_ms: u64) -> Self {
        Self {
            base,
            amplitude: 0.0,
            frequency_hz: 0.0,
            period_ms,
            gap_ms: 0,
            charging: false,
            max_batches: None,
            next_ms: 0,
            produced: 0,
        }
    }

    pub fn oscillating(base: Vec3, amplitude: f32, frequency_hz: f32, period_ms: u64) -> Self {
        Self {
            amplitude,
            frequency_hz,
            ..Self::stationary(base, period_ms)
        }
    }

    pub fn with_max_batches(mut self, max: u64) -> Self {
        self.max_batches = Some(max);
        self
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }
}

impl Sampler for SyntheticSampler {
    fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
        if self.max_batches.map_or(false, |max| self.produced >= max) {
            return FillOutcome::Cancelled;
        }
        let norm = self.base.iter().map(|v| v * v).sum::<f32>().sqrt();
        let unit = if norm > 0.0 {
            [self.base[0] / norm, self.base[1] / norm, self.base[2] / norm]
        } else {
            [0.0, 0.0, 1.0]
        };

        batch.clear();
        let mut t = self.next_ms;
        while !batch.is_full() {
            let phase = 2.0 * std::f32::consts::PI * self.frequency_hz * t as f32 / 1000.0;
            let offset = self.amplitude * phase.sin();
            let sample = [
                self.base[0] + unit[0] * offset,
                self.base[1] + unit[1] * offset,
                self.base[2] + unit[2] * offset,
            ];
            batch.push(t, sample);
            t += self.period_ms;
        }
        batch.charging = self.charging;
        batch.sequence = self.produced;
        self.next_ms = t.saturating_sub(self.period_ms) + self.gap_ms.max(self.period_ms);
        self.produced += 1;
        FillOutcome::Filled
    }
}

// ============================================================================
// CONFIGURATION STORE
// ============================================================================

/// Persists the calibration profile across runs.
pub trait ConfigStore: Send {
    fn load_profile(&self) -> Result<Option<CalibrationProfile>>;

    fn save_profile(&mut self, profile: &CalibrationProfile) -> Result<()>;
}

#[derive(Debug, Default, Clone)]
pub struct MemoryConfigStore {
    profile: Arc<Mutex<Option<CalibrationProfile>>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(profile: CalibrationProfile) -> Self {
        Self {
            profile: Arc::new(Mutex::new(Some(profile))),
        }
    }

    /// The stored profile, readable through any clone of this store.
    pub fn stored(&self) -> Option<CalibrationProfile> {
        self.profile.lock().clone()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_profile(&self) -> Result<Option<CalibrationProfile>> {
        Ok(self.stored())
    }

    fn save_profile(&mut self, profile: &CalibrationProfile) -> Result<()> {
        *self.profile.lock() = Some(profile.clone());
        Ok(())
    }
}

/// Stores the profile as pretty-printed JSON.
#[derive(Debug, Clone)]
pub struct JsonFileConfigStore {
    path: PathBuf,
}

impl JsonFileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStore for JsonFileConfigStore {
    fn load_profile(&self) -> Result<Option<CalibrationProfile>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&self.path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn save_profile(&mut self, profile: &CalibrationProfile) -> Result<()> {
        let json = serde_json::to_string_pretty(profile)?;
        fs::write(&self.path, json)?;
        info!("calibration profile saved to {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// CLASSIFICATION SINK
// ============================================================================

/// Receives closed classification records, in timestamp order.
pub trait ClassificationSink: Send {
    fn emit(&mut self, record: &Classification) -> Result<()>;
}

/// Collects records in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Classification>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Classification> {
        self.records.lock().clone()
    }
}

impl ClassificationSink for MemorySink {
    fn emit(&mut self, record: &Classification) -> Result<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Writes one JSON object per record.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> ClassificationSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &Classification) -> Result<()> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

// ============================================================================
// DIAGNOSTICS
// ============================================================================

/// One-way operator-visible status channel. Must not block.
pub trait Diagnostics: Send + Sync {
    fn notify(&self, message: &str);
}

/// Routes diagnostics to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn notify(&self, message: &str) {
        warn!("diagnostic: {}", message);
    }
}

/// Collects diagnostics in memory. Clones share the same buffer.
#[derive(Debug, Default, Clone)]
pub struct MemoryDiagnostics {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn notify(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
