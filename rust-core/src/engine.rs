//! Two-thread runtime around the [`Pipeline`].
//!
//! ```text
//!            take_empty            return_filled
//!  sampler ─────────────▶ batch ─────────────────┐
//!   thread                                       ▼
//!                               TwoWayPool<SampleBatch>
//!                                                │
//!  processing ◀──────────── batch ◀──────────────┘
//!   thread     take_filled          return_empty
//! ```
//!
//! The pool is the only channel for sample data. The processing thread owns
//! the pipeline and publishes a [`CalibrationSnapshot`] after each batch;
//! other threads read that snapshot and never touch the calibrator.
//!
//! Waits are bounded. A timed-out wait is reported through [`Diagnostics`]
//! and the loop continues. Both threads return whatever batch they hold to
//! the pool before exiting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use parking_lot::RwLock;

use crate::config::BatchConfig;
use crate::error::{Result, SensingError};
use crate::interfaces::{Diagnostics, FillOutcome, Sampler};
use crate::pipeline::Pipeline;
use crate::pool::{Take, TwoWayPool};
use crate::types::{ActivityLabel, CalibrationSnapshot, Classification, SampleBatch};

/// Longest single blocking wait, so stop requests are noticed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// State shared between the engine handle and its threads.
struct Shared {
    pool: TwoWayPool<SampleBatch>,
    stop: AtomicBool,
    sampler_done: AtomicBool,
    force_calibration: AtomicBool,
    snapshot: RwLock<CalibrationSnapshot>,
    label: RwLock<ActivityLabel>,
    diagnostics: Arc<dyn Diagnostics>,
    timeout: Duration,
}

impl Shared {
    fn should_stop(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Take from the pool in short slices until `timeout` has elapsed in
    /// total, or stop was requested. `give_up` ends the wait early.
    fn take(&self, filled: bool, give_up: impl Fn() -> bool) -> Take<SampleBatch> {
        let started = Instant::now();
        loop {
            let remaining = self.timeout.saturating_sub(started.elapsed());
            let slice = remaining.min(POLL_INTERVAL);
            let taken = if filled {
                self.pool.take_filled(slice)
            } else {
                self.pool.take_empty(slice)
            };
            match taken {
                Take::Exhausted if remaining > slice && !self.should_stop() && !give_up() => {
                    continue
                }
                other => return other,
            }
        }
    }
}

/// What the processing thread did before it exited.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSummary {
    pub batches_processed: u64,
    /// Smoothed label of the last batch.
    pub last_label: ActivityLabel,
    /// Record closed on shutdown.
    pub final_record: Option<Classification>,
    pub snapshot: CalibrationSnapshot,
}

/// Handle to a running engine.
pub struct Engine {
    shared: Arc<Shared>,
    sampler: Option<JoinHandle<Result<u64>>>,
    processor: Option<JoinHandle<Result<EngineSummary>>>,
}

impl Engine {
    /// Spawn the sampling and processing threads.
    pub fn start(
        batch: &BatchConfig,
        pipeline: Pipeline,
        sampler: Box<dyn Sampler>,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let capacity = batch.capacity;
        let shared = Arc::new(Shared {
            pool: TwoWayPool::new("sample-batches", batch.pool_capacity, || {
                SampleBatch::new(capacity)
            }),
            stop: AtomicBool::new(false),
            sampler_done: AtomicBool::new(false),
            force_calibration: AtomicBool::new(false),
            snapshot: RwLock::new(pipeline.snapshot()),
            label: RwLock::new(pipeline.current_label()),
            diagnostics,
            timeout: batch.wait_timeout(),
        });

        let sampler_shared = Arc::clone(&shared);
        let sampler = thread::Builder::new()
            .name("activity-sampler".to_string())
            .spawn(move || run_sampler(&sampler_shared, sampler))?;

        let processor_shared = Arc::clone(&shared);
        let processor = match thread::Builder::new()
            .name("activity-processor".to_string())
            .spawn(move || run_processor(&processor_shared, pipeline))
        {
            Ok(handle) => handle,
            Err(e) => {
                shared.stop.store(true, Ordering::SeqCst);
                shared.pool.cancel();
                let _ = sampler.join();
                return Err(e.into());
            }
        };

        info!(
            "engine started: {} batches of {} samples",
            batch.pool_capacity, capacity
        );
        Ok(Self {
            shared,
            sampler: Some(sampler),
            processor: Some(processor),
        })
    }

    /// Latest calibration state published by the processing thread.
    pub fn snapshot(&self) -> CalibrationSnapshot {
        self.shared.snapshot.read().clone()
    }

    /// Latest smoothed label.
    pub fn current_label(&self) -> ActivityLabel {
        *self.shared.label.read()
    }

    /// Ask the processing thread to force a calibration.
    pub fn force_calibration(&self) {
        self.shared.force_calibration.store(true, Ordering::SeqCst);
    }

    /// Batches waiting for the processing thread.
    pub fn pending_batches(&self) -> usize {
        self.shared.pool.pending_filled_count()
    }

    pub fn is_finished(&self) -> bool {
        self.processor.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Request both threads to stop after their current batch.
    pub fn stop(&self) {
        debug!("engine stop requested");
        self.shared.stop.store(true, Ordering::SeqCst);
        self.shared.pool.cancel();
    }

    /// Wait for the sampler to run out of data and the processor to drain.
    pub fn wait(mut self) -> Result<EngineSummary> {
        self.join_threads()
    }

    /// Stop both threads and collect the summary.
    pub fn shutdown(mut self) -> Result<EngineSummary> {
        self.stop();
        self.join_threads()
    }

    fn join_threads(&mut self) -> Result<EngineSummary> {
        let processed = self.processor.take().map(|handle| handle.join());
        // The processor may have exited on a fatal error; release the sampler.
        self.stop();
        let sampled = self.sampler.take().map(|handle| handle.join());

        let summary = match processed {
            Some(Ok(result)) => result?,
            _ => return Err(SensingError::ThreadPanicked { thread: "processor" }),
        };
        let filled = match sampled {
            Some(Ok(result)) => result?,
            Some(Err(_)) => return Err(SensingError::ThreadPanicked { thread: "sampler" }),
            None => 0,
        };
        self.shared.pool.check_invariant()?;
        let unprocessed = self.shared.pool.pending_filled_count();
        if unprocessed > 0 {
            warn!("{} filled batches left unprocessed at shutdown", unprocessed);
        }
        info!(
            "engine stopped: {} batches filled, {} processed",
            filled, summary.batches_processed
        );
        Ok(summary)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.processor.is_some() || self.sampler.is_some() {
            self.stop();
            let _ = self.join_threads();
        }
    }
}

/// Sampling loop. Returns the number of batches filled.
fn run_sampler(shared: &Shared, mut sampler: Box<dyn Sampler>) -> Result<u64> {
    let mut sequence = 0u64;
    let result = loop {
        if shared.should_stop() {
            break Ok(sequence);
        }
        let mut batch = match shared.take(false, || false) {
            Take::Item(batch) => batch,
            Take::Exhausted => {
                if !shared.should_stop() {
                    shared
                        .diagnostics
                        .notify("unable to classify fast enough: no free sample batch");
                }
                continue;
            }
            Take::Cancelled => break Ok(sequence),
        };

        match sampler.fill(&mut batch) {
            FillOutcome::Filled => {
                batch.sequence = sequence;
                sequence += 1;
                if let Err(e) = shared.pool.return_filled(batch) {
                    break Err(e);
                }
            }
            FillOutcome::Failed(reason) => {
                warn!("sampler failed: {}", reason);
                shared
                    .diagnostics
                    .notify(&format!("sampler failed: {}", reason));
                batch.clear();
                if let Err(e) = shared.pool.return_empty(batch) {
                    break Err(e);
                }
            }
            FillOutcome::Cancelled => {
                debug!("sampler finished after {} batches", sequence);
                batch.clear();
                let returned = shared.pool.return_empty(batch);
                break returned.map(|()| sequence);
            }
        }
    };
    shared.sampler_done.store(true, Ordering::SeqCst);
    result
}

/// Processing loop. Exits on stop, when the sampler is done and every
/// filled batch is processed, or on a fatal error.
fn run_processor(shared: &Shared, mut pipeline: Pipeline) -> Result<EngineSummary> {
    let drained = || {
        shared.sampler_done.load(Ordering::SeqCst) && shared.pool.pending_filled_count() == 0
    };

    while !shared.should_stop() {
        if shared.force_calibration.swap(false, Ordering::SeqCst) {
            pipeline.force_calibration();
        }
        if drained() {
            break;
        }

        let mut batch = match shared.take(true, drained) {
            Take::Item(batch) => batch,
            Take::Exhausted => {
                if !drained() && !shared.should_stop() {
                    shared
                        .diagnostics
                        .notify("no samples received within the wait timeout");
                }
                continue;
            }
            Take::Cancelled => break,
        };

        let result = pipeline.process_batch(&mut batch);
        batch.clear();
        shared.pool.return_empty(batch)?;

        match result {
            Ok(report) => {
                *shared.snapshot.write() = pipeline.snapshot();
                *shared.label.write() = report.label;
            }
            Err(e) if e.is_fatal() => {
                error!("fatal pipeline error, stopping: {}", e);
                shared.diagnostics.notify(&format!("processing stopped: {}", e));
                shared.stop.store(true, Ordering::SeqCst);
                shared.pool.cancel();
                // Close the record built from the batches before the failure.
                if let Err(close_err) = pipeline.finish() {
                    warn!("could not emit the open record: {}", close_err);
                }
                return Err(e);
            }
            Err(e) => {
                warn!("batch skipped: {}", e);
                shared.diagnostics.notify(&format!("batch skipped: {}", e));
            }
        }
    }

    let final_record = pipeline.finish()?;
    Ok(EngineSummary {
        batches_processed: pipeline.batches_processed(),
        last_label: pipeline.current_label(),
        final_record,
        snapshot: pipeline.snapshot(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier;
    use crate::interfaces::{MemoryDiagnostics, MemorySink, SyntheticSampler};
    use crate::pipeline::PipelineConfig;

    fn batch_config() -> BatchConfig {
        BatchConfig {
            capacity: 64,
            sample_period_ms: 20,
            pool_capacity: 2,
            wait_timeout_ms: 2_000,
        }
    }

    fn pipeline(sink: &MemorySink, diagnostics: &MemoryDiagnostics) -> Pipeline {
        let mut config = PipelineConfig::default();
        config.features.window = 64;
        config.calibrator.calibration_duration_ms = 2_000;
        Pipeline::new(
            config,
            classifier::default_model(),
            Box::new(sink.clone()),
            Arc::new(diagnostics.clone()),
        )
        .unwrap()
    }

    #[test]
    fn test_engine_processes_every_batch_in_order() {
        let sink = MemorySink::new();
        let diagnostics = MemoryDiagnostics::new();
        let sampler = SyntheticSampler::stationary([0.0, 0.0, 9.81], 20).with_max_batches(12);
        let engine = Engine::start(
            &batch_config(),
            pipeline(&sink, &diagnostics),
            Box::new(sampler),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();

        let summary = engine.wait().unwrap();
        assert_eq!(summary.batches_processed, 12);
        assert_eq!(summary.last_label, ActivityLabel::Stationary);
        assert_eq!(summary.snapshot.state, crate::types::CalibrationState::Calibrated);

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label, ActivityLabel::Uncalibrated);
        assert_eq!(records[1].label, ActivityLabel::Stationary);
        assert!(records[0].end_ms <= records[1].start_ms);
        let total: u32 = records.iter().map(|r| r.batch_count).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn test_shutdown_stops_endless_sampler() {
        let sink = MemorySink::new();
        let diagnostics = MemoryDiagnostics::new();
        let sampler = SyntheticSampler::oscillating([0.0, 0.0, 9.81], 3.0, 2.0, 20);
        let engine = Engine::start(
            &batch_config(),
            pipeline(&sink, &diagnostics),
            Box::new(sampler),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        engine.force_calibration();
        let summary = engine.shutdown().unwrap();
        assert!(summary.batches_processed > 0);
        assert!(summary.final_record.is_some());
    }

    #[test]
    fn test_fatal_error_is_returned_from_wait() {
        struct NanSampler;
        impl Sampler for NanSampler {
            fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
                batch.fill_uniform(0, 20, &[[f32::NAN, 0.0, 9.81]; 64]);
                FillOutcome::Filled
            }
        }

        let sink = MemorySink::new();
        let diagnostics = MemoryDiagnostics::new();
        let engine = Engine::start(
            &batch_config(),
            pipeline(&sink, &diagnostics),
            Box::new(NanSampler),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();

        let err = engine.wait().unwrap_err();
        assert!(matches!(err, SensingError::NumericalCorruption { .. }));
        assert!(diagnostics.contains("processing stopped"));
    }

    #[test]
    fn test_fatal_error_still_emits_open_record() {
        struct GoodThenNanSampler {
            batches: u64,
        }
        impl Sampler for GoodThenNanSampler {
            fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
                let start = self.batches * 64 * 20;
                let value = if self.batches < 5 { 9.81 } else { f32::NAN };
                batch.fill_uniform(start, 20, &[[0.0, 0.0, value]; 64]);
                self.batches += 1;
                FillOutcome::Filled
            }
        }

        let sink = MemorySink::new();
        let diagnostics = MemoryDiagnostics::new();
        let engine = Engine::start(
            &batch_config(),
            pipeline(&sink, &diagnostics),
            Box::new(GoodThenNanSampler { batches: 0 }),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();

        let err = engine.wait().unwrap_err();
        assert!(err.is_fatal());
        assert!(diagnostics.contains("processing stopped"));

        let records = sink.records();
        assert!(!records.is_empty());
        let total: u32 = records.iter().map(|r| r.batch_count).sum();
        assert_eq!(total, 5);
        assert_eq!(records.last().unwrap().end_ms, 4 * 64 * 20 + 63 * 20);
    }

    #[test]
    fn test_failed_fill_is_reported_and_retried() {
        struct FlakySampler {
            calls: u32,
        }
        impl Sampler for FlakySampler {
            fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
                self.calls += 1;
                match self.calls {
                    1 => FillOutcome::Failed("sensor timeout".into()),
                    2 | 3 => {
                        let start = self.calls as u64 * 2000;
                        batch.fill_uniform(start, 20, &[[0.0, 0.0, 9.81]; 64]);
                        FillOutcome::Filled
                    }
                    _ => FillOutcome::Cancelled,
                }
            }
        }

        let sink = MemorySink::new();
        let diagnostics = MemoryDiagnostics::new();
        let engine = Engine::start(
            &batch_config(),
            pipeline(&sink, &diagnostics),
            Box::new(FlakySampler { calls: 0 }),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();

        let summary = engine.wait().unwrap();
        assert_eq!(summary.batches_processed, 2);
        assert!(diagnostics.contains("sensor timeout"));
    }
}
