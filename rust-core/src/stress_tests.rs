/// Stress testing for the activity pipeline and engine.
///
/// These tests push long runs, pathological sample values and thread
/// contention through the same code paths production uses.

#[cfg(test)]
mod stress_tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crate::classifier;
    use crate::config::BatchConfig;
    use crate::engine::Engine;
    use crate::interfaces::{FillOutcome, MemoryDiagnostics, MemorySink, Sampler, SyntheticSampler};
    use crate::pipeline::*;
    use crate::pool::{Take, TwoWayPool};
    use crate::types::*;

    const BATCH: usize = 128;

    fn pipeline(config: PipelineConfig) -> (Pipeline, MemorySink) {
        let sink = MemorySink::new();
        let pipeline = Pipeline::new(
            config,
            classifier::default_model(),
            Box::new(sink.clone()),
            Arc::new(MemoryDiagnostics::new()),
        )
        .unwrap();
        (pipeline, sink)
    }

    fn batch_from(start_ms: u64, f: impl Fn(usize) -> Vec3) -> SampleBatch {
        let samples: Vec<Vec3> = (0..BATCH).map(f).collect();
        let mut batch = SampleBatch::new(BATCH);
        batch.fill_uniform(start_ms, 20, &samples);
        batch
    }

    // ============================================================================
    // CATEGORY 1: EXTREME DURATION & THROUGHPUT
    // ============================================================================

    /// One hour of 50 Hz data, alternating still and walking.
    #[test]
    fn stress_one_hour_continuous_50hz() {
        let (mut p, sink) = pipeline(PipelineConfig::default());
        let batches = 3_600_000 / (BATCH as u64 * 20);

        for b in 0..batches {
            let start = b * BATCH as u64 * 20;
            let walking = (b / 50) % 2 == 1;
            let mut batch = batch_from(start, |i| {
                if walking {
                    let t = (start + i as u64 * 20) as f32 / 1000.0;
                    [0.3, 0.2, 9.81 + 3.0 * (2.0 * std::f32::consts::PI * 2.0 * t).sin()]
                } else {
                    [0.3, 0.2, 9.81]
                }
            });
            p.process_batch(&mut batch).unwrap();
        }
        p.finish().unwrap();

        assert_eq!(p.batches_processed(), batches);
        let records = sink.records();
        let total: u32 = records.iter().map(|r| r.batch_count).sum();
        assert_eq!(total as u64, batches);
        assert!(records.len() > 10, "expected many activity changes, got {}", records.len());
        assert!(records.iter().all(|r| r.average_met().is_finite()));
    }

    /// Many threads hammering one pool must never break its invariant.
    #[test]
    fn stress_pool_contention() {
        let pool = Arc::new(TwoWayPool::new("stress", 4, || 0u64));
        let mut handles = Vec::new();
        for worker in 0..8u64 {
            let pool = Arc::clone(&pool);
            handles.push(thread::spawn(move || {
                for round in 0..500u64 {
                    if worker % 2 == 0 {
                        if let Take::Item(_) = pool.take_empty(Duration::from_millis(10)) {
                            pool.return_filled(worker * 1000 + round).unwrap();
                        }
                    } else if let Take::Item(v) = pool.take_filled(Duration::from_millis(10)) {
                        assert!(v < 8000);
                        pool.return_empty(v).unwrap();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        pool.check_invariant().unwrap();
        assert_eq!(pool.checked_out_count(), 0);
        assert_eq!(pool.empty_count() + pool.pending_filled_count(), 4);
    }

    // ============================================================================
    // CATEGORY 2: PATHOLOGICAL SAMPLE VALUES
    // ============================================================================

    #[test]
    fn stress_extreme_acceleration_values() {
        let mut config = PipelineConfig::default();
        config.require_calibration = false;
        let (mut p, _) = pipeline(config);

        for (b, magnitude) in [1e3f32, 1e5, -1e5, 1e-6].iter().enumerate() {
            let mut batch = batch_from(b as u64 * 3000, |i| {
                let sign = if i % 2 == 0 { 1.0 } else { -1.0 };
                [sign * magnitude, 0.0, 9.81]
            });
            let report = p.process_batch(&mut batch).unwrap();
            assert!(report.met.is_finite(), "magnitude {}", magnitude);
            if let Some(fv) = report.features {
                assert!(fv.is_finite());
            }
        }
    }

    #[test]
    fn stress_infinity_is_fatal() {
        let (mut p, _) = pipeline(PipelineConfig::default());
        let mut batch = batch_from(0, |i| if i == 64 { [f32::INFINITY, 0.0, 9.81] } else { [0.0, 0.0, 9.81] });
        let err = p.process_batch(&mut batch).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn stress_zero_time_deltas() {
        let mut config = PipelineConfig::default();
        config.require_calibration = false;
        let (mut p, _) = pipeline(config);
        let mut batch = SampleBatch::new(BATCH);
        for i in 0..BATCH {
            batch.push(1000, [0.0, (i % 3) as f32, 9.81]);
        }
        let report = p.process_batch(&mut batch).unwrap();
        assert_eq!(report.met, 1.0);
    }

    #[test]
    fn stress_nonmonotonic_batches_keep_records_ordered() {
        let mut config = PipelineConfig::default();
        config.require_calibration = false;
        config.aggregator.history = 1;
        let (mut p, sink) = pipeline(config);

        let starts = [10_000u64, 5_000, 20_000, 15_000, 30_000];
        for (n, start) in starts.iter().enumerate() {
            let mut batch = if n % 2 == 0 {
                batch_from(*start, |_| [0.0, 0.0, 9.81])
            } else {
                batch_from(*start, |i| [0.0, 0.0, 9.81 + 6.0 * ((i as f32) * 0.8).sin()])
            };
            p.process_batch(&mut batch).unwrap();
        }
        p.finish().unwrap();

        let records = sink.records();
        for record in &records {
            assert!(record.start_ms <= record.end_ms);
        }
        for pair in records.windows(2) {
            assert!(pair[0].end_ms <= pair[1].start_ms);
        }
    }

    // ============================================================================
    // CATEGORY 3: ENGINE UNDER LOAD
    // ============================================================================

    /// A sampler that is much slower than the wait timeout: the processor
    /// reports exhausted waits but keeps running.
    #[test]
    fn stress_slow_sampler_reports_exhausted_waits() {
        struct SlowSampler {
            inner: SyntheticSampler,
        }
        impl Sampler for SlowSampler {
            fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
                thread::sleep(Duration::from_millis(150));
                self.inner.fill(batch)
            }
        }

        let diagnostics = MemoryDiagnostics::new();
        let sink = MemorySink::new();
        let mut config = PipelineConfig::default();
        config.features.window = 64;
        let p = Pipeline::new(
            config,
            classifier::default_model(),
            Box::new(sink),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();
        let batch = BatchConfig {
            capacity: 64,
            sample_period_ms: 20,
            pool_capacity: 2,
            wait_timeout_ms: 60,
        };
        let sampler = SlowSampler {
            inner: SyntheticSampler::stationary([0.0, 0.0, 9.81], 20).with_max_batches(3),
        };
        let engine = Engine::start(&batch, p, Box::new(sampler), Arc::new(diagnostics.clone())).unwrap();
        let summary = engine.wait().unwrap();

        assert_eq!(summary.batches_processed, 3);
        assert!(diagnostics.contains("no samples received"));
    }

    /// A slow processor exerts backpressure on a fast sampler; nothing is lost.
    #[test]
    fn stress_backpressure_loses_no_batches() {
        struct CountingSampler {
            inner: SyntheticSampler,
        }
        impl Sampler for CountingSampler {
            fn fill(&mut self, batch: &mut SampleBatch) -> FillOutcome {
                self.inner.fill(batch)
            }
        }

        let sink = MemorySink::new();
        let diagnostics = MemoryDiagnostics::new();
        let mut config = PipelineConfig::default();
        config.features.window = 64;
        config.require_calibration = false;
        let p = Pipeline::new(
            config,
            classifier::default_model(),
            Box::new(sink.clone()),
            Arc::new(diagnostics.clone()),
        )
        .unwrap();
        let batch = BatchConfig {
            capacity: 64,
            sample_period_ms: 20,
            pool_capacity: 2,
            wait_timeout_ms: 5_000,
        };
        let sampler = CountingSampler {
            inner: SyntheticSampler::oscillating([0.0, 3.0, 9.3], 4.0, 2.5, 20).with_max_batches(200),
        };
        let engine = Engine::start(&batch, p, Box::new(sampler), Arc::new(diagnostics)).unwrap();
        let summary = engine.wait().unwrap();

        assert_eq!(summary.batches_processed, 200);
        let total: u32 = sink.records().iter().map(|r| r.batch_count).sum();
        assert_eq!(total, 200);
    }

    #[test]
    fn stress_repeated_start_stop_cycles() {
        for _ in 0..10 {
            let (p, _) = pipeline({
                let mut config = PipelineConfig::default();
                config.features.window = 64;
                config
            });
            let batch = BatchConfig {
                capacity: 64,
                ..BatchConfig::default()
            };
            let sampler = SyntheticSampler::stationary([0.0, 0.0, 9.81], 20);
            let engine = Engine::start(&batch, p, Box::new(sampler), Arc::new(MemoryDiagnostics::new())).unwrap();
            thread::sleep(Duration::from_millis(5));
            engine.shutdown().unwrap();
        }
    }
}
