//! Window statistics over N-dimensional vectors.
//!
//! [`Statistics`] recomputes count, sum, sum of squares, min, max, mean and
//! population/sample variance from scratch on every [`Statistics::assign`]
//! call. There is no incremental update: each batch is an independent window.
//!
//! Numeric policy: variances within ±[`VARIANCE_EPSILON`] of zero are clamped
//! to exactly zero to absorb round-off from the `E[x²] − E[x]²` form. A
//! variance below `-VARIANCE_EPSILON`, or a NaN, means the input is corrupted
//! and aborts the computation with [`SensingError::NumericalCorruption`].

use crate::error::{Result, SensingError};

/// Tolerance around zero for computed variances.
pub const VARIANCE_EPSILON: f64 = 5e-4;

/// Clamp a computed variance according to the numeric policy.
///
/// Returns the (possibly clamped) variance, or an error if it is NaN or
/// negative beyond tolerance.
pub fn guard_variance(context: &'static str, dimension: usize, variance: f64) -> Result<f64> {
    if variance.is_nan() || variance < -VARIANCE_EPSILON {
        return Err(SensingError::NumericalCorruption {
            context,
            dimension,
            variance,
        });
    }
    if variance.abs() <= VARIANCE_EPSILON {
        Ok(0.0)
    } else {
        Ok(variance)
    }
}

/// Statistics of a window of `D`-dimensional vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Statistics<const D: usize> {
    count: usize,
    sum: [f64; D],
    sum_sqr: [f64; D],
    min: [f64; D],
    max: [f64; D],
    mean: [f64; D],
    population_variance: [f64; D],
    population_sd: [f64; D],
    sample_variance: [f64; D],
    sample_sd: [f64; D],
}

impl<const D: usize> Statistics<D> {
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: [0.0; D],
            sum_sqr: [0.0; D],
            min: [0.0; D],
            max: [0.0; D],
            mean: [0.0; D],
            population_variance: [0.0; D],
            population_sd: [0.0; D],
            sample_variance: [0.0; D],
            sample_sd: [0.0; D],
        }
    }

    /// Recompute every statistic from the first `count` vectors.
    ///
    /// Requires `0 < count <= vectors.len()`. With `count == 1` the sample
    /// variance is undefined and reported as zero.
    pub fn assign<T>(&mut self, vectors: &[[T; D]], count: usize) -> Result<()>
    where
        T: Copy + Into<f64>,
    {
        if count == 0 {
            return Err(SensingError::EmptyInput {
                operation: "statistics",
            });
        }
        if count > vectors.len() {
            return Err(SensingError::invalid_config(format!(
                "statistics count {} exceeds {} available vectors",
                count,
                vectors.len()
            )));
        }

        self.count = count;
        self.sum = [0.0; D];
        self.sum_sqr = [0.0; D];
        self.min = [f64::INFINITY; D];
        self.max = [f64::NEG_INFINITY; D];

        for v in &vectors[..count] {
            for d in 0..D {
                let x: f64 = v[d].into();
                self.sum[d] += x;
                self.sum_sqr[d] += x * x;
                if x < self.min[d] {
                    self.min[d] = x;
                }
                if x > self.max[d] {
                    self.max[d] = x;
                }
            }
        }

        let n = count as f64;
        for d in 0..D {
            let mean = self.sum[d] / n;
            self.mean[d] = mean;

            let pop = guard_variance("statistics", d, self.sum_sqr[d] / n - mean * mean)?;
            self.population_variance[d] = pop;
            self.population_sd[d] = pop.sqrt();

            if count > 1 {
                let sample = guard_variance(
                    "statistics",
                    d,
                    (self.sum_sqr[d] - n * mean * mean) / (n - 1.0),
                )?;
                self.sample_variance[d] = sample;
                self.sample_sd[d] = sample.sqrt();
            } else {
                self.sample_variance[d] = 0.0;
                self.sample_sd[d] = 0.0;
            }
        }

        Ok(())
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn sum(&self) -> &[f64; D] {
        &self.sum
    }

    pub fn sum_sqr(&self) -> &[f64; D] {
        &self.sum_sqr
    }

    pub fn min(&self) -> &[f64; D] {
        &self.min
    }

    pub fn max(&self) -> &[f64; D] {
        &self.max
    }

    pub fn mean(&self) -> &[f64; D] {
        &self.mean
    }

    /// Per-dimension `max - min`.
    pub fn range(&self) -> [f64; D] {
        let mut r = [0.0; D];
        for d in 0..D {
            r[d] = self.max[d] - self.min[d];
        }
        r
    }

    pub fn population_variance(&self) -> &[f64; D] {
        &self.population_variance
    }

    pub fn population_sd(&self) -> &[f64; D] {
        &self.population_sd
    }

    pub fn sample_variance(&self) -> &[f64; D] {
        &self.sample_variance
    }

    pub fn sample_sd(&self) -> &[f64; D] {
        &self.sample_sd
    }
}

impl<const D: usize> Default for Statistics<D> {
    fn default() -> Self {
        Self::new()
    }
}

/// Euclidean norm of a vector.
pub fn magnitude(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Divide a vector by its magnitude in place. No-op for a zero vector.
pub fn normalize(v: &mut [f64]) {
    let mag = magnitude(v);
    if mag > 0.0 {
        for x in v.iter_mut() {
            *x /= mag;
        }
    }
}

/// Dot product of two equally sized vectors.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
