//! Fixed-size radix-2 FFT producing a normalized magnitude spectrum.
//!
//! The window length is fixed at construction and must be a power of two.
//! Sine/cosine twiddle tables and the bit-reversal permutation are computed
//! once, so [`Fft::transform`] does no allocation beyond its output.

use std::f64::consts::PI;

use crate::error::{Result, SensingError};

/// Radix-2 decimation-in-time FFT with precomputed tables.
#[derive(Debug, Clone)]
pub struct Fft {
    n: usize,
    levels: u32,
    cos_table: Vec<f64>,
    sin_table: Vec<f64>,
    reversed: Vec<usize>,
}

impl Fft {
    /// Build an FFT for windows of length `n` (a power of two, at least 2).
    pub fn new(n: usize) -> Result<Self> {
        if n < 2 || !n.is_power_of_two() {
            return Err(SensingError::FftLength {
                expected: 0,
                actual: n,
            });
        }
        let levels = n.trailing_zeros();

        let half = n / 2;
        let mut cos_table = Vec::with_capacity(half);
        let mut sin_table = Vec::with_capacity(half);
        for i in 0..half {
            let angle = 2.0 * PI * i as f64 / n as f64;
            cos_table.push(angle.cos());
            sin_table.push(angle.sin());
        }

        let reversed = (0..n)
            .map(|i| reverse_bits(i, levels))
            .collect();

        Ok(Self {
            n,
            levels,
            cos_table,
            sin_table,
            reversed,
        })
    }

    /// Configured window length.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Transform `real`/`imag` in place and return the magnitude spectrum.
    ///
    /// The spectrum has `n / 2` bins, each divided by `n`. Bin 0 is replaced
    /// by bin 1 to suppress DC leakage.
    pub fn transform(&self, real: &mut [f64], imag: &mut [f64]) -> Result<Vec<f64>> {
        if real.len() != self.n {
            return Err(SensingError::FftLength {
                expected: self.n,
                actual: real.len(),
            });
        }
        if imag.len() != self.n {
            return Err(SensingError::FftLength {
                expected: self.n,
                actual: imag.len(),
            });
        }

        for i in 0..self.n {
            let j = self.reversed[i];
            if j > i {
                real.swap(i, j);
                imag.swap(i, j);
            }
        }

        let mut size = 2;
        while size <= self.n {
            let half = size / 2;
            let step = self.n / size;
            for start in (0..self.n).step_by(size) {
                for k in 0..half {
                    let w_re = self.cos_table[k * step];
                    let w_im = -self.sin_table[k * step];
                    let a = start + k;
                    let b = a + half;
                    let t_re = real[b] * w_re - imag[b] * w_im;
                    let t_im = real[b] * w_im + imag[b] * w_re;
                    real[b] = real[a] - t_re;
                    imag[b] = imag[a] - t_im;
                    real[a] += t_re;
                    imag[a] += t_im;
                }
            }
            size *= 2;
        }

        let bins = self.n / 2;
        let norm = self.n as f64;
        let mut spectrum: Vec<f64> = (0..bins)
            .map(|i| (real[i] * real[i] + imag[i] * imag[i]).sqrt() / norm)
            .collect();
        if bins > 1 {
            spectrum[0] = spectrum[1];
        }
        Ok(spectrum)
    }

    /// Convenience: transform a real signal, returning its magnitude spectrum.
    pub fn magnitude_spectrum(&self, signal: &[f64]) -> Result<Vec<f64>> {
        let mut real = signal.to_vec();
        let mut imag = vec![0.0; signal.len()];
        self.transform(&mut real, &mut imag)
    }

    /// Number of butterfly levels (log2 of the window length).
    pub fn levels(&self) -> u32 {
        self.levels
    }
}

fn reverse_bits(mut value: usize, levels: u32) -> usize {
    let mut result = 0;
    for _ in 0..levels {
        result = (result << 1) | (value & 1);
        value >>= 1;
    }
    result
}
