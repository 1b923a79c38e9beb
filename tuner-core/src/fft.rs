//! # Fast Fourier Transform (FFT) Module
//!
//! Magnitude spectra for the chord path and the secondary pitch estimator.
//! Both consume the same power-of-two capture buffer the YIN detector sees.
//!
//! ## Features
//! - RustFFT plans cached per buffer length
//! - DC offset removal and Hann windowing
//! - Bin/frequency conversion helpers

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::Result;
use crate::pitch::validate_buffer;

/// Removes the DC offset from a signal by making its average value zero.
fn remove_dc_offset(signal: &mut [f32]) {
    let len = signal.len();
    if len == 0 {
        return;
    }
    let avg = signal.iter().sum::<f32>() / len as f32;
    if avg.abs() > 1e-6 {
        for sample in signal.iter_mut() {
            *sample -= avg;
        }
    }
}

/// Applies a Hann window in place to reduce spectral leakage.
fn apply_hann_window(buffer: &mut [f32]) {
    let n = buffer.len();
    if n < 2 {
        return;
    }
    let n_minus_1 = (n - 1) as f32;
    for (i, sample) in buffer.iter_mut().enumerate() {
        let multiplier = 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / n_minus_1).cos());
        *sample *= multiplier;
    }
}

/// Forward FFT front end producing magnitude spectra.
///
/// The plan and scratch buffers are kept between calls, so a single analyzer
/// should be reused for every frame of a session.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f32>,
    plan: Option<(usize, Arc<dyn Fft<f32>>)>,
    windowed: Vec<f32>,
    buffer: Vec<Complex<f32>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("planned_len", &self.plan.as_ref().map(|(len, _)| *len))
            .finish()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    /// Creates an analyzer with no plan yet.
    pub fn new() -> Self {
        Self {
            planner: FftPlanner::new(),
            plan: None,
            windowed: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Computes the magnitude spectrum of a buffer.
    ///
    /// The signal is DC-corrected and Hann-windowed first. Only bins up to
    /// the Nyquist frequency are returned (`len / 2` values).
    ///
    /// # Errors
    /// * `TunerError::InvalidBuffer` - empty or non power-of-two input
    pub fn magnitudes(&mut self, signal: &[f32]) -> Result<Vec<f32>> {
        self.magnitudes_padded(signal, 1)
    }

    /// Like [`magnitudes`](Self::magnitudes), but zero-pads the windowed
    /// signal to `signal.len() * pad_factor` samples for finer bin spacing.
    /// `pad_factor` is rounded up to a power of two.
    pub fn magnitudes_padded(&mut self, signal: &[f32], pad_factor: usize) -> Result<Vec<f32>> {
        validate_buffer(signal)?;
        let len = signal.len() * pad_factor.max(1).next_power_of_two();
        let fft = match &self.plan {
            Some((planned, fft)) if *planned == len => Arc::clone(fft),
            _ => {
                let fft = self.planner.plan_fft_forward(len);
                self.plan = Some((len, Arc::clone(&fft)));
                fft
            }
        };

        self.windowed.clear();
        self.windowed.extend_from_slice(signal);
        remove_dc_offset(&mut self.windowed);
        apply_hann_window(&mut self.windowed);

        self.buffer.clear();
        self.buffer
            .extend(self.windowed.iter().map(|&sample| Complex { re: sample, im: 0.0 }));
        self.buffer.resize(len, Complex { re: 0.0, im: 0.0 });
        fft.process(&mut self.buffer);

        Ok(spectrum_to_magnitudes(&self.buffer))
    }
}

/// Magnitudes of the first half of a complex spectrum.
pub fn spectrum_to_magnitudes(spectrum: &[Complex<f32>]) -> Vec<f32> {
    spectrum
        .iter()
        .take(spectrum.len() / 2)
        .map(|c| c.norm())
        .collect()
}

/// Centre frequency of an FFT bin.
pub fn bin_frequency(bin: usize, fft_len: usize, sample_rate: u32) -> f32 {
    bin as f32 * sample_rate as f32 / fft_len as f32
}
