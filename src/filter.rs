//! Zero-phase FIR filtering.
//!
//! Windowed-sinc (Hamming) designs applied forward with group-delay
//! compensation, so the output has neither phase shift nor lag. Long
//! filters are applied by FFT overlap-add.

use std::f64::consts::PI;

use rustfft::{FftPlanner, num_complex::Complex};

use crate::error::{SeegError, Result};
use crate::recording::{Channel, Recording};

/// Hamming main-lobe factor: filter length = `HAMMING_LENGTH_FACTOR * sfreq / transition`.
const HAMMING_LENGTH_FACTOR: f64 = 3.3;

/// Kernels up to this length are convolved directly.
const DIRECT_CONVOLUTION_MAX_TAPS: usize = 64;

/// A designed linear-phase FIR filter.
#[derive(Debug, Clone)]
pub struct FirFilter {
    taps: Vec<f64>,
}

impl FirFilter {
    /// Designs a band-pass, high-pass (`h_freq = None`) or low-pass
    /// (`l_freq = None`) filter for `sfreq`.
    ///
    /// Transition bandwidths follow the usual automatic rule: a quarter of
    /// the edge frequency, at least 2 Hz, and never past 0 Hz or Nyquist.
    ///
    /// # Errors
    ///
    /// [`SeegError::InvalidFilter`] when both edges are `None`, an edge is
    /// not inside `(0, sfreq / 2)`, or `l_freq >= h_freq`.
    pub fn design(l_freq: Option<f64>, h_freq: Option<f64>, sfreq: f64) -> Result<Self> {
        let nyquist = sfreq / 2.0;

        if l_freq.is_none() && h_freq.is_none() {
            return Err(SeegError::InvalidFilter("at least one of l_freq and h_freq is required".to_string()));
        }
        for edge in [l_freq, h_freq].into_iter().flatten() {
            if !edge.is_finite() || edge <= 0.0 || edge >= nyquist {
                return Err(SeegError::InvalidFilter(format!(
                    "edge {} Hz must lie strictly between 0 and Nyquist ({} Hz)",
                    edge, nyquist
                )));
            }
        }
        if let (Some(l), Some(h)) = (l_freq, h_freq) {
            if l >= h {
                return Err(SeegError::InvalidFilter(format!("l_freq {} Hz must be below h_freq {} Hz", l, h)));
            }
        }

        let l_trans = l_freq.map(|l| (l * 0.25).max(2.0).min(l));
        let h_trans = h_freq.map(|h| (h * 0.25).max(2.0).min(nyquist - h));

        let narrowest = [l_trans, h_trans]
            .into_iter()
            .flatten()
            .fold(f64::INFINITY, f64::min);
        let numtaps = filter_length(narrowest, sfreq);

        let window = hamming(numtaps);
        let taps = match (l_freq, h_freq) {
            (Some(l), Some(h)) => {
                let low_cut = (l - l_trans.unwrap_or(0.0) / 2.0) / sfreq;
                let high_cut = (h + h_trans.unwrap_or(0.0) / 2.0) / sfreq;
                let upper = windowed_lowpass(numtaps, high_cut, &window);
                let lower = windowed_lowpass(numtaps, low_cut, &window);
                upper.iter().zip(&lower).map(|(u, l)| u - l).collect()
            }
            (Some(l), None) => {
                let cut = (l - l_trans.unwrap_or(0.0) / 2.0) / sfreq;
                spectral_inversion(windowed_lowpass(numtaps, cut, &window))
            }
            (None, Some(h)) => {
                let cut = (h + h_trans.unwrap_or(0.0) / 2.0) / sfreq;
                windowed_lowpass(numtaps, cut, &window)
            }
            (None, None) => unreachable!("checked above"),
        };

        log::debug!(
            "Designed FIR filter {:?}-{:?} Hz at {} Hz: {} taps",
            l_freq,
            h_freq,
            sfreq,
            numtaps
        );

        Ok(FirFilter { taps })
    }

    pub fn taps(&self) -> &[f64] {
        &self.taps
    }

    /// Filters `signal` with zero phase. Output length equals input length.
    pub fn apply(&self, signal: &[f64]) -> Vec<f64> {
        apply_fir_zero_phase(signal, &self.taps)
    }

    /// Gain magnitude at `freq` Hz for sampling rate `sfreq`.
    pub fn gain_at(&self, freq: f64, sfreq: f64) -> f64 {
        let omega = 2.0 * PI * freq / sfreq;
        let (re, im) = self.taps.iter().enumerate().fold((0.0, 0.0), |(re, im), (n, &h)| {
            let phase = omega * n as f64;
            (re + h * phase.cos(), im - h * phase.sin())
        });
        (re * re + im * im).sqrt()
    }
}

/// Odd filter length for the given transition bandwidth.
pub fn filter_length(transition: f64, sfreq: f64) -> usize {
    let n = (HAMMING_LENGTH_FACTOR * sfreq / transition).ceil() as usize;
    let n = n.max(3);
    if n % 2 == 0 { n + 1 } else { n }
}

/// Symmetric Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n - 1) as f64).cos())
        .collect()
}

/// Windowed-sinc low-pass with cutoff `cutoff` in cycles per sample,
/// normalised to unit DC gain.
fn windowed_lowpass(numtaps: usize, cutoff: f64, window: &[f64]) -> Vec<f64> {
    let center = (numtaps - 1) as f64 / 2.0;
    let mut taps: Vec<f64> = (0..numtaps)
        .map(|i| {
            let m = i as f64 - center;
            let sinc = if m == 0.0 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * m).sin() / (PI * m)
            };
            sinc * window[i]
        })
        .collect();

    let sum: f64 = taps.iter().sum();
    if sum != 0.0 {
        for tap in &mut taps {
            *tap /= sum;
        }
    }
    taps
}

fn spectral_inversion(lowpass: Vec<f64>) -> Vec<f64> {
    let center = lowpass.len() / 2;
    lowpass
        .into_iter()
        .enumerate()
        .map(|(i, h)| if i == center { 1.0 - h } else { -h })
        .collect()
}

/// Convolves `signal` with the odd-length linear-phase `taps`, shifting
/// by the group delay. Edges are padded by reflection.
pub fn apply_fir_zero_phase(signal: &[f64], taps: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n == 0 || taps.is_empty() {
        return signal.to_vec();
    }

    let half = taps.len() / 2;
    let padded = reflect_pad(signal, half);

    // padded[i + half] 对应 signal[i]，输出取卷积的 "valid" 部分
    if taps.len() <= DIRECT_CONVOLUTION_MAX_TAPS {
        convolve_valid_direct(&padded, taps)
    } else {
        let full = convolve_overlap_add(&padded, taps);
        full[taps.len() - 1..padded.len()].to_vec()
    }
}

/// Samples of `x * taps` where the kernel fully overlaps `x`.
fn convolve_valid_direct(x: &[f64], taps: &[f64]) -> Vec<f64> {
    let l = taps.len();
    (0..x.len() + 1 - l)
        .map(|i| {
            taps.iter()
                .enumerate()
                .map(|(k, &h)| h * x[i + l - 1 - k])
                .sum()
        })
        .collect()
}

/// Full linear convolution `x * taps` (length `x.len() + taps.len() - 1`)
/// by FFT overlap-add.
fn convolve_overlap_add(x: &[f64], taps: &[f64]) -> Vec<f64> {
    let l = taps.len();
    let full_len = x.len() + l - 1;
    let fft_len = (4 * l).next_power_of_two().min(full_len.next_power_of_two());
    let block = fft_len - l + 1;

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let zero = Complex::new(0.0, 0.0);
    let mut kernel: Vec<Complex<f64>> = taps.iter().map(|&h| Complex::new(h, 0.0)).collect();
    kernel.resize(fft_len, zero);
    forward.process(&mut kernel);

    // rustfft 的逆变换不做归一化
    let scale = 1.0 / fft_len as f64;
    let mut full = vec![0.0; full_len];
    let mut buffer = vec![zero; fft_len];

    for (index, chunk) in x.chunks(block).enumerate() {
        let offset = index * block;
        buffer.fill(zero);
        for (slot, &sample) in buffer.iter_mut().zip(chunk) {
            *slot = Complex::new(sample, 0.0);
        }

        forward.process(&mut buffer);
        for (v, k) in buffer.iter_mut().zip(&kernel) {
            *v = *v * *k;
        }
        inverse.process(&mut buffer);

        let span = (chunk.len() + l - 1).min(full_len - offset);
        for (out, v) in full[offset..offset + span].iter_mut().zip(&buffer) {
            *out += v.re * scale;
        }
    }
    full
}

/// Pads both ends with a mirror image (edge sample excluded); when the
/// signal is shorter than the pad the rest is filled with zeros.
fn reflect_pad(signal: &[f64], pad: usize) -> Vec<f64> {
    let n = signal.len();
    let mut padded = Vec::with_capacity(n + 2 * pad);

    for j in (1..=pad).rev() {
        padded.push(if j < n { signal[j] } else { 0.0 });
    }
    padded.extend_from_slice(signal);
    for j in 1..=pad {
        padded.push(if j < n { signal[n - 1 - j] } else { 0.0 });
    }
    padded
}

impl Recording {
    /// Returns a filtered copy of the recording.
    ///
    /// `highpass` / `lowpass` of the copy are updated to the band applied;
    /// an open edge keeps the current value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use chrono::{TimeZone, Utc};
    /// use seegprep::recording::{Channel, Recording};
    ///
    /// let start = Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap();
    /// let data: Vec<f64> = (0..2048).map(|i| (i as f64 * 0.1).sin()).collect();
    /// let raw = Recording::new(vec![Channel::new("TIP1", "uV", data)], 256.0, start)?;
    ///
    /// let filtered = raw.filter(Some(1.0), Some(80.0))?;
    /// assert_eq!(filtered.n_times(), raw.n_times());
    /// assert_eq!((filtered.highpass(), filtered.lowpass()), (1.0, 80.0));
    /// # Ok::<(), seegprep::SeegError>(())
    /// ```
    pub fn filter(&self, l_freq: Option<f64>, h_freq: Option<f64>) -> Result<Recording> {
        let fir = FirFilter::design(l_freq, h_freq, self.sfreq())?;

        let channels: Vec<Channel> = self
            .channels()
            .iter()
            .map(|c| Channel::new(&c.name, &c.unit, fir.apply(&c.data)))
            .collect();

        let mut filtered = self.with_channels(channels)?;
        filtered.set_filter_info(
            l_freq.unwrap_or(self.highpass()),
            h_freq.unwrap_or(self.lowpass()),
        );

        log::info!(
            "Filtered {} channels ({} taps, band {:?}-{:?} Hz)",
            filtered.n_channels(),
            fir.taps().len(),
            l_freq,
            h_freq
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sine(freq: f64, sfreq: f64, n: usize) -> Vec<f64> {
        (0..n).map(|i| (2.0 * PI * freq * i as f64 / sfreq).sin()).collect()
    }

    fn rms(x: &[f64]) -> f64 {
        (x.iter().map(|v| v * v).sum::<f64>() / x.len() as f64).sqrt()
    }

    #[test]
    fn test_filter_length_is_odd() {
        assert_eq!(filter_length(2.0, 256.0) % 2, 1);
        assert_eq!(filter_length(1.0, 512.0), 1691);
    }

    #[test]
    fn test_hamming_is_symmetric() {
        let w = hamming(11);
        assert!((w[0] - 0.08).abs() < 1e-12);
        assert!((w[5] - 1.0).abs() < 1e-12);
        for i in 0..11 {
            assert!((w[i] - w[10 - i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bandpass_response() {
        let sfreq = 512.0;
        let fir = FirFilter::design(Some(8.0), Some(80.0), sfreq).unwrap();
        assert!((fir.gain_at(30.0, sfreq) - 1.0).abs() < 0.02);
        assert!(fir.gain_at(0.0, sfreq) < 1e-3);
        assert!(fir.gain_at(150.0, sfreq) < 0.01);
    }

    #[test]
    fn test_highpass_and_lowpass_only() {
        let sfreq = 256.0;
        let hp = FirFilter::design(Some(10.0), None, sfreq).unwrap();
        assert!(hp.gain_at(0.0, sfreq) < 1e-3);
        assert!((hp.gain_at(60.0, sfreq) - 1.0).abs() < 0.02);

        let lp = FirFilter::design(None, Some(30.0), sfreq).unwrap();
        assert!((lp.gain_at(0.0, sfreq) - 1.0).abs() < 1e-9);
        assert!(lp.gain_at(100.0, sfreq) < 0.01);
    }

    #[test]
    fn test_invalid_bands() {
        assert!(FirFilter::design(None, None, 256.0).is_err());
        assert!(FirFilter::design(Some(40.0), Some(20.0), 256.0).is_err());
        assert!(FirFilter::design(Some(1.0), Some(128.0), 256.0).is_err());
        assert!(FirFilter::design(Some(0.0), None, 256.0).is_err());
    }

    #[test]
    fn test_zero_phase_keeps_in_band_sine_aligned() {
        let sfreq = 256.0;
        let n = 4096;
        let input = sine(20.0, sfreq, n);
        let fir = FirFilter::design(Some(5.0), Some(60.0), sfreq).unwrap();
        let output = fir.apply(&input);
        assert_eq!(output.len(), n);

        // 远离边缘的样本应几乎不变（无相位延迟）
        let middle = 1000..3000;
        let max_err = middle
            .map(|i| (output[i] - input[i]).abs())
            .fold(0.0, f64::max);
        assert!(max_err < 0.02, "max error {}", max_err);
    }

    #[test]
    fn test_out_of_band_sine_is_removed() {
        let sfreq = 256.0;
        let n = 4096;
        let input = sine(100.0, sfreq, n);
        let fir = FirFilter::design(Some(1.0), Some(40.0), sfreq).unwrap();
        let output = fir.apply(&input);
        assert!(rms(&output[1000..3000]) < 0.01);
    }

    #[test]
    fn test_apply_on_short_signal() {
        let taps = vec![0.25, 0.5, 0.25];
        assert_eq!(apply_fir_zero_phase(&[], &taps), Vec::<f64>::new());
        let out = apply_fir_zero_phase(&[1.0, 1.0, 1.0], &taps);
        assert_eq!(out, vec![1.0, 1.0, 1.0]);
        assert_eq!(apply_fir_zero_phase(&[2.0], &taps), vec![1.0]);
    }

    #[test]
    fn test_overlap_add_matches_direct_convolution() {
        let fir = FirFilter::design(Some(10.0), Some(60.0), 256.0).unwrap();
        assert!(fir.taps().len() > DIRECT_CONVOLUTION_MAX_TAPS);

        // 多个分块，并且包含比半个滤波器还短的信号
        for n in [5000, 700, 7] {
            let signal: Vec<f64> = (0..n)
                .map(|i| (i as f64 * 0.37).sin() + 0.5 * (i as f64 * 1.91).cos() + (i % 13) as f64 * 0.01)
                .collect();
            let padded = reflect_pad(&signal, fir.taps().len() / 2);

            let direct = convolve_valid_direct(&padded, fir.taps());
            let fft = fir.apply(&signal);
            assert_eq!(direct.len(), n);
            assert_eq!(fft.len(), n);
            let max_err = direct
                .iter()
                .zip(&fft)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            assert!(max_err < 1e-9, "n = {}: max error {}", n, max_err);
        }
    }

    #[test]
    fn test_recording_filter_updates_metadata() {
        let start = Utc.with_ymd_and_hms(2017, 4, 23, 12, 53, 28).unwrap();
        let rec = Recording::new(
            vec![Channel::new("TIP1", "uV", sine(10.0, 256.0, 1024))],
            256.0,
            start,
        )
        .unwrap();

        let hp_only = rec.filter(Some(2.0), None).unwrap();
        assert_eq!((hp_only.highpass(), hp_only.lowpass()), (2.0, 128.0));
        assert_eq!(rec.highpass(), 0.0);
    }
}
