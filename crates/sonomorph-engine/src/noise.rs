//! Decoder for the stochastic residual of the signal.
//!
//! The encoder stores everything the sine partials could not explain as a
//! per-frame noise envelope at bark-band resolution. This module
//! resynthesizes it: per frame the band envelope is spread over an FFT
//! half-spectrum with random phases, transformed to the time domain and
//! overlap-added at 50% with a Hann window.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::TAU;
use std::sync::Arc;

use sonomorph_model::{AudioBlock, NOISE_BANDS};

/// Upper edge of the band scale in Hz. Bands are fixed in frequency so
/// envelopes stay comparable across mix freqs.
const BAND_SCALE_TOP_HZ: f32 = 22050.0;

/// Traunmüller-style bark approximation.
fn bark(freq_hz: f32) -> f32 {
    13.0 * (0.00076 * freq_hz).atan() + 3.5 * ((freq_hz / 7500.0) * (freq_hz / 7500.0)).atan()
}

/// Static mapping from FFT bins to noise envelope bands.
#[derive(Debug, Clone)]
pub struct NoiseBandPartition {
    band_of_bin: Vec<u8>,
    bins_per_band: [u32; NOISE_BANDS],
}

impl NoiseBandPartition {
    pub fn new(block_size: usize, mix_freq: f32) -> Self {
        let bins = block_size / 2;
        let mut band_of_bin = vec![0u8; bins];
        let mut bins_per_band = [0u32; NOISE_BANDS];

        let top_bark = bark(BAND_SCALE_TOP_HZ);
        for bin in 0..bins {
            let freq = bin as f32 * mix_freq / block_size as f32;
            let band = ((bark(freq) / top_bark) * NOISE_BANDS as f32) as usize;
            let band = band.min(NOISE_BANDS - 1);
            band_of_bin[bin] = band as u8;
            bins_per_band[band] += 1;
        }

        Self {
            band_of_bin,
            bins_per_band,
        }
    }

    #[inline]
    pub fn band(&self, bin: usize) -> usize {
        self.band_of_bin[bin] as usize
    }

    #[inline]
    pub fn bins_in_band(&self, band: usize) -> u32 {
        self.bins_per_band[band]
    }
}

/// Resynthesizes the noise component of one voice.
///
/// Deterministic for a given seed; all buffers are allocated at
/// construction, `process` is allocation-free.
pub struct NoiseDecoder {
    block_size: usize,
    partition: NoiseBandPartition,
    ifft: Arc<dyn Fft<f32>>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    window: Vec<f32>,
    overlap: Vec<f32>,
    band_scale: [f32; NOISE_BANDS],
    rng_state: u32,
}

impl NoiseDecoder {
    /// `block_size` must be even; the hop (output step per frame) is
    /// `block_size / 2`.
    pub fn new(mix_freq: f32, block_size: usize) -> Self {
        debug_assert!(block_size >= 4 && block_size % 2 == 0);

        let partition = NoiseBandPartition::new(block_size, mix_freq);
        let mut planner = FftPlanner::new();
        let ifft = planner.plan_fft_inverse(block_size);
        let scratch_len = ifft.get_inplace_scratch_len();

        // Hann window; 50% overlap-add of hann reconstructs unit gain.
        let window: Vec<f32> = (0..block_size)
            .map(|i| 0.5 - 0.5 * (TAU * i as f32 / block_size as f32).cos())
            .collect();

        // Equal-power spread of a band magnitude across its bins; the 0.5
        // folds in the inverse-FFT 1/N and the two-sided spectrum.
        let mut band_scale = [0.0f32; NOISE_BANDS];
        for (band, scale) in band_scale.iter_mut().enumerate() {
            let bins = partition.bins_in_band(band).max(1) as f32;
            *scale = (1.0 / bins).sqrt() * 0.5;
        }

        Self {
            block_size,
            partition,
            ifft,
            spectrum: vec![Complex::default(); block_size],
            scratch: vec![Complex::default(); scratch_len],
            window,
            overlap: vec![0.0; block_size],
            band_scale,
            rng_state: 0x1234_5678,
        }
    }

    /// Preferred block size for a frame step of `frame_step` samples.
    pub fn preferred_block_size(frame_step: usize) -> usize {
        (frame_step.max(2) * 2).next_multiple_of(2)
    }

    /// Output samples produced per call.
    #[inline]
    pub fn hop_size(&self) -> usize {
        self.block_size / 2
    }

    pub fn set_seed(&mut self, seed: u32) {
        self.rng_state = if seed == 0 { 1 } else { seed };
    }

    #[inline]
    fn next_random(&mut self) -> f32 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        self.rng_state as f32 / u32::MAX as f32
    }

    /// Reset overlap state (new note).
    pub fn reset(&mut self) {
        self.overlap.fill(0.0);
    }

    /// Add one hop worth of resynthesized residual for `block` into
    /// `out` (length must be `hop_size()`).
    pub fn process(&mut self, block: &AudioBlock, out: &mut [f32]) {
        let hop = self.hop_size();
        debug_assert_eq!(out.len(), hop);

        let half = self.block_size / 2;
        self.spectrum[0] = Complex::default();
        self.spectrum[half] = Complex::default();
        for bin in 1..half {
            let band = self.partition.band(bin);
            let amp = block.noise_f(band) as f32 * self.band_scale[band];
            let phase = self.next_random() * TAU;
            let c = Complex::from_polar(amp, phase);
            self.spectrum[bin] = c;
            self.spectrum[self.block_size - bin] = c.conj();
        }

        self.ifft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        for i in 0..self.block_size {
            self.overlap[i] += self.spectrum[i].re * self.window[i];
        }

        for (o, v) in out.iter_mut().zip(&self.overlap[..hop]) {
            *o += *v;
        }
        self.overlap.copy_within(hop.., 0);
        let tail = self.block_size - hop;
        self.overlap[tail..].fill(0.0);
    }
}
