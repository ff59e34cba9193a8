//! Per-voice low-pass filter with a cutoff envelope.
//!
//! One to four cascaded one-pole stages (6 dB/octave each). The cutoff
//! is modulated by an ADSR envelope in semitones and tracks the played
//! key, which is enough for the classic "brightness follows the note"
//! behavior without a full resonant ladder.

use std::f64::consts::TAU;

use crate::morph::ops::{FilterParams, FilterType};

/// Envelope times map percent to seconds with a quadratic taper, full
/// scale 2 s; small percentages give usefully short times.
fn percent_to_seconds(percent: f64) -> f64 {
    let p = (percent / 100.0).clamp(0.0, 1.0);
    p * p * 2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvState {
    Attack,
    Decay,
    Sustain,
    Release,
    Done,
}

#[derive(Debug, Clone)]
struct CutoffEnvelope {
    state: EnvState,
    level: f64,
    attack_delta: f64,
    decay_delta: f64,
    sustain_level: f64,
    release_delta: f64,
}

impl CutoffEnvelope {
    fn new(params: &FilterParams, mix_freq: f64) -> Self {
        let rate = |seconds: f64| {
            let samples = (seconds * mix_freq).max(1.0);
            1.0 / samples
        };
        Self {
            state: EnvState::Attack,
            level: 0.0,
            attack_delta: rate(percent_to_seconds(params.attack)),
            decay_delta: rate(percent_to_seconds(params.decay)),
            sustain_level: (params.sustain / 100.0).clamp(0.0, 1.0),
            release_delta: rate(percent_to_seconds(params.release)),
        }
    }

    fn release(&mut self) {
        if self.state != EnvState::Done {
            self.state = EnvState::Release;
        }
    }

    #[inline]
    fn tick(&mut self) -> f64 {
        match self.state {
            EnvState::Attack => {
                self.level += self.attack_delta;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.state = EnvState::Decay;
                }
            }
            EnvState::Decay => {
                self.level -= self.decay_delta;
                if self.level <= self.sustain_level {
                    self.level = self.sustain_level;
                    self.state = EnvState::Sustain;
                }
            }
            EnvState::Sustain => {}
            EnvState::Release => {
                self.level -= self.release_delta;
                if self.level <= 0.0 {
                    self.level = 0.0;
                    self.state = EnvState::Done;
                }
            }
            EnvState::Done => {}
        }
        self.level
    }
}

/// Filter instance of one voice.
#[derive(Debug, Clone)]
pub struct VoiceFilter {
    params: FilterParams,
    mix_freq: f64,
    stages: [f64; 4],
    n_stages: usize,
    env: CutoffEnvelope,
    /// Cutoff multiplier from key tracking, fixed per note.
    key_factor: f64,
}

impl VoiceFilter {
    pub fn new(params: FilterParams, mix_freq: f32, note_freq: f32) -> Self {
        let n_stages = match params.filter_type {
            FilterType::Lp1 => 1,
            FilterType::Lp2 => 2,
            FilterType::Lp3 => 3,
            FilterType::Lp4 => 4,
        };
        let key_factor = (note_freq as f64 / 440.0).powf(params.key_tracking.clamp(0.0, 1.0));
        Self {
            env: CutoffEnvelope::new(&params, mix_freq as f64),
            params,
            mix_freq: mix_freq as f64,
            stages: [0.0; 4],
            n_stages,
            key_factor,
        }
    }

    /// Start the envelope release phase (note off).
    pub fn release(&mut self) {
        self.env.release();
    }

    pub fn process(&mut self, buf: &mut [f32]) {
        let nyquist_guard = self.mix_freq * 0.49;
        for value in buf.iter_mut() {
            let env = self.env.tick();
            let cutoff = (self.params.cutoff_hz
                * self.key_factor
                * ((env * self.params.depth_semitones) / 12.0).exp2())
            .clamp(10.0, nyquist_guard);
            let g = 1.0 - (-TAU * cutoff / self.mix_freq).exp();

            let mut x = *value as f64;
            for stage in self.stages.iter_mut().take(self.n_stages) {
                *stage += g * (x - *stage);
                x = *stage;
            }
            *value = x as f32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, n: usize, mix_freq: f32) -> Vec<f32> {
        (0..n)
            .map(|i| (i as f32 * std::f32::consts::TAU * freq / mix_freq).sin())
            .collect()
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|v| v * v).sum::<f32>() / buf.len() as f32).sqrt()
    }

    fn flat_params(cutoff: f64, filter_type: FilterType) -> FilterParams {
        FilterParams {
            filter_type,
            cutoff_hz: cutoff,
            depth_semitones: 0.0,
            key_tracking: 0.0,
            ..FilterParams::default()
        }
    }

    #[test]
    fn test_highs_attenuated_more_than_lows() {
        let params = flat_params(500.0, FilterType::Lp2);

        let mut low = sine(100.0, 4800, 48000.0);
        VoiceFilter::new(params, 48000.0, 440.0).process(&mut low);
        let mut high = sine(8000.0, 4800, 48000.0);
        VoiceFilter::new(params, 48000.0, 440.0).process(&mut high);

        let low_rms = rms(&low[2400..]);
        let high_rms = rms(&high[2400..]);
        assert!(low_rms > 0.5, "low passband {low_rms}");
        assert!(high_rms < low_rms * 0.1, "stopband {high_rms}");
    }

    #[test]
    fn test_steeper_slope_attenuates_more() {
        let mut one_pole = sine(8000.0, 4800, 48000.0);
        VoiceFilter::new(flat_params(500.0, FilterType::Lp1), 48000.0, 440.0)
            .process(&mut one_pole);
        let mut four_pole = sine(8000.0, 4800, 48000.0);
        VoiceFilter::new(flat_params(500.0, FilterType::Lp4), 48000.0, 440.0)
            .process(&mut four_pole);

        assert!(rms(&four_pole[2400..]) < rms(&one_pole[2400..]) * 0.5);
    }

    #[test]
    fn test_envelope_reaches_sustain() {
        let params = FilterParams {
            attack: 5.0,
            decay: 5.0,
            sustain: 40.0,
            ..FilterParams::default()
        };
        let mut env = CutoffEnvelope::new(&params, 48000.0);
        // 5% quadratic = 5ms attack + 5ms decay
        for _ in 0..48000 {
            env.tick();
        }
        assert_eq!(env.state, EnvState::Sustain);
        assert!((env.level - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_release_finishes() {
        let params = FilterParams::default();
        let mut env = CutoffEnvelope::new(&params, 48000.0);
        for _ in 0..48000 {
            env.tick();
        }
        env.release();
        for _ in 0..96000 {
            env.tick();
        }
        assert_eq!(env.state, EnvState::Done);
        assert_eq!(env.level, 0.0);
    }

    #[test]
    fn test_key_tracking_opens_for_high_notes() {
        let params = FilterParams {
            cutoff_hz: 500.0,
            depth_semitones: 0.0,
            key_tracking: 1.0,
            ..FilterParams::default()
        };

        let mut low_note = sine(2000.0, 4800, 48000.0);
        VoiceFilter::new(params, 48000.0, 110.0).process(&mut low_note);
        let mut high_note = sine(2000.0, 4800, 48000.0);
        VoiceFilter::new(params, 48000.0, 1760.0).process(&mut high_note);

        // same input survives much better when the played key is high
        assert!(rms(&high_note[2400..]) > rms(&low_note[2400..]) * 2.0);
    }
}
