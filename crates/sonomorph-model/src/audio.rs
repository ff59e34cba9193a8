//! A full encoded sample: frame sequence plus playback metadata.

use crate::block::{AudioBlock, NOISE_BANDS};
use crate::error::{Error, Result};

/// Loop behaviour during the sustain phase of playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopType {
    /// Play through once, then end.
    #[default]
    None,
    /// Wrap the frame index back to `loop_start` after `loop_end`.
    FrameForward,
    /// Reflect the frame index between `loop_start` and `loop_end`.
    FramePingPong,
    /// Wrap a continuous time position (sub-frame precision).
    TimeForward,
    /// Reflect a continuous time position (sub-frame precision).
    TimePingPong,
}

impl LoopType {
    /// True for the loop modes operating on a continuous time position.
    #[inline]
    pub fn is_time_loop(&self) -> bool {
        matches!(self, LoopType::TimeForward | LoopType::TimePingPong)
    }
}

/// Audio sample containing many blocks.
///
/// The time dependent parameters are stored in `contents`, one
/// [`AudioBlock`] per analysis frame at a fixed time step; parameters that
/// are the same for all frames live in this struct. Produced by the
/// offline encoder, immutable during playback, replaceable wholesale when
/// rebuilt.
#[derive(Debug, Clone)]
pub struct Audio {
    /// Fundamental frequency of the encoded note in Hz.
    pub fundamental_freq: f32,
    /// Sampling rate of the original audio data.
    pub mix_freq: f32,
    /// Length of each analysis frame in milliseconds.
    pub frame_size_ms: f32,
    /// Stepping of the analysis frames in milliseconds.
    pub frame_step_ms: f32,
    /// Start of the attack region in milliseconds.
    pub attack_start_ms: f32,
    /// End of the attack region in milliseconds.
    pub attack_end_ms: f32,
    /// Loop policy for the sustain phase.
    pub loop_type: LoopType,
    /// First frame of the loop region.
    pub loop_start: usize,
    /// Last frame of the loop region (inclusive).
    pub loop_end: usize,
    /// Zero samples prepended by the encoder (stripped during decoding).
    pub zero_values_at_start: usize,
    /// Number of samples encoded (including `zero_values_at_start`).
    pub sample_count: usize,
    /// Original time domain samples, for the reference playback mode.
    pub original_samples: Vec<f32>,
    /// Normalization in dB to apply to `original_samples`.
    pub original_samples_norm_db: f32,
    /// The actual frame data.
    pub contents: Vec<AudioBlock>,
}

impl Default for Audio {
    fn default() -> Self {
        Self {
            fundamental_freq: 440.0,
            mix_freq: 48000.0,
            frame_size_ms: 40.0,
            frame_step_ms: 10.0,
            attack_start_ms: 0.0,
            attack_end_ms: 0.0,
            loop_type: LoopType::None,
            loop_start: 0,
            loop_end: 0,
            zero_values_at_start: 0,
            sample_count: 0,
            original_samples: Vec::new(),
            original_samples_norm_db: 0.0,
            contents: Vec::new(),
        }
    }
}

impl Audio {
    /// Number of analysis frames.
    #[inline]
    pub fn n_frames(&self) -> usize {
        self.contents.len()
    }

    /// Duration represented by the frame sequence, in milliseconds.
    pub fn duration_ms(&self) -> f64 {
        self.contents.len() as f64 * self.frame_step_ms as f64
    }

    /// Validate invariants the engine relies on.
    ///
    /// Called by the control plane before data is handed to the audio
    /// thread; the audio path assumes validated input.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("fundamental_freq", self.fundamental_freq),
            ("mix_freq", self.mix_freq),
            ("frame_step_ms", self.frame_step_ms),
            ("frame_size_ms", self.frame_size_ms),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidRate { name, value });
            }
        }

        if self.loop_type != LoopType::None {
            let frames = self.contents.len();
            if self.loop_start > self.loop_end || self.loop_end >= frames {
                return Err(Error::InvalidLoopRange {
                    start: self.loop_start,
                    end: self.loop_end,
                    frames,
                });
            }
        }

        for (i, block) in self.contents.iter().enumerate() {
            if !block.freqs_sorted() {
                return Err(Error::UnsortedPartials { frame: i });
            }
            if block.noise.len() != NOISE_BANDS {
                return Err(Error::BadNoiseEnvelope {
                    frame: i,
                    got: block.noise.len(),
                    expected: NOISE_BANDS,
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Partial;
    use crate::math;

    fn frame() -> AudioBlock {
        let mut block = AudioBlock::with_capacity(1);
        block.partials.push(Partial {
            freq: math::ratio_to_ifreq(1.0),
            mag: math::db_to_idb(-6.0),
            phase: 0,
        });
        block
    }

    #[test]
    fn test_validate_ok() {
        let mut audio = Audio::default();
        audio.contents = vec![frame(), frame(), frame()];
        audio.loop_type = LoopType::FrameForward;
        audio.loop_start = 1;
        audio.loop_end = 2;
        assert!(audio.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_loop() {
        let mut audio = Audio::default();
        audio.contents = vec![frame(), frame()];
        audio.loop_type = LoopType::FramePingPong;
        audio.loop_start = 1;
        audio.loop_end = 0;
        assert!(matches!(
            audio.validate(),
            Err(Error::InvalidLoopRange { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_rate() {
        let mut audio = Audio::default();
        audio.mix_freq = f32::NAN;
        assert!(matches!(audio.validate(), Err(Error::InvalidRate { .. })));
    }

    #[test]
    fn test_validate_rejects_unsorted() {
        let mut audio = Audio::default();
        let mut block = frame();
        block.partials.push(Partial {
            freq: math::ratio_to_ifreq(0.5),
            mag: 0,
            phase: 0,
        });
        audio.contents = vec![block];
        assert!(matches!(
            audio.validate(),
            Err(Error::UnsortedPartials { frame: 0 })
        ));
    }
}
