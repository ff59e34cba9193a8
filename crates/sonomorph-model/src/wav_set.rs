//! Wave sets: mapping from (note, velocity, channel) to encoded samples.

use std::sync::Arc;

use crate::audio::Audio;
use crate::error::{Error, Result};

/// One playable entry of a [`WavSet`].
#[derive(Debug, Clone)]
pub struct WavSetWave {
    /// MIDI note this entry was encoded for (0-127).
    pub midi_note: u8,
    /// Channel the entry applies to.
    pub channel: u8,
    /// Lowest velocity this entry covers (inclusive).
    pub velocity_range_min: u8,
    /// Highest velocity this entry covers (inclusive).
    pub velocity_range_max: u8,
    /// The encoded sample.
    pub audio: Arc<Audio>,
}

/// Collection of per-note/velocity samples forming one playable
/// instrument.
///
/// Loaded or rebuilt atomically on the control plane; the audio thread
/// only ever sees complete sets behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct WavSet {
    pub waves: Vec<WavSetWave>,
}

impl WavSet {
    /// Build a single-entry set covering all notes and velocities.
    pub fn from_single(audio: Audio) -> Self {
        Self {
            waves: vec![WavSetWave {
                midi_note: 69,
                channel: 0,
                velocity_range_min: 0,
                velocity_range_max: 127,
                audio: Arc::new(audio),
            }],
        }
    }

    /// Find the best entry for a note event.
    ///
    /// Filters by channel and velocity range, then picks the entry whose
    /// `midi_note` is nearest to the requested note. Returns `None` for an
    /// empty set or when no entry matches the channel/velocity.
    pub fn lookup(&self, channel: u8, midi_note: u8, velocity: u8) -> Option<&WavSetWave> {
        self.waves
            .iter()
            .filter(|w| w.channel == channel)
            .filter(|w| velocity >= w.velocity_range_min && velocity <= w.velocity_range_max)
            .min_by_key(|w| (w.midi_note as i32 - midi_note as i32).abs())
    }

    /// Validate all entries.
    pub fn validate(&self) -> Result<()> {
        if self.waves.is_empty() {
            return Err(Error::EmptyWavSet);
        }
        for wave in &self.waves {
            if wave.velocity_range_min > wave.velocity_range_max {
                return Err(Error::InvalidVelocityRange {
                    min: wave.velocity_range_min,
                    max: wave.velocity_range_max,
                });
            }
            wave.audio.validate()?;
        }
        Ok(())
    }
}
