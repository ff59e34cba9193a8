//! The decoder-source capability interface.

use std::sync::Arc;

use crate::audio::Audio;
use crate::block::AudioBlock;
use crate::wav_set::WavSet;

/// Capability interface that presents "one virtual instrument" to a
/// decoder.
///
/// Implemented by raw wave sets ([`WavSetSource`]) and by morph modules,
/// which lets any morph operator feed a downstream consumer and enables
/// arbitrary nesting (grid feeding linear feeding output).
///
/// All methods are called on the audio thread; implementations must not
/// allocate in steady state or block.
pub trait LiveDecoderSource {
    /// Bind to a note event. Selects the entry to play and resets
    /// per-note state.
    fn retrigger(&mut self, channel: u8, freq: f32, velocity: u8, mix_freq: f32);

    /// Metadata of the currently bound sample, or `None` when nothing is
    /// bound (treated as silence downstream).
    fn audio(&self) -> Option<&Audio>;

    /// Copy the frame at `index` into `out`, reusing its allocations.
    ///
    /// Returns false when the index is out of range or no sample is
    /// bound; the caller treats that as "no signal", never as an error.
    fn audio_block(&mut self, index: usize, out: &mut AudioBlock) -> bool;
}

/// A [`LiveDecoderSource`] backed directly by a [`WavSet`].
#[derive(Debug, Clone)]
pub struct WavSetSource {
    wav_set: Option<Arc<WavSet>>,
    active: Option<usize>,
}

impl WavSetSource {
    pub fn new(wav_set: Arc<WavSet>) -> Self {
        Self {
            wav_set: Some(wav_set),
            active: None,
        }
    }

    /// A source with nothing bound; always silent.
    pub fn empty() -> Self {
        Self {
            wav_set: None,
            active: None,
        }
    }

    /// Replace the underlying wave set (hot-swap). Clears the active
    /// entry; the next retrigger rebinds.
    pub fn set_wav_set(&mut self, wav_set: Option<Arc<WavSet>>) {
        self.wav_set = wav_set;
        self.active = None;
    }

    fn active_audio(&self) -> Option<&Audio> {
        let set = self.wav_set.as_deref()?;
        let index = self.active?;
        set.waves.get(index).map(|w| &*w.audio)
    }
}

impl LiveDecoderSource for WavSetSource {
    fn retrigger(&mut self, channel: u8, freq: f32, velocity: u8, _mix_freq: f32) {
        self.active = None;
        let Some(set) = self.wav_set.as_deref() else {
            return;
        };

        // freq -> nearest midi note for entry selection
        let note = (69.0 + 12.0 * (freq / 440.0).log2())
            .round()
            .clamp(0.0, 127.0) as u8;

        if let Some(wave) = set.lookup(channel, note, velocity) {
            self.active = set
                .waves
                .iter()
                .position(|w| std::ptr::eq(w, wave));
        }
    }

    fn audio(&self) -> Option<&Audio> {
        self.active_audio()
    }

    fn audio_block(&mut self, index: usize, out: &mut AudioBlock) -> bool {
        match self.active_audio().and_then(|a| a.contents.get(index)) {
            Some(block) => {
                out.assign(block);
                true
            }
            None => false,
        }
    }
}
