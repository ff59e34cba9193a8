//! Spectral data model for sonomorph.
//!
//! Everything the synthesis engine reads at render time lives here:
//!
//! - **[`AudioBlock`]** - one analysis frame: sine partials + noise envelope
//! - **[`Audio`]** - a full encoded sample: frame sequence + loop metadata
//! - **[`WavSet`]** - (note, velocity, channel) -> [`Audio`] mapping
//! - **[`LiveDecoderSource`]** - capability trait that lets wave sets and
//!   morph modules present the same "one virtual instrument" interface
//! - **`math`** - fixed-point log-domain codecs for magnitudes, frequency
//!   ratios and phases
//!
//! All types are immutable during playback; they are replaced wholesale
//! (hot-swap) when rebuilt offline.

pub mod audio;
pub mod block;
pub mod error;
pub mod math;
pub mod source;
pub mod wav_set;

pub use audio::{Audio, LoopType};
pub use block::{AudioBlock, Partial, NOISE_BANDS};
pub use error::{Error, Result};
pub use source::{LiveDecoderSource, WavSetSource};
pub use wav_set::{WavSet, WavSetWave};
