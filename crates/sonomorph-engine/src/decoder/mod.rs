//! Real-time synthesis from the parametric spectral format.

mod live_decoder;
mod portamento;

pub use live_decoder::{LiveDecoder, LiveDecoderParams};
pub use portamento::Portamento;
