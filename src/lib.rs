//! # Sonomorph - Spectral Morphing Synthesizer
//!
//! Real-time synthesis engine that plays sounds "between" instruments.
//!
//! ## Architecture
//!
//! Sonomorph is an umbrella crate that coordinates:
//! - **sonomorph-model** - The parametric spectral format (audio blocks,
//!   wave sets, fixed-point codecs)
//! - **sonomorph-engine** - The synthesis engine (morph graph, voices,
//!   MIDI, control plane)
//!
//! ## Quick Start
//!
//! ```ignore
//! use sonomorph::prelude::*;
//!
//! // Control thread: build a project and publish a plan
//! let (mut project, events) = Project::new();
//! project.add_instrument("piano", piano_set)?;
//! let plan = project.plan_mut();
//! let src = plan.add("piano", OperatorKind::Source { instrument: "piano".into() });
//! let mut out = OperatorKind::default_output();
//! if let OperatorKind::Output { source, .. } = &mut out {
//!     *source = Some(src);
//! }
//! plan.add("out", out);
//! project.publish()?;
//!
//! // Audio thread: render blocks
//! let mut synth = MidiSynth::with_defaults(48000.0);
//! events.dispatch(&mut synth);
//! synth.note_on(0, 69, 100);
//! synth.process(&mut buffer);
//! events.publish_state(&synth);
//! ```

/// Re-export of sonomorph-model for direct access
pub use sonomorph_model as model;

/// Re-export of sonomorph-engine for direct access
pub use sonomorph_engine as engine;

/// Commonly used types.
pub mod prelude {
    pub use sonomorph_engine::morph::ops::{
        ControlInput, FilterParams, FilterType, GridNode, LfoWaveType, OperatorKind,
    };
    pub use sonomorph_engine::{
        MidiSynth, MorphPlan, OpId, PlanConfig, Project, SynthEvents, SynthInterface,
    };
    pub use sonomorph_model::{Audio, AudioBlock, LoopType, Partial, WavSet, WavSetWave};
}
