//! Real-time spectral morphing synthesis engine.
//!
//! Instruments are encoded offline into a parametric spectral model
//! (see `sonomorph-model`); this crate turns those models back into
//! audio, with the defining feature that several instruments can be
//! blended into sounds "between" them, smoothly and while notes are
//! playing.
//!
//! The engine splits into two worlds:
//!
//! * The control plane ([`Project`], [`MorphPlan`]) is where plans are
//!   edited, instruments loaded and wave sets rebuilt. It may allocate,
//!   lock and block.
//! * The audio plane ([`MidiSynth`] and everything below it) renders
//!   blocks of samples. It sees only immutable [`PlanConfig`] snapshots
//!   and communicates with the control plane exclusively through
//!   channels, so it never waits on a lock or frees a large object.
//!
//! ```no_run
//! use sonomorph_engine::{MidiSynth, Project};
//! use sonomorph_engine::morph::ops::{ControlInput, OperatorKind};
//!
//! let (mut project, events) = Project::new();
//! // ... add instruments, build a plan ...
//! let plan = project.plan_mut();
//! plan.add("out", OperatorKind::default_output());
//! project.publish().unwrap();
//!
//! // audio thread
//! let mut synth = MidiSynth::with_defaults(48000.0);
//! let mut out = vec![0.0f32; 512];
//! events.dispatch(&mut synth);
//! synth.process(&mut out);
//! events.publish_state(&synth);
//! ```

pub mod builder;
pub mod decoder;
pub mod error;
pub mod filter;
pub mod midi;
pub mod morph;
pub mod noise;
pub mod project;

pub use builder::{BuildFn, BuildResult, RebuildWorker};
pub use decoder::{LiveDecoder, LiveDecoderParams, Portamento};
pub use error::{Error, Result};
pub use filter::VoiceFilter;
pub use midi::{MidiSynth, MAX_BLOCK_SIZE};
pub use morph::{MorphPlan, MorphPlanSynth, MorphVoice, OpId, Operator, OperatorKind, PlanConfig};
pub use noise::{NoiseBandPartition, NoiseDecoder};
pub use project::{ControlEvent, Project, SynthEvents, SynthInterface};
