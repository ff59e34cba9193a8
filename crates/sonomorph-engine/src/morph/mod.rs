//! The morph graph: operators, immutable configs, and runtime modules.
//!
//! Three layers with distinct threading rules:
//!
//! * [`ops`] holds the edit-time plan. Mutated freely on the control
//!   thread, never touched by audio.
//! * [`config`] is an immutable snapshot of a validated plan. Built on
//!   the control thread, handed to audio behind an `Arc`.
//! * [`module`] / [`voice`] / [`synth`] are the per-voice runtime that
//!   evaluates the snapshot block by block on the audio thread.

pub mod config;
pub mod module;
pub mod ops;
pub mod synth;
pub mod util;
pub mod voice;

pub use config::{ConfigInput, PlanConfig};
pub use ops::{GridNode, LfoWaveType, MorphPlan, OpId, Operator, OperatorKind};
pub use synth::{MorphPlanSynth, PlanUpdate};
pub use voice::MorphVoice;
