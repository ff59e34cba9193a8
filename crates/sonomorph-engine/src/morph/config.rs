//! Immutable snapshots of a validated plan.
//!
//! A [`PlanConfig`] is built on the control thread from a
//! [`MorphPlan`](super::ops::MorphPlan) that passed validation, with all
//! by-name instrument references resolved to `Arc<WavSet>` handles. The
//! audio thread swaps whole configs atomically and never sees a
//! half-edited graph.

use std::sync::Arc;

use sonomorph_model::WavSet;

use crate::error::Result;
use crate::morph::ops::{
    ControlInput, FilterParams, LfoWaveType, MorphPlan, OpId, OperatorKind,
};

/// Control binding carried into a config; identical to the edit-time
/// form, the name marks which side of the snapshot boundary it lives on.
pub type ConfigInput = ControlInput;

/// Resolves instrument references while snapshotting.
///
/// `Source` operators resolve by instrument name, `WavSource` operators
/// by project object id. Returning `None` is not an error; the operator
/// renders silence until a later config carries the loaded set.
pub trait WavSetResolver {
    fn by_name(&self, instrument: &str) -> Option<Arc<WavSet>>;
    fn by_object_id(&self, object_id: u64) -> Option<Arc<WavSet>>;
}

/// Resolver for plans without instrument references (tests, LFO-only
/// edits).
pub struct NoResolver;

impl WavSetResolver for NoResolver {
    fn by_name(&self, _instrument: &str) -> Option<Arc<WavSet>> {
        None
    }
    fn by_object_id(&self, _object_id: u64) -> Option<Arc<WavSet>> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct ConfigGridNode {
    pub source: Option<OpId>,
    pub delta_db: f64,
}

#[derive(Debug, Clone)]
pub struct LfoConfig {
    pub wave: LfoWaveType,
    pub frequency_hz: f64,
    pub depth: f64,
    pub center: f64,
    pub start_phase_deg: f64,
    pub sync_voices: bool,
}

/// Voice post-processing settings from the output operator.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub source: Option<OpId>,
    pub velocity_sensitivity_db: f64,
    pub sines: bool,
    pub noise: bool,
    pub unison: bool,
    pub unison_voices: u8,
    pub unison_detune_cents: f64,
    pub portamento: bool,
    pub portamento_glide_ms: f64,
    pub vibrato: bool,
    pub vibrato_depth_cents: f64,
    pub vibrato_frequency_hz: f64,
    pub vibrato_attack_ms: f64,
    pub filter: Option<FilterParams>,
}

#[derive(Debug, Clone)]
pub enum ConfigKind {
    Source {
        wav_set: Option<Arc<WavSet>>,
    },
    Linear {
        left: Option<OpId>,
        right: Option<OpId>,
        morphing: ConfigInput,
        db_linear: bool,
    },
    Grid {
        width: usize,
        height: usize,
        nodes: Vec<ConfigGridNode>,
        x_morphing: ConfigInput,
        y_morphing: ConfigInput,
    },
    Lfo(LfoConfig),
    Output(OutputConfig),
}

#[derive(Debug, Clone)]
pub struct ConfigOp {
    pub id: OpId,
    pub kind: ConfigKind,
}

/// Immutable, fully resolved form of a plan.
#[derive(Debug, Clone)]
pub struct PlanConfig {
    /// Monotonic per-project counter; lets tests and debug logs tell
    /// configs apart and proves updates are not lost.
    pub generation: u64,
    ops: Vec<ConfigOp>,
    output: OutputConfig,
}

impl PlanConfig {
    /// Snapshot `plan`. Validation runs first, so a returned config is
    /// always evaluable.
    pub fn from_plan(
        plan: &MorphPlan,
        generation: u64,
        resolver: &dyn WavSetResolver,
    ) -> Result<Arc<PlanConfig>> {
        plan.validate()?;

        let mut ops = Vec::with_capacity(plan.operators().len());
        let mut output = None;
        for op in plan.operators() {
            let kind = match &op.kind {
                OperatorKind::Source { instrument } => ConfigKind::Source {
                    wav_set: resolver.by_name(instrument),
                },
                OperatorKind::WavSource { object_id } => ConfigKind::Source {
                    wav_set: resolver.by_object_id(*object_id),
                },
                OperatorKind::Linear {
                    left,
                    right,
                    morphing,
                    db_linear,
                } => ConfigKind::Linear {
                    left: *left,
                    right: *right,
                    morphing: *morphing,
                    db_linear: *db_linear,
                },
                OperatorKind::Grid {
                    width,
                    height,
                    nodes,
                    x_morphing,
                    y_morphing,
                } => ConfigKind::Grid {
                    width: *width,
                    height: *height,
                    nodes: nodes
                        .iter()
                        .map(|n| ConfigGridNode {
                            source: n.source,
                            delta_db: n.delta_db,
                        })
                        .collect(),
                    x_morphing: *x_morphing,
                    y_morphing: *y_morphing,
                },
                OperatorKind::Lfo {
                    wave,
                    frequency_hz,
                    depth,
                    center,
                    start_phase_deg,
                    sync_voices,
                } => ConfigKind::Lfo(LfoConfig {
                    wave: *wave,
                    frequency_hz: *frequency_hz,
                    depth: *depth,
                    center: *center,
                    start_phase_deg: *start_phase_deg,
                    sync_voices: *sync_voices,
                }),
                OperatorKind::Output {
                    source,
                    velocity_sensitivity_db,
                    sines,
                    noise,
                    unison,
                    unison_voices,
                    unison_detune_cents,
                    portamento,
                    portamento_glide_ms,
                    vibrato,
                    vibrato_depth_cents,
                    vibrato_frequency_hz,
                    vibrato_attack_ms,
                    filter,
                } => {
                    let out = OutputConfig {
                        source: *source,
                        velocity_sensitivity_db: *velocity_sensitivity_db,
                        sines: *sines,
                        noise: *noise,
                        unison: *unison,
                        unison_voices: *unison_voices,
                        unison_detune_cents: *unison_detune_cents,
                        portamento: *portamento,
                        portamento_glide_ms: *portamento_glide_ms,
                        vibrato: *vibrato,
                        vibrato_depth_cents: *vibrato_depth_cents,
                        vibrato_frequency_hz: *vibrato_frequency_hz,
                        vibrato_attack_ms: *vibrato_attack_ms,
                        filter: *filter,
                    };
                    if output.is_none() {
                        output = Some(out.clone());
                    }
                    ConfigKind::Output(out)
                }
            };
            ops.push(ConfigOp { id: op.id, kind });
        }

        // validate() guarantees an output exists
        let output = output.ok_or(crate::error::Error::MissingOutput)?;

        Ok(Arc::new(PlanConfig {
            generation,
            ops,
            output,
        }))
    }

    pub fn op(&self, id: OpId) -> Option<&ConfigOp> {
        self.ops.iter().find(|op| op.id == id)
    }

    pub fn ops(&self) -> &[ConfigOp] {
        &self.ops
    }

    /// The output operator's settings.
    pub fn output(&self) -> &OutputConfig {
        &self.output
    }
}
