//! Edit-time representation of a morph plan.
//!
//! A [`MorphPlan`] is a small arena of [`Operator`]s that reference each
//! other by stable [`OpId`], never by pointer. The plan is freely mutable
//! on the control thread; [`MorphPlan::validate`] gates the conversion to
//! an immutable [`super::config::PlanConfig`] snapshot, so the audio
//! thread only ever evaluates well-formed graphs.

use crate::error::{Error, Result};

/// Stable identity of an operator within its plan.
///
/// Ids are never reused, so a stale id from a removed operator fails
/// lookup instead of silently hitting a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u32);

/// LFO output waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoWaveType {
    #[default]
    Sine,
    Triangle,
    SawUp,
    SawDown,
    Square,
    /// New random value at each cycle, held.
    RandomSampleHold,
    /// New random target at each cycle, linearly approached.
    RandomLinear,
}

/// Where a continuous control value comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlInput {
    /// Fixed value set from the editing side, in [-1, 1].
    Value(f64),
    /// One of the host-provided control signals (1-based, up to 4).
    Signal(u8),
    /// Output of an LFO operator.
    Op(OpId),
}

impl Default for ControlInput {
    fn default() -> Self {
        ControlInput::Value(0.0)
    }
}

/// One cell of a grid operator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GridNode {
    /// Audio source for this cell; `None` renders as silence.
    pub source: Option<OpId>,
    /// Per-node volume correction in dB, bilinearly interpolated along
    /// with the sources.
    pub delta_db: f64,
}

/// Low-pass ladder slope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    Lp1,
    #[default]
    Lp2,
    Lp3,
    Lp4,
}

/// Cutoff-envelope filter settings of an output operator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    pub filter_type: FilterType,
    /// ADSR times in percent of a 2 second full scale, quadratic taper.
    pub attack: f64,
    pub decay: f64,
    /// Sustain level in percent.
    pub sustain: f64,
    pub release: f64,
    /// Envelope depth in semitones applied to the cutoff.
    pub depth_semitones: f64,
    /// How much the played note shifts the cutoff (0 = none, 1 = full).
    pub key_tracking: f64,
    pub cutoff_hz: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            filter_type: FilterType::default(),
            attack: 15.0,
            decay: 50.0,
            sustain: 70.0,
            release: 50.0,
            depth_semitones: 24.0,
            key_tracking: 0.5,
            cutoff_hz: 500.0,
        }
    }
}

/// The behavior of one operator.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorKind {
    /// Plays an instrument from the project index, selected by name.
    Source { instrument: String },
    /// Plays a user-provided sample, referenced by project object id.
    WavSource { object_id: u64 },
    /// Two-way morph between `left` and `right`.
    Linear {
        left: Option<OpId>,
        right: Option<OpId>,
        morphing: ControlInput,
        db_linear: bool,
    },
    /// Bilinear morph across a grid of sources.
    Grid {
        width: usize,
        height: usize,
        /// Row-major, `width * height` entries.
        nodes: Vec<GridNode>,
        x_morphing: ControlInput,
        y_morphing: ControlInput,
    },
    /// Control-rate modulator, outputs in [-1, 1].
    Lfo {
        wave: LfoWaveType,
        frequency_hz: f64,
        depth: f64,
        center: f64,
        start_phase_deg: f64,
        /// All voices share one phase when set.
        sync_voices: bool,
    },
    /// The single sink: voice-level post-processing and the connection
    /// to the synthesis engine.
    Output {
        source: Option<OpId>,
        velocity_sensitivity_db: f64,
        sines: bool,
        noise: bool,
        unison: bool,
        unison_voices: u8,
        unison_detune_cents: f64,
        portamento: bool,
        portamento_glide_ms: f64,
        vibrato: bool,
        vibrato_depth_cents: f64,
        vibrato_frequency_hz: f64,
        vibrato_attack_ms: f64,
        filter: Option<FilterParams>,
    },
}

impl OperatorKind {
    /// Default output operator: sines and noise on, no extras.
    pub fn default_output() -> Self {
        OperatorKind::Output {
            source: None,
            velocity_sensitivity_db: 24.0,
            sines: true,
            noise: true,
            unison: false,
            unison_voices: 2,
            unison_detune_cents: 6.0,
            portamento: false,
            portamento_glide_ms: 200.0,
            vibrato: false,
            vibrato_depth_cents: 10.0,
            vibrato_frequency_hz: 4.5,
            vibrato_attack_ms: 0.0,
            filter: None,
        }
    }

    /// Whether this operator produces spectral audio (as opposed to a
    /// control signal or being a sink).
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            OperatorKind::Source { .. }
                | OperatorKind::WavSource { .. }
                | OperatorKind::Linear { .. }
                | OperatorKind::Grid { .. }
        )
    }
}

/// One node of the plan arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub id: OpId,
    /// User-visible label; not interpreted by the engine.
    pub name: String,
    pub kind: OperatorKind,
}

/// Mutable morph plan, owned by the control thread.
#[derive(Debug, Clone, Default)]
pub struct MorphPlan {
    ops: Vec<Operator>,
    next_id: u32,
}

impl MorphPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operator, returning its id.
    pub fn add(&mut self, name: impl Into<String>, kind: OperatorKind) -> OpId {
        let id = OpId(self.next_id);
        self.next_id += 1;
        self.ops.push(Operator {
            id,
            name: name.into(),
            kind,
        });
        id
    }

    /// Remove an operator and clear every reference to it, so the plan
    /// stays editable without dangling ids.
    pub fn remove(&mut self, id: OpId) {
        self.ops.retain(|op| op.id != id);
        for op in &mut self.ops {
            match &mut op.kind {
                OperatorKind::Linear {
                    left,
                    right,
                    morphing,
                    ..
                } => {
                    if *left == Some(id) {
                        *left = None;
                    }
                    if *right == Some(id) {
                        *right = None;
                    }
                    if *morphing == ControlInput::Op(id) {
                        *morphing = ControlInput::default();
                    }
                }
                OperatorKind::Grid {
                    nodes,
                    x_morphing,
                    y_morphing,
                    ..
                } => {
                    for node in nodes {
                        if node.source == Some(id) {
                            node.source = None;
                        }
                    }
                    if *x_morphing == ControlInput::Op(id) {
                        *x_morphing = ControlInput::default();
                    }
                    if *y_morphing == ControlInput::Op(id) {
                        *y_morphing = ControlInput::default();
                    }
                }
                OperatorKind::Output { source, .. } => {
                    if *source == Some(id) {
                        *source = None;
                    }
                }
                OperatorKind::Source { .. }
                | OperatorKind::WavSource { .. }
                | OperatorKind::Lfo { .. } => {}
            }
        }
    }

    pub fn operator(&self, id: OpId) -> Option<&Operator> {
        self.ops.iter().find(|op| op.id == id)
    }

    pub fn operator_mut(&mut self, id: OpId) -> Option<&mut Operator> {
        self.ops.iter_mut().find(|op| op.id == id)
    }

    pub fn operators(&self) -> &[Operator] {
        &self.ops
    }

    /// The plan's output operator (the first one, if several exist).
    pub fn output(&self) -> Option<&Operator> {
        self.ops
            .iter()
            .find(|op| matches!(op.kind, OperatorKind::Output { .. }))
    }

    /// Check the plan is a well-formed graph: an output exists, all
    /// references resolve to operators of the right type, grids have
    /// consistent shape, parameters are in range and the audio graph is
    /// acyclic.
    pub fn validate(&self) -> Result<()> {
        let output = self.ops.iter().find(|op| matches!(op.kind, OperatorKind::Output { .. }));
        if output.is_none() {
            return Err(Error::MissingOutput);
        }

        for op in &self.ops {
            match &op.kind {
                OperatorKind::Linear {
                    left,
                    right,
                    morphing,
                    ..
                } => {
                    self.check_audio_ref(op.id, *left)?;
                    self.check_audio_ref(op.id, *right)?;
                    self.check_control(op.id, morphing)?;
                }
                OperatorKind::Grid {
                    width,
                    height,
                    nodes,
                    x_morphing,
                    y_morphing,
                } => {
                    if *width == 0 || *height == 0 || nodes.len() != width * height {
                        return Err(Error::BadGridShape {
                            width: *width,
                            height: *height,
                            nodes: nodes.len(),
                        });
                    }
                    for node in nodes {
                        self.check_audio_ref(op.id, node.source)?;
                    }
                    self.check_control(op.id, x_morphing)?;
                    self.check_control(op.id, y_morphing)?;
                }
                OperatorKind::Lfo { frequency_hz, .. } => {
                    if !(*frequency_hz > 0.0 && *frequency_hz <= 100.0) {
                        return Err(Error::InvalidParameter {
                            name: "lfo frequency_hz",
                            value: *frequency_hz,
                        });
                    }
                }
                OperatorKind::Output {
                    source,
                    unison,
                    unison_voices,
                    ..
                } => {
                    self.check_audio_ref(op.id, *source)?;
                    // the voice count only matters while unison is on;
                    // a stale value behind a disabled flag is fine
                    if *unison && !(2..=7).contains(unison_voices) {
                        return Err(Error::InvalidParameter {
                            name: "unison_voices",
                            value: *unison_voices as f64,
                        });
                    }
                }
                OperatorKind::Source { .. } | OperatorKind::WavSource { .. } => {}
            }
        }

        self.check_acyclic()
    }

    fn check_audio_ref(&self, referrer: OpId, target: Option<OpId>) -> Result<()> {
        let Some(target) = target else {
            return Ok(());
        };
        match self.operator(target) {
            None => Err(Error::DanglingReference { referrer, target }),
            Some(op) if op.kind.is_audio() => Ok(()),
            Some(_) => Err(Error::TypeMismatch {
                referrer,
                target,
                expected: "audio",
            }),
        }
    }

    fn check_control(&self, referrer: OpId, input: &ControlInput) -> Result<()> {
        match input {
            ControlInput::Value(_) => Ok(()),
            ControlInput::Signal(n) => {
                if (1..=4).contains(n) {
                    Ok(())
                } else {
                    Err(Error::InvalidParameter {
                        name: "control signal",
                        value: *n as f64,
                    })
                }
            }
            ControlInput::Op(target) => match self.operator(*target) {
                None => Err(Error::DanglingReference {
                    referrer,
                    target: *target,
                }),
                Some(op) if matches!(op.kind, OperatorKind::Lfo { .. }) => Ok(()),
                Some(_) => Err(Error::TypeMismatch {
                    referrer,
                    target: *target,
                    expected: "control",
                }),
            },
        }
    }

    fn audio_deps(&self, op: &Operator, out: &mut Vec<OpId>) {
        out.clear();
        match &op.kind {
            OperatorKind::Linear { left, right, .. } => {
                out.extend(left.iter().chain(right.iter()));
            }
            OperatorKind::Grid { nodes, .. } => {
                out.extend(nodes.iter().filter_map(|n| n.source));
            }
            OperatorKind::Output { source, .. } => {
                out.extend(source.iter());
            }
            _ => {}
        }
    }

    fn check_acyclic(&self) -> Result<()> {
        // 0 = unvisited, 1 = on stack, 2 = done
        let mut state = vec![0u8; self.ops.len()];

        fn visit(plan: &MorphPlan, index: usize, state: &mut [u8]) -> Result<()> {
            if state[index] == 2 {
                return Ok(());
            }
            if state[index] == 1 {
                return Err(Error::DependencyCycle(plan.ops[index].id));
            }
            state[index] = 1;
            let mut deps = Vec::new();
            plan.audio_deps(&plan.ops[index], &mut deps);
            for dep in deps {
                if let Some(pos) = plan.ops.iter().position(|op| op.id == dep) {
                    visit(plan, pos, state)?;
                }
            }
            state[index] = 2;
            Ok(())
        }

        for index in 0..self.ops.len() {
            visit(self, index, &mut state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(name: &str) -> OperatorKind {
        OperatorKind::Source {
            instrument: name.into(),
        }
    }

    fn linear(left: Option<OpId>, right: Option<OpId>) -> OperatorKind {
        OperatorKind::Linear {
            left,
            right,
            morphing: ControlInput::Value(0.0),
            db_linear: true,
        }
    }

    fn plan_with_output(source_id: Option<OpId>, plan: &mut MorphPlan) -> OpId {
        let mut kind = OperatorKind::default_output();
        if let OperatorKind::Output { source, .. } = &mut kind {
            *source = source_id;
        }
        plan.add("out", kind)
    }

    #[test]
    fn test_valid_linear_plan() {
        let mut plan = MorphPlan::new();
        let a = plan.add("a", source("piano"));
        let b = plan.add("b", source("flute"));
        let lin = plan.add("morph", linear(Some(a), Some(b)));
        plan_with_output(Some(lin), &mut plan);
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_missing_output() {
        let mut plan = MorphPlan::new();
        plan.add("a", source("piano"));
        assert!(matches!(plan.validate(), Err(Error::MissingOutput)));
    }

    #[test]
    fn test_remove_clears_references() {
        let mut plan = MorphPlan::new();
        let a = plan.add("a", source("piano"));
        let lin = plan.add("morph", linear(Some(a), None));
        plan_with_output(Some(lin), &mut plan);

        plan.remove(a);
        assert!(plan.operator(a).is_none());
        match &plan.operator(lin).unwrap().kind {
            OperatorKind::Linear { left, .. } => assert!(left.is_none()),
            _ => unreachable!(),
        }
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let mut plan = MorphPlan::new();
        let lfo = plan.add(
            "lfo",
            OperatorKind::Lfo {
                wave: LfoWaveType::Sine,
                frequency_hz: 1.0,
                depth: 1.0,
                center: 0.0,
                start_phase_deg: 0.0,
                sync_voices: false,
            },
        );
        let lin = plan.add("morph", linear(Some(lfo), None));
        plan_with_output(Some(lin), &mut plan);
        assert!(matches!(plan.validate(), Err(Error::TypeMismatch { .. })));
    }

    #[test]
    fn test_cycle_detected() {
        let mut plan = MorphPlan::new();
        let a = plan.add("a", linear(None, None));
        let b = plan.add("b", linear(Some(a), None));
        if let OperatorKind::Linear { left, .. } = &mut plan.operator_mut(a).unwrap().kind {
            *left = Some(b);
        }
        plan_with_output(Some(b), &mut plan);
        assert!(matches!(plan.validate(), Err(Error::DependencyCycle(_))));
    }

    #[test]
    fn test_grid_shape_checked() {
        let mut plan = MorphPlan::new();
        let grid = plan.add(
            "grid",
            OperatorKind::Grid {
                width: 2,
                height: 2,
                nodes: vec![GridNode::default(); 3],
                x_morphing: ControlInput::Value(0.0),
                y_morphing: ControlInput::Value(0.0),
            },
        );
        plan_with_output(Some(grid), &mut plan);
        assert!(matches!(plan.validate(), Err(Error::BadGridShape { .. })));
    }

    #[test]
    fn test_unison_voices_checked_only_when_enabled() {
        let out_with = |unison_on: bool, voices: u8| {
            let mut plan = MorphPlan::new();
            let mut kind = OperatorKind::default_output();
            if let OperatorKind::Output {
                unison,
                unison_voices,
                ..
            } = &mut kind
            {
                *unison = unison_on;
                *unison_voices = voices;
            }
            plan.add("out", kind);
            plan
        };

        assert!(out_with(false, 1).validate().is_ok());
        assert!(out_with(true, 3).validate().is_ok());
        assert!(matches!(
            out_with(true, 1).validate(),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_ids_not_reused() {
        let mut plan = MorphPlan::new();
        let a = plan.add("a", source("piano"));
        plan.remove(a);
        let b = plan.add("b", source("flute"));
        assert_ne!(a, b);
        assert!(plan.operator(a).is_none());
    }

    #[test]
    fn test_lfo_reference_as_control() {
        let mut plan = MorphPlan::new();
        let lfo = plan.add(
            "lfo",
            OperatorKind::Lfo {
                wave: LfoWaveType::Triangle,
                frequency_hz: 2.0,
                depth: 0.5,
                center: 0.0,
                start_phase_deg: 90.0,
                sync_voices: true,
            },
        );
        let a = plan.add("a", source("piano"));
        let b = plan.add("b", source("flute"));
        let lin = plan.add(
            "morph",
            OperatorKind::Linear {
                left: Some(a),
                right: Some(b),
                morphing: ControlInput::Op(lfo),
                db_linear: true,
            },
        );
        plan_with_output(Some(lin), &mut plan);
        assert!(plan.validate().is_ok());
    }
}
