//! Per-voice runtime modules.
//!
//! A [`ModuleSet`] instantiates one module per config operator and
//! evaluates the graph pull-style: asking the output's source for frame
//! `index` recurses through linear and grid modules down to the wave
//! sets. Evaluation runs on the audio thread and is allocation-free in
//! steady state; every module owns the scratch blocks it morphs into.

use std::f64::consts::TAU;
use std::mem;
use std::sync::Arc;

use smallvec::SmallVec;

use sonomorph_model::{Audio, AudioBlock, LiveDecoderSource, WavSetSource};

use crate::morph::config::{ConfigGridNode, ConfigInput, ConfigKind, LfoConfig, PlanConfig};
use crate::morph::ops::{LfoWaveType, OpId};
use crate::morph::util::{self, MorphScratch};

/// Oscillator state of one LFO instance.
#[derive(Debug, Clone)]
pub struct LfoState {
    phase: f64,
    last_random: f64,
    next_random: f64,
    rng_state: u32,
    value: f64,
}

impl LfoState {
    pub fn new(config: &LfoConfig, seed: u32) -> Self {
        let mut state = Self {
            phase: 0.0,
            last_random: 0.0,
            next_random: 0.0,
            rng_state: if seed == 0 { 1 } else { seed },
            value: 0.0,
        };
        state.restart(config);
        state
    }

    /// Reset to the configured start phase (note-on for per-voice LFOs).
    pub fn restart(&mut self, config: &LfoConfig) {
        self.phase = (config.start_phase_deg / 360.0).rem_euclid(1.0);
        self.last_random = self.random();
        self.next_random = self.random();
        self.update_value(config);
    }

    fn random(&mut self) -> f64 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        (self.rng_state as f64 / u32::MAX as f64) * 2.0 - 1.0
    }

    /// Advance by `dt` seconds and recompute the output value.
    pub fn process(&mut self, config: &LfoConfig, dt: f64) {
        self.phase += config.frequency_hz * dt;
        while self.phase >= 1.0 {
            self.phase -= 1.0;
            self.last_random = self.next_random;
            self.next_random = self.random();
        }
        self.update_value(config);
    }

    fn update_value(&mut self, config: &LfoConfig) {
        let raw = match config.wave {
            LfoWaveType::Sine => (self.phase * TAU).sin(),
            LfoWaveType::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
            LfoWaveType::SawUp => 2.0 * self.phase - 1.0,
            LfoWaveType::SawDown => 1.0 - 2.0 * self.phase,
            LfoWaveType::Square => {
                if self.phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoWaveType::RandomSampleHold => self.last_random,
            LfoWaveType::RandomLinear => {
                self.last_random + (self.next_random - self.last_random) * self.phase
            }
        };
        self.value = (raw * config.depth + config.center).clamp(-1.0, 1.0);
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.value
    }
}

#[derive(Debug)]
struct SourceModule {
    source: WavSetSource,
}

#[derive(Debug)]
struct LinearModule {
    left: Option<OpId>,
    right: Option<OpId>,
    morphing: ConfigInput,
    db_linear: bool,
    left_block: AudioBlock,
    right_block: AudioBlock,
    scratch: MorphScratch,
}

#[derive(Debug)]
struct GridModule {
    width: usize,
    height: usize,
    nodes: Vec<ConfigGridNode>,
    x_morphing: ConfigInput,
    y_morphing: ConfigInput,
    corner_a: AudioBlock,
    corner_b: AudioBlock,
    row_low: AudioBlock,
    row_high: AudioBlock,
    scratch: MorphScratch,
}

#[derive(Debug)]
struct LfoModule {
    config: LfoConfig,
    state: LfoState,
}

/// Runtime form of one operator. `Empty` is the placeholder left behind
/// while a module is temporarily moved out for recursive evaluation.
#[derive(Debug, Default)]
enum Module {
    #[default]
    Empty,
    Source(SourceModule),
    Linear(LinearModule),
    Grid(GridModule),
    Lfo(LfoModule),
}

/// All modules of one voice plus the control values they read.
#[derive(Debug, Default)]
pub struct ModuleSet {
    modules: Vec<(OpId, Module)>,
    signals: [f64; 4],
    shared_lfo: SmallVec<[(OpId, f64); 4]>,
}

impl ModuleSet {
    /// Instantiate modules for `config`. `lfo_seed` decorrelates random
    /// LFO waveforms between voices.
    pub fn from_config(config: &PlanConfig, lfo_seed: u32) -> Self {
        let mut modules = Vec::with_capacity(config.ops().len());
        for op in config.ops() {
            let module = match &op.kind {
                ConfigKind::Source { wav_set } => Module::Source(SourceModule {
                    source: match wav_set {
                        Some(set) => WavSetSource::new(Arc::clone(set)),
                        None => WavSetSource::empty(),
                    },
                }),
                ConfigKind::Linear {
                    left,
                    right,
                    morphing,
                    db_linear,
                } => Module::Linear(LinearModule {
                    left: *left,
                    right: *right,
                    morphing: *morphing,
                    db_linear: *db_linear,
                    left_block: AudioBlock::with_capacity(0),
                    right_block: AudioBlock::with_capacity(0),
                    scratch: MorphScratch::default(),
                }),
                ConfigKind::Grid {
                    width,
                    height,
                    nodes,
                    x_morphing,
                    y_morphing,
                } => Module::Grid(GridModule {
                    width: *width,
                    height: *height,
                    nodes: nodes.clone(),
                    x_morphing: *x_morphing,
                    y_morphing: *y_morphing,
                    corner_a: AudioBlock::with_capacity(0),
                    corner_b: AudioBlock::with_capacity(0),
                    row_low: AudioBlock::with_capacity(0),
                    row_high: AudioBlock::with_capacity(0),
                    scratch: MorphScratch::default(),
                }),
                ConfigKind::Lfo(lfo) => Module::Lfo(LfoModule {
                    state: LfoState::new(lfo, lfo_seed),
                    config: lfo.clone(),
                }),
                ConfigKind::Output(_) => continue,
            };
            modules.push((op.id, module));
        }
        Self {
            modules,
            signals: [0.0; 4],
            shared_lfo: SmallVec::new(),
        }
    }

    /// Set one of the host control signals (1-based).
    pub fn set_signal(&mut self, n: u8, value: f64) {
        if let Some(slot) = self.signals.get_mut(n as usize - 1) {
            *slot = value.clamp(-1.0, 1.0);
        }
    }

    /// Per-block values for voice-synced LFOs, computed by the synth.
    pub fn set_shared_lfo(&mut self, values: &[(OpId, f64)]) {
        self.shared_lfo.clear();
        self.shared_lfo.extend_from_slice(values);
    }

    /// Bind every source to a note event and restart per-voice LFOs.
    pub fn retrigger(&mut self, channel: u8, freq: f32, velocity: u8, mix_freq: f32) {
        for (_, module) in &mut self.modules {
            match module {
                Module::Source(m) => m.source.retrigger(channel, freq, velocity, mix_freq),
                Module::Lfo(m) => {
                    if !m.config.sync_voices {
                        m.state.restart(&m.config);
                    }
                }
                _ => {}
            }
        }
    }

    /// Advance per-voice LFOs by `dt` seconds (once per render block).
    pub fn process_lfos(&mut self, dt: f64) {
        for (_, module) in &mut self.modules {
            if let Module::Lfo(m) = module {
                if !m.config.sync_voices {
                    m.state.process(&m.config, dt);
                }
            }
        }
    }

    /// Resolve a control binding to its current value.
    pub fn control_value(&self, input: &ConfigInput) -> f64 {
        match input {
            ConfigInput::Value(v) => *v,
            ConfigInput::Signal(n) => self
                .signals
                .get(*n as usize - 1)
                .copied()
                .unwrap_or(0.0),
            ConfigInput::Op(id) => {
                if let Some((_, v)) = self.shared_lfo.iter().find(|(lid, _)| lid == id) {
                    return *v;
                }
                match self.find(*id) {
                    Some(Module::Lfo(m)) => m.state.value(),
                    _ => 0.0,
                }
            }
        }
    }

    fn find(&self, id: OpId) -> Option<&Module> {
        self.modules
            .iter()
            .find(|(mid, _)| *mid == id)
            .map(|(_, m)| m)
    }

    fn position(&self, id: OpId) -> Option<usize> {
        self.modules.iter().position(|(mid, _)| *mid == id)
    }

    /// Metadata of the sample driving frame timing for `id`: the first
    /// bound source reachable from it.
    pub fn audio(&self, id: OpId) -> Option<&Audio> {
        match self.find(id)? {
            Module::Source(m) => m.source.audio(),
            Module::Linear(m) => m
                .left
                .and_then(|l| self.audio(l))
                .or_else(|| m.right.and_then(|r| self.audio(r))),
            Module::Grid(m) => m
                .nodes
                .iter()
                .filter_map(|n| n.source)
                .find_map(|s| self.audio(s)),
            Module::Lfo(_) | Module::Empty => None,
        }
    }

    /// Evaluate frame `index` of operator `id` into `out`.
    ///
    /// Recursion temporarily moves the module out of its slot so the
    /// rest of the set stays reachable; validation has already ruled out
    /// cycles, so a module can never meet its own `Empty` placeholder.
    pub fn audio_block(&mut self, id: OpId, index: usize, out: &mut AudioBlock) -> bool {
        let Some(slot) = self.position(id) else {
            return false;
        };
        let mut module = mem::take(&mut self.modules[slot].1);
        let have = match &mut module {
            Module::Source(m) => m.source.audio_block(index, out),
            Module::Linear(m) => m.eval(self, index, out),
            Module::Grid(m) => m.eval(self, index, out),
            Module::Lfo(_) | Module::Empty => false,
        };
        self.modules[slot].1 = module;
        have
    }
}

impl LinearModule {
    fn eval(&mut self, set: &mut ModuleSet, index: usize, out: &mut AudioBlock) -> bool {
        let morphing = set.control_value(&self.morphing).clamp(-1.0, 1.0);
        let have_left = self
            .left
            .is_some_and(|id| set.audio_block(id, index, &mut self.left_block));
        let have_right = self
            .right
            .is_some_and(|id| set.audio_block(id, index, &mut self.right_block));
        util::morph(
            out,
            have_left.then_some(&self.left_block),
            have_right.then_some(&self.right_block),
            morphing,
            self.db_linear,
            &mut self.scratch,
        )
    }
}

impl GridModule {
    fn node(&self, x: usize, y: usize) -> &ConfigGridNode {
        &self.nodes[y * self.width + x]
    }

    fn fetch(
        &self,
        set: &mut ModuleSet,
        x: usize,
        y: usize,
        index: usize,
        out: &mut AudioBlock,
    ) -> bool {
        match self.node(x, y).source {
            Some(id) => set.audio_block(id, index, out),
            None => false,
        }
    }

    /// Morph one grid row at `y` into `out` for horizontal position
    /// (`x1`, `x2`, `fx`).
    fn eval_row(
        &mut self,
        set: &mut ModuleSet,
        y: usize,
        x1: usize,
        x2: usize,
        fx: f64,
        index: usize,
        out: &mut AudioBlock,
    ) -> bool {
        if x1 == x2 {
            return self.fetch(set, x1, y, index, out);
        }
        let have_a = {
            let mut a = mem::take(&mut self.corner_a);
            let have = self.fetch(set, x1, y, index, &mut a);
            self.corner_a = a;
            have
        };
        let have_b = {
            let mut b = mem::take(&mut self.corner_b);
            let have = self.fetch(set, x2, y, index, &mut b);
            self.corner_b = b;
            have
        };
        util::morph(
            out,
            have_a.then_some(&self.corner_a),
            have_b.then_some(&self.corner_b),
            fx * 2.0 - 1.0,
            true,
            &mut self.scratch,
        )
    }

    fn eval(&mut self, set: &mut ModuleSet, index: usize, out: &mut AudioBlock) -> bool {
        let x = set.control_value(&self.x_morphing).clamp(-1.0, 1.0);
        let y = set.control_value(&self.y_morphing).clamp(-1.0, 1.0);

        // map [-1, 1] to a cell and a fraction inside it
        let (x1, x2, fx) = span(x, self.width);
        let (y1, y2, fy) = span(y, self.height);

        let have = if y1 == y2 {
            let mut row = mem::take(&mut self.row_low);
            let have = self.eval_row(set, y1, x1, x2, fx, index, &mut row);
            if have {
                out.assign(&row);
            }
            self.row_low = row;
            have
        } else {
            let mut low = mem::take(&mut self.row_low);
            let mut high = mem::take(&mut self.row_high);
            let have_low = self.eval_row(set, y1, x1, x2, fx, index, &mut low);
            let have_high = self.eval_row(set, y2, x1, x2, fx, index, &mut high);
            self.row_low = low;
            self.row_high = high;
            util::morph(
                out,
                have_low.then_some(&self.row_low),
                have_high.then_some(&self.row_high),
                fy * 2.0 - 1.0,
                true,
                &mut self.scratch,
            )
        };

        if have {
            let delta_db = self.node(x1, y1).delta_db * (1.0 - fx) * (1.0 - fy)
                + self.node(x2, y1).delta_db * fx * (1.0 - fy)
                + self.node(x1, y2).delta_db * (1.0 - fx) * fy
                + self.node(x2, y2).delta_db * fx * fy;
            apply_delta_db(out, delta_db);
        }
        have
    }
}

/// Map a control value in [-1, 1] to the pair of adjacent grid lines it
/// falls between and the fraction toward the upper one.
fn span(control: f64, n: usize) -> (usize, usize, f64) {
    if n <= 1 {
        return (0, 0, 0.0);
    }
    let pos = (control + 1.0) / 2.0 * (n - 1) as f64;
    let lower = (pos.floor() as usize).min(n - 2);
    (lower, lower + 1, pos - lower as f64)
}

/// Shift all magnitudes of `block` by `delta_db`, saturating at the
/// representation bounds. Silent noise bands (0) stay silent.
fn apply_delta_db(block: &mut AudioBlock, delta_db: f64) {
    let delta_idb = (delta_db * 64.0).round() as i32;
    if delta_idb == 0 {
        return;
    }
    for p in &mut block.partials {
        p.mag = (p.mag as i32 + delta_idb).clamp(0, u16::MAX as i32) as u16;
    }
    for band in &mut block.noise {
        if *band != 0 {
            *band = (*band as i32 + delta_idb).clamp(0, u16::MAX as i32) as u16;
        }
    }
}

/// Presents a subgraph of a [`ModuleSet`] to a decoder.
pub struct GraphSource<'a> {
    set: &'a mut ModuleSet,
    root: OpId,
}

impl<'a> GraphSource<'a> {
    pub fn new(set: &'a mut ModuleSet, root: OpId) -> Self {
        Self { set, root }
    }
}

impl LiveDecoderSource for GraphSource<'_> {
    fn retrigger(&mut self, channel: u8, freq: f32, velocity: u8, mix_freq: f32) {
        self.set.retrigger(channel, freq, velocity, mix_freq);
    }

    fn audio(&self) -> Option<&Audio> {
        self.set.audio(self.root)
    }

    fn audio_block(&mut self, index: usize, out: &mut AudioBlock) -> bool {
        self.set.audio_block(self.root, index, out)
    }
}
