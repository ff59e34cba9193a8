//! Plan-level synthesis state shared by all voices.
//!
//! Owns the active [`PlanConfig`] on the audio thread and the oscillator
//! state of voice-synced LFOs, which advance once per render block so
//! every voice reads the same value.

use std::sync::Arc;

use crate::morph::config::{ConfigKind, LfoConfig, PlanConfig};
use crate::morph::module::LfoState;
use crate::morph::ops::OpId;
use crate::morph::voice::MorphVoice;

/// A config swap prepared on the control thread.
///
/// Building the snapshot (validation, allocation, instrument lookup)
/// happens before this struct exists; applying it on the audio thread is
/// a pointer swap plus LFO state reconciliation.
pub struct PlanUpdate {
    config: Arc<PlanConfig>,
}

impl PlanUpdate {
    pub fn new(config: Arc<PlanConfig>) -> Self {
        Self { config }
    }

    pub fn generation(&self) -> u64 {
        self.config.generation
    }

    pub fn config(&self) -> &Arc<PlanConfig> {
        &self.config
    }
}

struct SharedLfo {
    id: OpId,
    config: LfoConfig,
    state: LfoState,
}

/// Audio-thread owner of the current plan.
pub struct MorphPlanSynth {
    mix_freq: f32,
    config: Option<Arc<PlanConfig>>,
    shared_lfos: Vec<SharedLfo>,
    shared_values: Vec<(OpId, f64)>,
    voice_seed: u32,
}

impl MorphPlanSynth {
    pub fn new(mix_freq: f32) -> Self {
        Self {
            mix_freq,
            config: None,
            shared_lfos: Vec::new(),
            shared_values: Vec::new(),
            voice_seed: 1,
        }
    }

    pub fn config(&self) -> Option<&Arc<PlanConfig>> {
        self.config.as_ref()
    }

    pub fn mix_freq(&self) -> f32 {
        self.mix_freq
    }

    /// Install a new config and return the previous one so the caller
    /// can send it back to the control thread for deallocation.
    ///
    /// Synced LFOs keep their phase when the operator still exists in
    /// the new plan; edits elsewhere in the graph do not restart
    /// modulation.
    pub fn apply_update(&mut self, update: PlanUpdate) -> Option<Arc<PlanConfig>> {
        let old = self.config.replace(Arc::clone(&update.config));

        let mut next = Vec::new();
        for op in update.config.ops() {
            if let ConfigKind::Lfo(lfo) = &op.kind {
                if lfo.sync_voices {
                    let state = self
                        .shared_lfos
                        .iter()
                        .find(|s| s.id == op.id)
                        .map(|s| s.state.clone())
                        .unwrap_or_else(|| LfoState::new(lfo, 1));
                    next.push(SharedLfo {
                        id: op.id,
                        config: lfo.clone(),
                        state,
                    });
                }
            }
        }
        self.shared_lfos = next;
        self.refresh_values();
        old
    }

    /// Create a voice for the current config, or `None` before the
    /// first update arrived.
    pub fn new_voice(&mut self) -> Option<MorphVoice> {
        let config = self.config.as_ref()?;
        self.voice_seed = self.voice_seed.wrapping_mul(0x9e3779b9).wrapping_add(1);
        Some(MorphVoice::new(
            Arc::clone(config),
            self.mix_freq,
            self.voice_seed | 1,
        ))
    }

    /// Advance synced LFOs by one render block of `n_samples`.
    pub fn process_block(&mut self, n_samples: usize) {
        let dt = n_samples as f64 / self.mix_freq as f64;
        for lfo in &mut self.shared_lfos {
            lfo.state.process(&lfo.config, dt);
        }
        self.refresh_values();
    }

    fn refresh_values(&mut self) {
        self.shared_values.clear();
        self.shared_values
            .extend(self.shared_lfos.iter().map(|s| (s.id, s.state.value())));
    }

    /// Current values of all voice-synced LFOs, for
    /// [`MorphVoice::begin_block`].
    pub fn shared_lfo_values(&self) -> &[(OpId, f64)] {
        &self.shared_values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::config::NoResolver;
    use crate::morph::ops::{LfoWaveType, MorphPlan, OperatorKind};

    fn lfo_plan(sync_voices: bool) -> (MorphPlan, OpId) {
        let mut plan = MorphPlan::new();
        let lfo = plan.add(
            "lfo",
            OperatorKind::Lfo {
                wave: LfoWaveType::SawUp,
                frequency_hz: 1.0,
                depth: 1.0,
                center: 0.0,
                start_phase_deg: 0.0,
                sync_voices,
            },
        );
        plan.add("out", OperatorKind::default_output());
        (plan, lfo)
    }

    #[test]
    fn test_synced_lfo_advances_per_block() {
        let (plan, lfo) = lfo_plan(true);
        let config = PlanConfig::from_plan(&plan, 1, &NoResolver).unwrap();

        let mut synth = MorphPlanSynth::new(48000.0);
        synth.apply_update(PlanUpdate::new(config));
        assert_eq!(synth.shared_lfo_values().len(), 1);

        synth.process_block(12000);
        let (id, value) = synth.shared_lfo_values()[0];
        assert_eq!(id, lfo);
        assert!((value - -0.5).abs() < 1e-9);
    }

    #[test]
    fn test_unsynced_lfo_not_shared() {
        let (plan, _) = lfo_plan(false);
        let config = PlanConfig::from_plan(&plan, 1, &NoResolver).unwrap();

        let mut synth = MorphPlanSynth::new(48000.0);
        synth.apply_update(PlanUpdate::new(config));
        assert!(synth.shared_lfo_values().is_empty());
    }

    #[test]
    fn test_update_returns_old_config_and_keeps_phase() {
        let (plan, lfo) = lfo_plan(true);
        let config1 = PlanConfig::from_plan(&plan, 1, &NoResolver).unwrap();
        let config2 = PlanConfig::from_plan(&plan, 2, &NoResolver).unwrap();

        let mut synth = MorphPlanSynth::new(48000.0);
        assert!(synth.apply_update(PlanUpdate::new(config1)).is_none());
        synth.process_block(12000);

        let old = synth.apply_update(PlanUpdate::new(config2)).unwrap();
        assert_eq!(old.generation, 1);

        // phase survived the swap
        let (_, value) = synth
            .shared_lfo_values()
            .iter()
            .copied()
            .find(|(id, _)| *id == lfo)
            .unwrap();
        assert!((value - -0.5).abs() < 1e-9);
    }

    #[test]
    fn test_no_voice_before_config() {
        let mut synth = MorphPlanSynth::new(48000.0);
        assert!(synth.new_voice().is_none());
    }
}
