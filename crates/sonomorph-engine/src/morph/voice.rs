//! One playing voice: module graph, decoder and post-processing.

use std::sync::Arc;

use sonomorph_model::{math, WavSetSource};

use crate::decoder::{LiveDecoder, LiveDecoderParams, Portamento};
use crate::filter::VoiceFilter;
use crate::morph::config::{OutputConfig, PlanConfig};
use crate::morph::module::{GraphSource, ModuleSet};
use crate::morph::ops::OpId;

/// Everything needed to play one note of the current plan.
///
/// Owned by a synth voice slot; rebuilt in place when a new config
/// arrives, which re-fetches all frames from the new graph within one
/// frame step.
pub struct MorphVoice {
    config: Arc<PlanConfig>,
    modules: ModuleSet,
    decoder: LiveDecoder,
    portamento: Portamento,
    filter: Option<VoiceFilter>,
    mix_freq: f32,
    lfo_seed: u32,
    gain: f32,
    channel: u8,
    note_freq: f32,
}

impl MorphVoice {
    pub fn new(config: Arc<PlanConfig>, mix_freq: f32, lfo_seed: u32) -> Self {
        let mut voice = Self {
            modules: ModuleSet::from_config(&config, lfo_seed),
            decoder: LiveDecoder::new(mix_freq),
            portamento: Portamento::new(),
            filter: None,
            mix_freq,
            lfo_seed,
            gain: 1.0,
            channel: 0,
            note_freq: 440.0,
            config,
        };
        voice.apply_output_params();
        voice
    }

    pub fn config(&self) -> &Arc<PlanConfig> {
        &self.config
    }

    /// Swap in a new config. The note keeps sounding; decoder state
    /// (phases, frame position) carries over and the next frame fetch
    /// already evaluates the new graph.
    pub fn set_config(&mut self, config: Arc<PlanConfig>) {
        self.modules = ModuleSet::from_config(&config, self.lfo_seed);
        self.config = config;
        self.apply_output_params();
        // sources rebind so the running note continues from the new sets
        self.modules
            .retrigger(self.channel, self.note_freq, 100, self.mix_freq);
    }

    fn output(&self) -> &OutputConfig {
        self.config.output()
    }

    fn apply_output_params(&mut self) {
        let out = self.config.output();
        self.decoder.set_params(LiveDecoderParams {
            sines: out.sines,
            noise: out.noise,
            unison_voices: if out.unison { out.unison_voices } else { 1 },
            unison_detune_cents: out.unison_detune_cents,
            vibrato: out.vibrato,
            vibrato_depth_cents: out.vibrato_depth_cents,
            vibrato_frequency_hz: out.vibrato_frequency_hz,
            vibrato_attack_ms: out.vibrato_attack_ms,
            original_samples: self.decoder.params().original_samples,
        });
    }

    /// Play the stored original recordings instead of the model.
    pub fn set_original_samples(&mut self, enabled: bool) {
        let mut params = self.decoder.params().clone();
        params.original_samples = enabled;
        self.decoder.set_params(params);
    }

    pub fn set_noise_seed(&mut self, seed: u32) {
        self.decoder.set_noise_seed(seed);
    }

    /// Start a new note.
    pub fn retrigger(&mut self, channel: u8, freq: f32, velocity: u8) {
        self.channel = channel;
        self.note_freq = freq;
        self.portamento.retrigger(freq);
        self.gain = math::velocity_gain(velocity, self.output().velocity_sensitivity_db as f32);
        self.filter = self
            .output()
            .filter
            .map(|params| VoiceFilter::new(params, self.mix_freq, freq));

        match self.output().source {
            Some(root) => {
                let mut source = GraphSource::new(&mut self.modules, root);
                self.decoder.retrigger(&mut source, channel, freq, velocity);
            }
            None => {
                let mut source = WavSetSource::empty();
                self.decoder.retrigger(&mut source, channel, freq, velocity);
            }
        }
    }

    /// Legato pitch change (mono mode): glide instead of retriggering.
    pub fn glide_to(&mut self, freq: f32) {
        self.note_freq = freq;
        if self.output().portamento {
            self.portamento
                .glide_to(freq, self.output().portamento_glide_ms, self.mix_freq);
        } else {
            self.portamento.retrigger(freq);
        }
    }

    /// Note off: releases the filter envelope. The amplitude release is
    /// owned by the synth voice wrapper.
    pub fn release(&mut self) {
        if let Some(filter) = &mut self.filter {
            filter.release();
        }
    }

    /// Per-block control update: advance per-voice LFOs and adopt the
    /// synced LFO values computed by the synth.
    pub fn begin_block(&mut self, dt: f64, shared_lfo: &[(OpId, f64)]) {
        self.modules.process_lfos(dt);
        self.modules.set_shared_lfo(shared_lfo);
    }

    pub fn set_signal(&mut self, n: u8, value: f64) {
        self.modules.set_signal(n, value);
    }

    /// Render into `out`, overwriting it.
    pub fn process(&mut self, out: &mut [f32]) {
        let Some(root) = self.output().source else {
            out.fill(0.0);
            return;
        };

        let freq_begin = self.portamento.freq();
        let freq_end = self.portamento.advance(out.len());
        let mut source = GraphSource::new(&mut self.modules, root);
        self.decoder.process(&mut source, freq_begin, freq_end, out);

        if let Some(filter) = &mut self.filter {
            filter.process(out);
        }
        for value in out.iter_mut() {
            *value *= self.gain;
        }
    }

    pub fn done(&self) -> bool {
        self.decoder.done()
    }
}
