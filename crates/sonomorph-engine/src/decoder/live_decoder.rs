//! Oscillator-bank decoder from spectral frames to audio samples.

use std::f32::consts::TAU;

use sonomorph_model::{math, AudioBlock, LiveDecoderSource, LoopType};

use crate::noise::NoiseDecoder;

/// Frames are re-fetched at every step boundary, so parameter changes
/// upstream (morph position, config swaps) take effect within one frame
/// step.
#[derive(Debug, Clone)]
pub struct LiveDecoderParams {
    pub sines: bool,
    pub noise: bool,
    /// 1 disables unison.
    pub unison_voices: u8,
    pub unison_detune_cents: f64,
    pub vibrato: bool,
    pub vibrato_depth_cents: f64,
    pub vibrato_frequency_hz: f64,
    pub vibrato_attack_ms: f64,
    /// Play the stored original recording instead of the model, for
    /// A/B comparison.
    pub original_samples: bool,
}

impl Default for LiveDecoderParams {
    fn default() -> Self {
        Self {
            sines: true,
            noise: true,
            unison_voices: 1,
            unison_detune_cents: 6.0,
            vibrato: false,
            vibrato_depth_cents: 10.0,
            vibrato_frequency_hz: 4.5,
            vibrato_attack_ms: 0.0,
            original_samples: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Osc {
    ratio: f32,
    amp_from: f32,
    amp_to: f32,
}

/// Streams one note from a [`LiveDecoderSource`].
///
/// The frame timeline is resampled by the pitch ratio: the played
/// frequency scales the partial frequencies and the rate frames are
/// consumed, so a one-shot played an octave up finishes in half the
/// time.
pub struct LiveDecoder {
    params: LiveDecoderParams,
    mix_freq: f32,

    active: bool,
    done: bool,

    // copied from the bound sample at retrigger
    fundamental_freq: f32,
    /// Output samples per frame when played at the fundamental.
    frame_step_samples: f64,
    frame_step_out: usize,
    n_frames: usize,
    loop_type: LoopType,
    loop_start: f64,
    loop_end: f64,
    attack_start_ms: f64,
    attack_end_ms: f64,

    env_frame: f64,
    pos_in_frame: usize,
    note_time_ms: f64,

    osc: Vec<Osc>,
    phases: Vec<f32>,
    detune: Vec<f32>,
    unison_gain: f32,

    prev_block: AudioBlock,
    cur_block: AudioBlock,
    have_prev: bool,
    have_cur: bool,

    noise_decoder: Option<NoiseDecoder>,
    noise_buf: Vec<f32>,
    noise_seed: u32,

    vibrato_phase: f64,
    orig_pos: f64,
    rng_state: u32,
}

impl LiveDecoder {
    pub fn new(mix_freq: f32) -> Self {
        Self {
            params: LiveDecoderParams::default(),
            mix_freq,
            active: false,
            done: true,
            fundamental_freq: 440.0,
            frame_step_samples: 480.0,
            frame_step_out: 1,
            n_frames: 0,
            loop_type: LoopType::None,
            loop_start: 0.0,
            loop_end: 0.0,
            attack_start_ms: 0.0,
            attack_end_ms: 0.0,
            env_frame: 0.0,
            pos_in_frame: 0,
            note_time_ms: 0.0,
            osc: Vec::new(),
            phases: Vec::new(),
            detune: vec![1.0],
            unison_gain: 1.0,
            prev_block: AudioBlock::with_capacity(0),
            cur_block: AudioBlock::with_capacity(0),
            have_prev: false,
            have_cur: false,
            noise_decoder: None,
            noise_buf: Vec::new(),
            noise_seed: 0x9e37_79b9,
            vibrato_phase: 0.0,
            orig_pos: 0.0,
            rng_state: 0x2545_f491,
        }
    }

    pub fn set_params(&mut self, params: LiveDecoderParams) {
        let enable_noise = params.noise && !self.params.noise;
        self.params = params;
        // a config swap can enable noise mid-note; the buffer must be
        // sized before the next process call reads it
        if enable_noise && self.active {
            self.ensure_noise_state();
            if let Some(nd) = &mut self.noise_decoder {
                nd.reset();
            }
            self.noise_buf.fill(0.0);
        }
    }

    pub fn params(&self) -> &LiveDecoderParams {
        &self.params
    }

    /// Seed for the noise component, for reproducible renders.
    pub fn set_noise_seed(&mut self, seed: u32) {
        self.noise_seed = seed;
        if let Some(nd) = &mut self.noise_decoder {
            nd.set_seed(seed);
        }
    }

    pub fn done(&self) -> bool {
        self.done
    }

    fn random(&mut self) -> f32 {
        self.rng_state ^= self.rng_state << 13;
        self.rng_state ^= self.rng_state >> 17;
        self.rng_state ^= self.rng_state << 5;
        self.rng_state as f32 / u32::MAX as f32
    }

    /// Bind a note and reset all per-note state.
    pub fn retrigger(
        &mut self,
        source: &mut dyn LiveDecoderSource,
        channel: u8,
        freq: f32,
        velocity: u8,
    ) {
        source.retrigger(channel, freq, velocity, self.mix_freq);

        self.osc.clear();
        self.phases.clear();
        self.prev_block.clear();
        self.cur_block.clear();
        self.have_prev = false;
        self.have_cur = false;
        self.pos_in_frame = 0;
        self.note_time_ms = 0.0;
        self.vibrato_phase = 0.0;
        self.orig_pos = 0.0;

        let Some(audio) = source.audio() else {
            self.active = false;
            self.done = true;
            return;
        };

        let frame_step_ms = audio.frame_step_ms as f64;
        self.frame_step_samples = frame_step_ms / 1000.0 * self.mix_freq as f64;
        self.fundamental_freq = audio.fundamental_freq;
        self.frame_step_out = self.effective_frame_step(freq);
        self.n_frames = audio.n_frames();
        self.loop_type = audio.loop_type;
        self.loop_start = audio.loop_start as f64;
        self.loop_end = audio.loop_end as f64;
        self.attack_start_ms = audio.attack_start_ms as f64;
        self.attack_end_ms = audio.attack_end_ms as f64;

        // leading silence stripped by the encoder is skipped on playback;
        // one is subtracted because advance_frame steps before fetching
        let zero_ms = audio.zero_values_at_start as f64 / audio.mix_freq as f64 * 1000.0;
        self.env_frame = zero_ms / frame_step_ms - 1.0;

        let voices = self.params.unison_voices.max(1) as usize;
        self.detune.clear();
        if voices == 1 {
            self.detune.push(1.0);
            self.unison_gain = 1.0;
        } else {
            let spread = self.params.unison_detune_cents;
            for v in 0..voices {
                let cents = spread * (2.0 * v as f64 / (voices - 1) as f64 - 1.0);
                self.detune.push((cents / 1200.0).exp2() as f32);
            }
            self.unison_gain = 1.0 / (voices as f32).sqrt();
        }

        if self.params.noise {
            self.ensure_noise_state();
            if let Some(nd) = &mut self.noise_decoder {
                nd.set_seed(self.noise_seed);
                nd.reset();
            }
        }

        self.active = true;
        self.done = false;

        // first frame; pos_in_frame = frame_step_out forces the fetch
        self.pos_in_frame = self.frame_step_out;
        self.advance_frame(source);
    }

    /// Output samples per frame when played at `freq`: the frame
    /// timeline is consumed `freq / fundamental` times faster than at
    /// the fundamental.
    fn effective_frame_step(&self, freq: f32) -> usize {
        let ratio = (self.fundamental_freq / freq.max(1.0)) as f64;
        ((self.frame_step_samples * ratio).round() as usize).max(1)
    }

    /// Noise decoder and buffer matching the current frame step; the
    /// decoder is only rebuilt when the hop size actually changed.
    fn ensure_noise_state(&mut self) {
        let block_size = NoiseDecoder::preferred_block_size(self.frame_step_out);
        let needs_new = self
            .noise_decoder
            .as_ref()
            .map_or(true, |nd| nd.hop_size() != block_size / 2);
        if needs_new {
            let mut nd = NoiseDecoder::new(self.mix_freq, block_size);
            nd.set_seed(self.noise_seed);
            self.noise_decoder = Some(nd);
        }
        self.noise_buf.resize(self.frame_step_out, 0.0);
    }

    /// Map the integer frame position through the loop policy.
    fn map_frame(&self, frame: usize) -> Option<usize> {
        let start = self.loop_start as usize;
        let end = self.loop_end as usize;
        match self.loop_type {
            LoopType::FrameForward if frame > end => {
                let len = end - start + 1;
                Some(start + (frame - start) % len)
            }
            LoopType::FramePingPong if frame > end => {
                let len = end - start;
                if len == 0 {
                    return Some(start);
                }
                let k = (frame - start) % (2 * len);
                Some(start + if k <= len { k } else { 2 * len - k })
            }
            _ => (frame < self.n_frames).then_some(frame),
        }
    }

    fn advance_frame(&mut self, source: &mut dyn LiveDecoderSource) {
        self.env_frame += 1.0;

        // time loops wrap the continuous position with sub-frame precision
        if self.loop_type.is_time_loop() && self.env_frame > self.loop_end {
            let len = self.loop_end - self.loop_start;
            if len <= 0.0 {
                self.env_frame = self.loop_start;
            } else {
                match self.loop_type {
                    LoopType::TimeForward => {
                        self.env_frame =
                            self.loop_start + (self.env_frame - self.loop_start) % len;
                    }
                    LoopType::TimePingPong => {
                        let k = (self.env_frame - self.loop_start) % (2.0 * len);
                        self.env_frame =
                            self.loop_start + if k <= len { k } else { 2.0 * len - k };
                    }
                    _ => {}
                }
            }
        }

        std::mem::swap(&mut self.prev_block, &mut self.cur_block);
        self.have_prev = self.have_cur;

        let frame = self.env_frame.max(0.0) as usize;
        self.have_cur = match self.map_frame(frame) {
            Some(index) => source.audio_block(index, &mut self.cur_block),
            None => false,
        };
        if !self.have_cur {
            self.cur_block.clear();
            if !self.have_prev {
                // crossfade to silence has completed
                self.active = false;
                self.done = true;
            }
        }

        self.rebuild_oscillators();

        if self.params.noise {
            self.ensure_noise_state();
            self.noise_buf.fill(0.0);
            if self.have_cur {
                if let Some(nd) = &mut self.noise_decoder {
                    nd.process(&self.cur_block, &mut self.noise_buf);
                }
            }
        }

        self.pos_in_frame = 0;
    }

    /// Pair partials of the previous and current frame by index. Frames
    /// are frequency-sorted, so index pairing tracks continuous partials
    /// well; amplitudes crossfade across the step, indices present on
    /// only one side fade from or to zero.
    fn rebuild_oscillators(&mut self) {
        let voices = self.detune.len();
        let n_prev = if self.have_prev {
            self.prev_block.n_partials()
        } else {
            0
        };
        let n_cur = if self.have_cur {
            self.cur_block.n_partials()
        } else {
            0
        };
        let n = n_prev.max(n_cur);

        let old_n = self.osc.len();
        self.osc.resize(n, Osc::default());
        for i in 0..n {
            let osc = &mut self.osc[i];
            osc.amp_from = if i < n_prev {
                self.prev_block.mag_f(i) as f32
            } else {
                0.0
            };
            osc.amp_to = if i < n_cur {
                self.cur_block.mag_f(i) as f32
            } else {
                0.0
            };
            osc.ratio = if i < n_cur {
                self.cur_block.freq_ratio(i) as f32
            } else {
                self.prev_block.freq_ratio(i) as f32
            };
        }

        if n * voices > self.phases.len() {
            // new oscillators start at the encoded phase, unison copies
            // decorrelated
            for i in old_n..n {
                let base = if i < n_cur {
                    self.cur_block.phase_f(i) as f32
                } else {
                    0.0
                };
                for v in 0..voices {
                    let offset = if v == 0 { 0.0 } else { self.random() * TAU };
                    self.phases.push(base + offset);
                }
            }
            self.phases.resize(n * voices, 0.0);
        } else {
            self.phases.truncate(n * voices);
        }
    }

    /// Attack volume ramp at `self.note_time_ms`.
    #[inline]
    fn attack_factor(&self, time_ms: f64) -> f32 {
        if self.attack_end_ms <= self.attack_start_ms {
            return 1.0;
        }
        (((time_ms - self.attack_start_ms) / (self.attack_end_ms - self.attack_start_ms))
            .clamp(0.0, 1.0)) as f32
    }

    /// Render `out.len()` samples, overwriting `out`.
    ///
    /// `freq_begin`/`freq_end` give the note frequency at the block
    /// edges; portamento interpolates between them per sample.
    pub fn process(
        &mut self,
        source: &mut dyn LiveDecoderSource,
        freq_begin: f32,
        freq_end: f32,
        out: &mut [f32],
    ) {
        out.fill(0.0);
        if out.is_empty() {
            return;
        }

        if self.params.original_samples {
            self.process_original(source, freq_begin, out);
            return;
        }
        if !self.active {
            return;
        }

        // portamento and vibrato shift the pitch between blocks; the
        // frame consumption rate follows it
        self.frame_step_out = self.effective_frame_step(freq_begin);
        if self.params.noise && self.noise_buf.len() < self.frame_step_out {
            self.noise_buf.resize(self.frame_step_out, 0.0);
        }

        let n = out.len();
        let ms_per_sample = 1000.0 / self.mix_freq as f64;
        let vib_inc = self.params.vibrato_frequency_hz / self.mix_freq as f64;
        let voices = self.detune.len();

        let mut produced = 0;
        while produced < n {
            if self.pos_in_frame >= self.frame_step_out {
                self.advance_frame(source);
                if !self.active {
                    break;
                }
            }
            let chunk = (n - produced).min(self.frame_step_out - self.pos_in_frame);

            for s in 0..chunk {
                let global = produced + s;
                let freq = freq_begin + (freq_end - freq_begin) * global as f32 / n as f32;

                let vib_factor = if self.params.vibrato {
                    let ramp = if self.params.vibrato_attack_ms > 0.0 {
                        (self.note_time_ms / self.params.vibrato_attack_ms).min(1.0)
                    } else {
                        1.0
                    };
                    let cents = self.params.vibrato_depth_cents
                        * ramp
                        * (self.vibrato_phase * std::f64::consts::TAU).sin();
                    self.vibrato_phase += vib_inc;
                    (cents / 1200.0).exp2() as f32
                } else {
                    1.0
                };

                let mut value = 0.0f32;
                if self.params.sines {
                    let t = (self.pos_in_frame + s) as f32 / self.frame_step_out as f32;
                    let phase_scale = TAU * freq * vib_factor / self.mix_freq;
                    for (i, osc) in self.osc.iter().enumerate() {
                        let amp = osc.amp_from + (osc.amp_to - osc.amp_from) * t;
                        if amp <= 0.0 {
                            // keep phase running so fade-ins stay aligned
                            for v in 0..voices {
                                let p = &mut self.phases[i * voices + v];
                                *p = (*p + osc.ratio * phase_scale * self.detune[v]) % TAU;
                            }
                            continue;
                        }
                        let mut acc = 0.0f32;
                        for v in 0..voices {
                            let p = &mut self.phases[i * voices + v];
                            acc += p.sin();
                            *p = (*p + osc.ratio * phase_scale * self.detune[v]) % TAU;
                        }
                        value += amp * acc;
                    }
                    value *= self.unison_gain;
                }
                if self.params.noise {
                    value += self.noise_buf[self.pos_in_frame + s];
                }

                out[global] = value * self.attack_factor(self.note_time_ms);
                self.note_time_ms += ms_per_sample;
            }

            self.pos_in_frame += chunk;
            produced += chunk;
        }
    }

    /// Reference playback of the original recording, repitched by simple
    /// linear-interpolation resampling.
    fn process_original(
        &mut self,
        source: &mut dyn LiveDecoderSource,
        freq: f32,
        out: &mut [f32],
    ) {
        let Some(audio) = source.audio() else {
            self.done = true;
            return;
        };
        let samples = &audio.original_samples;
        if samples.is_empty() {
            self.done = true;
            return;
        }

        let gain = math::db_to_factor(audio.original_samples_norm_db as f64) as f32;
        let step =
            (audio.mix_freq / self.mix_freq) as f64 * (freq / audio.fundamental_freq) as f64;

        for value in out.iter_mut() {
            let base = self.orig_pos as usize;
            if base + 1 >= samples.len() {
                self.done = true;
                break;
            }
            let frac = (self.orig_pos - base as f64) as f32;
            *value = (samples[base] * (1.0 - frac) + samples[base + 1] * frac) * gain;
            self.orig_pos += step;
        }
    }
}
