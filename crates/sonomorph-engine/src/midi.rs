//! Polyphonic MIDI front end over the morph synthesis engine.

use std::sync::Arc;

use midly::{live::LiveEvent, MidiMessage};
use smallvec::SmallVec;
use tracing::debug;

use sonomorph_model::math;

use crate::morph::config::PlanConfig;
use crate::morph::synth::{MorphPlanSynth, PlanUpdate};
use crate::morph::voice::MorphVoice;

/// Upper bound for one render sub-block; keeps per-voice scratch
/// buffers at a fixed size.
pub const MAX_BLOCK_SIZE: usize = 1024;

const DEFAULT_VOICES: usize = 64;
const DEFAULT_RELEASE_MS: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    Idle,
    On,
    Release,
}

struct VoiceSlot {
    state: VoiceState,
    voice: Option<MorphVoice>,
    channel: u8,
    midi_note: u8,
    env_level: f32,
    env_delta: f32,
}

impl VoiceSlot {
    fn new() -> Self {
        Self {
            state: VoiceState::Idle,
            voice: None,
            channel: 0,
            midi_note: 0,
            env_level: 0.0,
            env_delta: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    Control { signal: u8, value: f64 },
    AllNotesOff { channel: u8 },
}

#[derive(Debug, Clone, Copy)]
struct Event {
    offset: usize,
    kind: EventKind,
}

fn control_event(signal: u8, raw: u8) -> EventKind {
    EventKind::Control {
        signal,
        value: raw as f64 / 127.0 * 2.0 - 1.0,
    }
}

/// Voice management, event scheduling and mixing.
///
/// Lives entirely on the audio thread; the control thread talks to it
/// through [`SynthInterface`](crate::project::SynthInterface) closures.
pub struct MidiSynth {
    synth: MorphPlanSynth,
    voices: Vec<VoiceSlot>,
    events: SmallVec<[Event; 32]>,
    mix_freq: f32,
    gain: f32,
    release_ms: f64,
    mono: bool,
    signals: [f64; 4],
    render_buf: Vec<f32>,
}

impl MidiSynth {
    pub fn new(mix_freq: f32, n_voices: usize) -> Self {
        let n_voices = n_voices.max(1);
        Self {
            synth: MorphPlanSynth::new(mix_freq),
            voices: (0..n_voices).map(|_| VoiceSlot::new()).collect(),
            events: SmallVec::new(),
            mix_freq,
            gain: 1.0,
            release_ms: DEFAULT_RELEASE_MS,
            mono: false,
            signals: [0.0; 4],
            render_buf: vec![0.0; MAX_BLOCK_SIZE],
        }
    }

    pub fn with_defaults(mix_freq: f32) -> Self {
        Self::new(mix_freq, DEFAULT_VOICES)
    }

    pub fn mix_freq(&self) -> f32 {
        self.mix_freq
    }

    /// Master gain as a linear factor.
    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain.max(0.0);
    }

    pub fn set_gain_db(&mut self, db: f32) {
        self.gain = math::db_to_factor(db as f64) as f32;
    }

    /// Amplitude release after note off.
    pub fn set_release_ms(&mut self, ms: f64) {
        self.release_ms = ms.max(1.0);
    }

    /// Monophonic mode: new notes glide the sounding voice instead of
    /// allocating a new one.
    pub fn set_mono(&mut self, mono: bool) {
        self.mono = mono;
    }

    /// Play original recordings instead of the spectral model.
    pub fn set_original_samples(&mut self, enabled: bool) {
        for slot in &mut self.voices {
            if let Some(voice) = &mut slot.voice {
                voice.set_original_samples(enabled);
            }
        }
    }

    /// Install a prepared config swap. Returns the superseded config so
    /// the caller can route it back for deallocation off this thread.
    pub fn apply_update(&mut self, update: PlanUpdate) -> Option<Arc<PlanConfig>> {
        debug!(generation = update.generation(), "applying plan update");
        let config = Arc::clone(update.config());
        let old = self.synth.apply_update(update);
        for slot in &mut self.voices {
            match (&mut slot.voice, slot.state) {
                (Some(voice), VoiceState::On | VoiceState::Release) => {
                    voice.set_config(Arc::clone(&config));
                }
                _ => {
                    // idle slots get fresh module sets so note-on does
                    // not build them on the fly
                    slot.voice = self.synth.new_voice();
                }
            }
        }
        old
    }

    /// Current plan generation, if any config was applied.
    pub fn plan_generation(&self) -> Option<u64> {
        self.synth.config().map(|c| c.generation)
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices
            .iter()
            .filter(|v| v.state != VoiceState::Idle)
            .count()
    }

    /// Queue a raw MIDI event at a sample offset within the next
    /// `process` call.
    pub fn add_midi_event(&mut self, offset: usize, raw: &[u8]) {
        let Ok(event) = LiveEvent::parse(raw) else {
            debug!(?raw, "ignoring unparseable midi event");
            return;
        };
        let LiveEvent::Midi { channel, message } = event else {
            return;
        };
        let channel = channel.as_int();
        let kind = match message {
            MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => EventKind::NoteOn {
                channel,
                note: key.as_int(),
                velocity: vel.as_int(),
            },
            MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                EventKind::NoteOff {
                    channel,
                    note: key.as_int(),
                }
            }
            MidiMessage::Controller { controller, value } => match controller.as_int() {
                1 => control_event(1, value.as_int()),
                2 => control_event(2, value.as_int()),
                16 => control_event(3, value.as_int()),
                17 => control_event(4, value.as_int()),
                123 => EventKind::AllNotesOff { channel },
                _ => return,
            },
            _ => return,
        };
        self.events.push(Event { offset, kind });
    }

    /// Immediate note on (offset 0 of the next block).
    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        self.events.push(Event {
            offset: 0,
            kind: EventKind::NoteOn {
                channel,
                note,
                velocity,
            },
        });
    }

    pub fn note_off(&mut self, channel: u8, note: u8) {
        self.events.push(Event {
            offset: 0,
            kind: EventKind::NoteOff { channel, note },
        });
    }

    /// Set a host control signal (1-based), effective immediately.
    pub fn set_control_input(&mut self, signal: u8, value: f64) {
        if let Some(slot) = self.signals.get_mut(signal as usize - 1) {
            *slot = value.clamp(-1.0, 1.0);
        }
        for voice in self.voices.iter_mut().filter_map(|s| s.voice.as_mut()) {
            voice.set_signal(signal, value);
        }
    }

    fn dispatch(&mut self, kind: EventKind) {
        match kind {
            EventKind::NoteOn {
                channel,
                note,
                velocity,
            } => self.start_note(channel, note, velocity),
            EventKind::NoteOff { channel, note } => self.stop_note(channel, note),
            EventKind::Control { signal, value } => self.set_control_input(signal, value),
            EventKind::AllNotesOff { channel } => self.all_notes_off(channel),
        }
    }

    fn start_note(&mut self, channel: u8, note: u8, velocity: u8) {
        let freq = math::note_to_freq(note);

        if self.mono {
            if let Some(slot) = self
                .voices
                .iter_mut()
                .find(|s| s.state == VoiceState::On && s.channel == channel)
            {
                // legato: reuse the sounding voice
                slot.midi_note = note;
                if let Some(voice) = &mut slot.voice {
                    voice.glide_to(freq);
                }
                return;
            }
        }

        let Some(slot) = self.voices.iter_mut().find(|s| s.state == VoiceState::Idle) else {
            debug!(note, "voice pool exhausted, dropping note on");
            return;
        };
        let Some(voice) = &mut slot.voice else {
            // no config applied yet
            return;
        };

        for (i, value) in self.signals.iter().enumerate() {
            voice.set_signal(i as u8 + 1, *value);
        }
        voice.retrigger(channel, freq, velocity);
        slot.state = VoiceState::On;
        slot.channel = channel;
        slot.midi_note = note;
        slot.env_level = 1.0;
        slot.env_delta = 0.0;
    }

    fn stop_note(&mut self, channel: u8, note: u8) {
        let env_delta = self.release_delta();
        for slot in &mut self.voices {
            if slot.state == VoiceState::On && slot.channel == channel && slot.midi_note == note {
                slot.state = VoiceState::Release;
                slot.env_delta = env_delta;
                if let Some(voice) = &mut slot.voice {
                    voice.release();
                }
            }
        }
    }

    /// CC 123: release every sounding note on the channel.
    fn all_notes_off(&mut self, channel: u8) {
        let env_delta = self.release_delta();
        for slot in &mut self.voices {
            if slot.state == VoiceState::On && slot.channel == channel {
                slot.state = VoiceState::Release;
                slot.env_delta = env_delta;
                if let Some(voice) = &mut slot.voice {
                    voice.release();
                }
            }
        }
    }

    fn release_delta(&self) -> f32 {
        1.0 / (self.release_ms / 1000.0 * self.mix_freq as f64) as f32
    }

    /// Render `out.len()` samples of mixed output, overwriting `out`.
    ///
    /// Queued events are applied at their sample offsets; rendering is
    /// split at each event and capped at [`MAX_BLOCK_SIZE`] chunks.
    pub fn process(&mut self, out: &mut [f32]) {
        out.fill(0.0);

        self.events.sort_by_key(|e| e.offset);
        let events: SmallVec<[Event; 32]> = self.events.drain(..).collect();

        let mut pos = 0;
        let mut next_event = 0;
        while pos < out.len() {
            while next_event < events.len() && events[next_event].offset <= pos {
                self.dispatch(events[next_event].kind);
                next_event += 1;
            }
            let until = if next_event < events.len() {
                events[next_event].offset.clamp(pos + 1, out.len())
            } else {
                out.len()
            };
            let n = (until - pos).min(MAX_BLOCK_SIZE);
            self.render_chunk(&mut out[pos..pos + n]);
            pos += n;
        }
        while next_event < events.len() {
            self.dispatch(events[next_event].kind);
            next_event += 1;
        }
    }

    fn render_chunk(&mut self, out: &mut [f32]) {
        let n = out.len();
        self.synth.process_block(n);
        let dt = n as f64 / self.mix_freq as f64;

        for slot in &mut self.voices {
            if slot.state == VoiceState::Idle {
                continue;
            }
            let Some(voice) = &mut slot.voice else {
                slot.state = VoiceState::Idle;
                continue;
            };

            voice.begin_block(dt, self.synth.shared_lfo_values());
            let buf = &mut self.render_buf[..n];
            voice.process(buf);

            match slot.state {
                VoiceState::On => {
                    for (o, v) in out.iter_mut().zip(buf.iter()) {
                        *o += *v;
                    }
                }
                VoiceState::Release => {
                    for (o, v) in out.iter_mut().zip(buf.iter()) {
                        *o += *v * slot.env_level;
                        slot.env_level = (slot.env_level - slot.env_delta).max(0.0);
                    }
                }
                VoiceState::Idle => unreachable!(),
            }

            if voice.done() || (slot.state == VoiceState::Release && slot.env_level <= 0.0) {
                slot.state = VoiceState::Idle;
            }
        }

        if self.gain != 1.0 {
            for o in out.iter_mut() {
                *o *= self.gain;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::morph::config::{PlanConfig, WavSetResolver};
    use crate::morph::ops::{ControlInput, MorphPlan, OperatorKind};
    use sonomorph_model::{Audio, AudioBlock, LoopType, Partial, WavSet};

    struct Fixed(Arc<WavSet>);

    impl WavSetResolver for Fixed {
        fn by_name(&self, _instrument: &str) -> Option<Arc<WavSet>> {
            Some(Arc::clone(&self.0))
        }
        fn by_object_id(&self, _object_id: u64) -> Option<Arc<WavSet>> {
            None
        }
    }

    fn test_set() -> Arc<WavSet> {
        let mut audio = Audio::default();
        audio.frame_step_ms = 10.0;
        audio.loop_type = LoopType::FrameForward;
        audio.loop_start = 0;
        audio.loop_end = 9;
        for _ in 0..10 {
            let mut block = AudioBlock::with_capacity(1);
            block.partials.push(Partial {
                freq: math::ratio_to_ifreq(1.0),
                mag: math::db_to_idb(-6.0),
                phase: 0,
            });
            audio.contents.push(block);
        }
        Arc::new(WavSet::from_single(audio))
    }

    fn update(generation: u64) -> PlanUpdate {
        let mut plan = MorphPlan::new();
        let a = plan.add("a", OperatorKind::Source { instrument: "x".into() });
        let b = plan.add("b", OperatorKind::Source { instrument: "x".into() });
        let lin = plan.add(
            "morph",
            OperatorKind::Linear {
                left: Some(a),
                right: Some(b),
                morphing: ControlInput::Value(0.0),
                db_linear: true,
            },
        );
        let mut out = OperatorKind::default_output();
        if let OperatorKind::Output { source, noise, .. } = &mut out {
            *source = Some(lin);
            *noise = false;
        }
        plan.add("out", out);
        PlanUpdate::new(PlanConfig::from_plan(&plan, generation, &Fixed(test_set())).unwrap())
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|v| v * v).sum::<f32>() / buf.len() as f32).sqrt()
    }

    fn ready_synth(n_voices: usize) -> MidiSynth {
        let mut synth = MidiSynth::new(48000.0, n_voices);
        synth.apply_update(update(1));
        synth
    }

    #[test]
    fn test_note_on_produces_sound() {
        let mut synth = ready_synth(4);
        synth.note_on(0, 69, 100);

        let mut out = vec![0.0f32; 4800];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 1);
        assert!(rms(&out[480..]) > 0.1);
    }

    #[test]
    fn test_note_off_release_then_idle() {
        let mut synth = ready_synth(4);
        synth.note_on(0, 69, 100);
        let mut out = vec![0.0f32; 4800];
        synth.process(&mut out);

        synth.note_off(0, 69);

        // 100ms into the default 150ms release: still audible
        let mut tail = vec![0.0f32; 4800];
        synth.process(&mut tail);
        assert!(rms(&tail[..2400]) > 1e-3);
        assert_eq!(synth.active_voice_count(), 1);

        // well past the release: voice freed, output silent
        let mut silence = vec![0.0f32; 9600];
        synth.process(&mut silence);
        assert_eq!(synth.active_voice_count(), 0);
        assert!(rms(&silence[4800..]) < 1e-6);
    }

    #[test]
    fn test_voice_pool_exhaustion_drops_notes() {
        let mut synth = ready_synth(2);
        for note in 60..70 {
            synth.note_on(0, note, 100);
        }
        let mut out = vec![0.0f32; 512];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 2);
        assert!(out.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_raw_midi_events() {
        let mut synth = ready_synth(4);
        synth.add_midi_event(0, &[0x90, 69, 100]);

        let mut out = vec![0.0f32; 2400];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 1);

        // note on with velocity 0 acts as note off
        synth.add_midi_event(0, &[0x90, 69, 0]);
        let mut out = vec![0.0f32; 48000];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_all_notes_off_controller() {
        let mut synth = ready_synth(4);
        synth.note_on(0, 60, 100);
        synth.note_on(0, 64, 100);
        synth.note_on(0, 67, 100);
        let mut out = vec![0.0f32; 512];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 3);

        synth.add_midi_event(0, &[0xB0, 123, 0]);
        let mut out = vec![0.0f32; 48000];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 0);
    }

    #[test]
    fn test_event_offset_splits_block() {
        let mut synth = ready_synth(4);
        synth.add_midi_event(2400, &[0x90, 69, 100]);

        let mut out = vec![0.0f32; 4800];
        synth.process(&mut out);

        // silence before the event, sound after it settles in
        assert!(rms(&out[..2400]) < 1e-6);
        assert!(rms(&out[2880..]) > 0.1);
    }

    #[test]
    fn test_mono_mode_reuses_voice() {
        let mut synth = ready_synth(4);
        synth.set_mono(true);
        synth.note_on(0, 60, 100);
        let mut out = vec![0.0f32; 512];
        synth.process(&mut out);

        synth.note_on(0, 72, 100);
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 1);
    }

    #[test]
    fn test_gain_scales_output() {
        let mut loud = ready_synth(4);
        let mut quiet = ready_synth(4);
        quiet.set_gain_db(-20.0);

        loud.note_on(0, 69, 100);
        quiet.note_on(0, 69, 100);

        let mut out_loud = vec![0.0f32; 4800];
        let mut out_quiet = vec![0.0f32; 4800];
        loud.process(&mut out_loud);
        quiet.process(&mut out_quiet);

        let ratio = rms(&out_loud[480..]) / rms(&out_quiet[480..]);
        assert!((ratio - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_note_before_config_is_dropped() {
        let mut synth = MidiSynth::new(48000.0, 4);
        synth.note_on(0, 69, 100);
        let mut out = vec![0.0f32; 512];
        synth.process(&mut out);
        assert_eq!(synth.active_voice_count(), 0);
        assert!(out.iter().all(|v| *v == 0.0));
    }
}
