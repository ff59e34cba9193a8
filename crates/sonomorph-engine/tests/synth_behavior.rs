//! Scenario tests across the control plane and the synthesis engine.

use std::sync::Arc;

use sonomorph_engine::morph::ops::{ControlInput, GridNode, OperatorKind};
use sonomorph_engine::{MidiSynth, Project};
use sonomorph_model::{math, Audio, AudioBlock, LoopType, Partial, WavSet};

fn looped_set(ratio: f64, db: f64) -> WavSet {
    let mut audio = Audio::default();
    audio.frame_step_ms = 10.0;
    audio.loop_type = LoopType::FrameForward;
    audio.loop_start = 0;
    audio.loop_end = 19;
    for _ in 0..20 {
        let mut block = AudioBlock::with_capacity(1);
        block.partials.push(Partial {
            freq: math::ratio_to_ifreq(ratio),
            mag: math::db_to_idb(db),
            phase: 0,
        });
        audio.contents.push(block);
    }
    WavSet::from_single(audio)
}

/// Looped set with no partials and a flat -20 dB noise envelope.
fn noisy_set() -> WavSet {
    let mut audio = Audio::default();
    audio.frame_step_ms = 10.0;
    audio.loop_type = LoopType::FrameForward;
    audio.loop_start = 0;
    audio.loop_end = 19;
    for _ in 0..20 {
        let mut block = AudioBlock::with_capacity(0);
        block.noise.fill(math::db_to_idb(-20.0));
        audio.contents.push(block);
    }
    WavSet::from_single(audio)
}

fn rms(buf: &[f32]) -> f32 {
    (buf.iter().map(|v| v * v).sum::<f32>() / buf.len() as f32).sqrt()
}

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Project with instruments "a" and "b" and a linear morph plan between
/// them, morphing bound to control signal 1. The two partials sit 2%
/// apart so they pair up across the whole morph range.
fn morph_project() -> (Project, sonomorph_engine::SynthEvents) {
    init_logging();
    let (mut project, events) = Project::new();
    project.add_instrument("a", looped_set(1.0, -6.0)).unwrap();
    project.add_instrument("b", looped_set(1.02, -6.0)).unwrap();

    let plan = project.plan_mut();
    let a = plan.add("a", OperatorKind::Source { instrument: "a".into() });
    let b = plan.add("b", OperatorKind::Source { instrument: "b".into() });
    let lin = plan.add(
        "morph",
        OperatorKind::Linear {
            left: Some(a),
            right: Some(b),
            morphing: ControlInput::Signal(1),
            db_linear: true,
        },
    );
    let mut out = OperatorKind::default_output();
    if let OperatorKind::Output { source, noise, .. } = &mut out {
        *source = Some(lin);
        *noise = false;
    }
    plan.add("out", out);
    project.publish().unwrap();
    (project, events)
}

fn render(synth: &mut MidiSynth, n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; n];
    synth.process(&mut out);
    out
}

#[test]
fn test_morphed_energy_stays_bounded() {
    let (_project, events) = morph_project();
    let mut synth = MidiSynth::with_defaults(48000.0);
    events.dispatch(&mut synth);

    let side_rms = |signal: f64| {
        let (_p, ev) = morph_project();
        let mut s = MidiSynth::with_defaults(48000.0);
        ev.dispatch(&mut s);
        s.set_control_input(1, signal);
        s.note_on(0, 69, 100);
        let out = render(&mut s, 24000);
        rms(&out[4800..])
    };
    let left = side_rms(-1.0);
    let right = side_rms(1.0);

    synth.set_control_input(1, 0.0);
    synth.note_on(0, 69, 100);
    let out = render(&mut synth, 24000);

    assert!(out.iter().all(|v| v.is_finite()));
    let mid = rms(&out[4800..]);
    let bound = 2.0 * left.max(right);
    assert!(mid > 0.01, "midpoint inaudible: {mid}");
    assert!(mid <= bound, "midpoint {mid} exceeds bound {bound}");
}

#[test]
fn test_morph_position_changes_while_note_held() {
    let (_project, events) = morph_project();
    let mut synth = MidiSynth::with_defaults(48000.0);
    events.dispatch(&mut synth);

    synth.set_control_input(1, -1.0);
    synth.note_on(0, 69, 100);
    let start = render(&mut synth, 9600);

    synth.set_control_input(1, 1.0);
    let moved = render(&mut synth, 9600);

    // still one voice, still sounding, no discontinuity blowup
    assert_eq!(synth.active_voice_count(), 1);
    assert!(rms(&start[4800..]) > 0.1);
    assert!(rms(&moved[4800..]) > 0.1);
    assert!(moved.iter().all(|v| v.abs() < 2.0));
}

#[test]
fn test_voice_release_timeline() {
    let (_project, events) = morph_project();
    let mut synth = MidiSynth::with_defaults(48000.0);
    events.dispatch(&mut synth);

    synth.note_on(0, 69, 100);
    render(&mut synth, 4800);
    synth.note_off(0, 69);

    // 100ms after note off (release is 150ms): still audible
    let tail = render(&mut synth, 4800);
    assert!(rms(&tail[..2400]) > 1e-3);
    assert_eq!(synth.active_voice_count(), 1);

    // 300ms after note off: voice is gone and the output is silent
    let silence = render(&mut synth, 9600);
    assert_eq!(synth.active_voice_count(), 0);
    assert!(rms(&silence[4800..]) < 1e-6);
}

#[test]
fn test_rapid_config_updates_none_applied_partially() {
    let (mut project, events) = morph_project();
    let mut synth = MidiSynth::with_defaults(48000.0);
    events.dispatch(&mut synth);
    synth.note_on(0, 69, 100);

    let mut reclaimed = 0;
    let mut last_generation = 1;
    for round in 0..1000 {
        // edit the plan a little each round
        let morphing = (round as f64 / 500.0) - 1.0;
        let plan = project.plan_mut();
        let ids: Vec<_> = plan.operators().iter().map(|op| op.id).collect();
        for id in ids {
            if let Some(op) = plan.operator_mut(id) {
                if let OperatorKind::Linear { morphing: m, .. } = &mut op.kind {
                    *m = ControlInput::Value(morphing);
                }
            }
        }
        last_generation = project.publish().unwrap();

        events.dispatch(&mut synth);
        let out = render(&mut synth, 256);
        assert!(out.iter().all(|v| v.is_finite()));
        reclaimed += project.interface().reclaim();
    }

    // every superseded config came back to the control thread
    assert_eq!(synth.plan_generation(), Some(last_generation));
    assert_eq!(last_generation, 1001);
    assert_eq!(reclaimed, 1000);
    assert_eq!(synth.active_voice_count(), 1);
}

#[test]
fn test_noise_toggle_during_note_keeps_voice_alive() {
    let (mut project, events) = morph_project();
    let mut synth = MidiSynth::with_defaults(48000.0);
    events.dispatch(&mut synth);
    synth.note_on(0, 69, 100);
    render(&mut synth, 4800);

    // enable the noise component while the note is sounding
    let plan = project.plan_mut();
    let ids: Vec<_> = plan.operators().iter().map(|op| op.id).collect();
    for id in ids {
        if let Some(op) = plan.operator_mut(id) {
            if let OperatorKind::Output { noise, .. } = &mut op.kind {
                *noise = true;
            }
        }
    }
    project.publish().unwrap();
    events.dispatch(&mut synth);

    let out = render(&mut synth, 4800);
    assert!(out.iter().all(|v| v.is_finite()));
    assert_eq!(synth.active_voice_count(), 1);
    assert!(rms(&out[2400..]) > 0.01);
}

#[test]
fn test_noise_component_renders() {
    init_logging();
    let (mut project, events) = Project::new();
    project.add_instrument("breath", noisy_set()).unwrap();

    let plan = project.plan_mut();
    let a = plan.add("a", OperatorKind::Source { instrument: "breath".into() });
    let mut out = OperatorKind::default_output();
    if let OperatorKind::Output { source, .. } = &mut out {
        *source = Some(a);
    }
    plan.add("out", out);
    project.publish().unwrap();

    let mut synth = MidiSynth::with_defaults(48000.0);
    events.dispatch(&mut synth);
    synth.note_on(0, 69, 100);

    let out = render(&mut synth, 9600);
    assert!(out.iter().all(|v| v.is_finite()));
    assert!(rms(&out[4800..]) > 1e-3);
}

#[test]
fn test_grid_corners_select_sources() {
    init_logging();
    let (mut project, events) = Project::new();
    project.add_instrument("a", looped_set(1.0, -6.0)).unwrap();
    project.add_instrument("b", looped_set(1.0, -30.0)).unwrap();

    let plan = project.plan_mut();
    let a = plan.add("a", OperatorKind::Source { instrument: "a".into() });
    let b = plan.add("b", OperatorKind::Source { instrument: "b".into() });
    let grid = plan.add(
        "grid",
        OperatorKind::Grid {
            width: 2,
            height: 2,
            nodes: vec![
                GridNode { source: Some(a), delta_db: 0.0 },
                GridNode { source: Some(b), delta_db: 0.0 },
                GridNode { source: Some(b), delta_db: 0.0 },
                GridNode { source: Some(b), delta_db: 0.0 },
            ],
            x_morphing: ControlInput::Signal(1),
            y_morphing: ControlInput::Signal(2),
        },
    );
    let mut out = OperatorKind::default_output();
    if let OperatorKind::Output { source, noise, .. } = &mut out {
        *source = Some(grid);
        *noise = false;
    }
    plan.add("out", out);
    project.publish().unwrap();

    let corner_rms = |x: f64, y: f64| {
        let mut synth = MidiSynth::with_defaults(48000.0);
        events.dispatch(&mut synth);
        synth.set_control_input(1, x);
        synth.set_control_input(2, y);
        synth.note_on(0, 69, 100);
        let out = render(&mut synth, 9600);
        rms(&out[4800..])
    };

    // the (-1, -1) corner selects the first node, the loud instrument
    let loud = corner_rms(-1.0, -1.0);
    assert!(loud > 0.15, "loud corner {loud}");
}

#[test]
fn test_reference_playback_mode() {
    init_logging();
    let (mut project, events) = Project::new();
    let mut set = looped_set(1.0, -6.0);
    {
        let audio = Arc::get_mut(&mut set.waves[0].audio).unwrap();
        audio.original_samples = (0..48000)
            .map(|i| (i as f32 * std::f32::consts::TAU * 440.0 / 48000.0).sin() * 0.5)
            .collect();
    }
    project.add_instrument("a", set).unwrap();

    let plan = project.plan_mut();
    let a = plan.add("a", OperatorKind::Source { instrument: "a".into() });
    let mut out = OperatorKind::default_output();
    if let OperatorKind::Output { source, noise, .. } = &mut out {
        *source = Some(a);
        *noise = false;
    }
    plan.add("out", out);
    project.publish().unwrap();

    let mut synth = MidiSynth::with_defaults(48000.0);
    project.interface().set_original_samples(true);
    events.dispatch(&mut synth);
    synth.note_on(0, 69, 100);

    let out = render(&mut synth, 9600);
    // raw recording at 0.5 amplitude, scaled by velocity gain
    assert!(rms(&out[480..]) > 0.15);
}
