//! Control-plane state and the bridge to the audio thread.
//!
//! A [`Project`] owns the editable [`MorphPlan`] and the instrument
//! index. Every change is published as a complete [`PlanConfig`]
//! snapshot sent through a bounded channel; the audio thread applies it
//! between blocks and sends the superseded config back, so the last
//! reference to a big object is never dropped on the audio thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, info, warn};

use sonomorph_model::WavSet;

use crate::builder::{BuildFn, RebuildWorker};
use crate::error::{Error, Result};
use crate::midi::MidiSynth;
use crate::morph::config::{PlanConfig, WavSetResolver};
use crate::morph::ops::{MorphPlan, OperatorKind};
use crate::morph::synth::PlanUpdate;

const EVENT_QUEUE_DEPTH: usize = 256;

/// A control-thread request executed on the audio thread. The returned
/// config, if any, is routed back to the control thread for
/// deallocation.
pub type ControlEvent = Box<dyn FnOnce(&mut MidiSynth) -> Option<Arc<PlanConfig>> + Send>;

/// Control-thread endpoint of the synth bridge.
pub struct SynthInterface {
    events_tx: Sender<ControlEvent>,
    reclaim_rx: Receiver<Arc<PlanConfig>>,
    published: Arc<ArcSwapOption<PlanConfig>>,
    voices_active: Arc<AtomicUsize>,
}

impl SynthInterface {
    /// Queue an event for the audio thread. Returns false when the
    /// queue is full or the audio side is gone; the caller may retry.
    pub fn send_event(
        &self,
        event: impl FnOnce(&mut MidiSynth) -> Option<Arc<PlanConfig>> + Send + 'static,
    ) -> bool {
        self.events_tx.try_send(Box::new(event)).is_ok()
    }

    /// Drop superseded configs returned by the audio thread. Call
    /// periodically (e.g. from a UI timer); returns how many objects
    /// were reclaimed.
    pub fn reclaim(&self) -> usize {
        let mut count = 0;
        while self.reclaim_rx.try_recv().is_ok() {
            count += 1;
        }
        count
    }

    /// The most recently published config (what the audio thread is
    /// converging to, not necessarily what it already applied).
    pub fn published_config(&self) -> Option<Arc<PlanConfig>> {
        self.published.load_full()
    }

    /// Voice count as of the audio thread's last block.
    pub fn active_voice_count(&self) -> usize {
        self.voices_active.load(Ordering::Relaxed)
    }

    pub fn set_control_input(&self, signal: u8, value: f64) -> bool {
        self.send_event(move |synth| {
            synth.set_control_input(signal, value);
            None
        })
    }

    pub fn set_gain_db(&self, db: f32) -> bool {
        self.send_event(move |synth| {
            synth.set_gain_db(db);
            None
        })
    }

    pub fn set_original_samples(&self, enabled: bool) -> bool {
        self.send_event(move |synth| {
            synth.set_original_samples(enabled);
            None
        })
    }

    fn publish(&self, config: Arc<PlanConfig>) -> bool {
        let update_config = Arc::clone(&config);
        let sent = self.send_event(move |synth| synth.apply_update(PlanUpdate::new(update_config)));
        if sent {
            self.published.store(Some(config));
        }
        sent
    }
}

/// Audio-thread endpoint: executes queued control events and reports
/// state back.
pub struct SynthEvents {
    events_rx: Receiver<ControlEvent>,
    reclaim_tx: Sender<Arc<PlanConfig>>,
    voices_active: Arc<AtomicUsize>,
}

impl SynthEvents {
    /// Run all pending control events. Call at the start of each audio
    /// block, before `MidiSynth::process`.
    pub fn dispatch(&self, synth: &mut MidiSynth) {
        while let Ok(event) = self.events_rx.try_recv() {
            if let Some(old_config) = event(synth) {
                // full queue means the control side stopped reclaiming;
                // dropping here is the lesser evil
                let _ = self.reclaim_tx.try_send(old_config);
            }
        }
    }

    /// Publish observable state. Call at the end of each audio block.
    pub fn publish_state(&self, synth: &MidiSynth) {
        self.voices_active
            .store(synth.active_voice_count(), Ordering::Relaxed);
    }
}

/// The user-facing document: plan, instruments and user samples.
pub struct Project {
    plan: MorphPlan,
    generation: u64,
    instruments: HashMap<String, Arc<WavSet>>,
    objects: HashMap<u64, Arc<WavSet>>,
    next_object_id: u64,
    interface: SynthInterface,
    worker: RebuildWorker,
}

impl Project {
    /// Create a project and the audio-side endpoint to pair with a
    /// [`MidiSynth`].
    pub fn new() -> (Self, SynthEvents) {
        let (events_tx, events_rx) = bounded(EVENT_QUEUE_DEPTH);
        let (reclaim_tx, reclaim_rx) = bounded(EVENT_QUEUE_DEPTH);
        let published = Arc::new(ArcSwapOption::empty());
        let voices_active = Arc::new(AtomicUsize::new(0));

        let project = Self {
            plan: MorphPlan::new(),
            generation: 0,
            instruments: HashMap::new(),
            objects: HashMap::new(),
            next_object_id: 1,
            interface: SynthInterface {
                events_tx,
                reclaim_rx,
                published: Arc::clone(&published),
                voices_active: Arc::clone(&voices_active),
            },
            worker: RebuildWorker::new(),
        };
        let events = SynthEvents {
            events_rx,
            reclaim_tx,
            voices_active,
        };
        (project, events)
    }

    pub fn plan(&self) -> &MorphPlan {
        &self.plan
    }

    /// Mutable plan access; call [`Project::publish`] afterwards to make
    /// the edits audible.
    pub fn plan_mut(&mut self) -> &mut MorphPlan {
        &mut self.plan
    }

    pub fn interface(&self) -> &SynthInterface {
        &self.interface
    }

    /// Register an instrument under a name referenced by source
    /// operators.
    pub fn add_instrument(&mut self, name: impl Into<String>, wav_set: WavSet) -> Result<()> {
        wav_set.validate()?;
        let name = name.into();
        info!(instrument = %name, waves = wav_set.waves.len(), "adding instrument");
        self.instruments.insert(name, Arc::new(wav_set));
        Ok(())
    }

    pub fn remove_instrument(&mut self, name: &str) {
        self.instruments.remove(name);
    }

    /// Store a user sample object, returning its id for `WavSource`
    /// operators.
    pub fn add_object(&mut self, wav_set: WavSet) -> Result<u64> {
        wav_set.validate()?;
        let id = self.next_object_id;
        self.next_object_id += 1;
        self.objects.insert(id, Arc::new(wav_set));
        Ok(id)
    }

    /// Rebuild an object's wave set in the background. A pending build
    /// for the same object is superseded.
    pub fn rebuild_object(&mut self, object_id: u64, build: BuildFn) {
        debug!(object_id, "queueing rebuild");
        self.worker.submit(object_id, build);
    }

    pub fn rebuild_in_progress(&self, object_id: u64) -> bool {
        self.worker.search_job(object_id)
    }

    /// Integrate finished background builds. Returns the number of
    /// objects updated; republish when nonzero.
    pub fn poll_rebuilds(&mut self) -> usize {
        let mut updated = 0;
        while let Some(done) = self.worker.try_recv() {
            match done.result {
                Ok(set) => {
                    self.objects.insert(done.object_id, set);
                    updated += 1;
                }
                Err(err) => warn!(object_id = done.object_id, %err, "rebuild failed"),
            }
        }
        updated
    }

    /// Snapshot the current plan and send it to the audio thread.
    ///
    /// Returns the new generation number. Fails if the plan does not
    /// validate or names an instrument that is not in the index; a full
    /// event queue leaves the plan edited but unpublished (retry later).
    pub fn publish(&mut self) -> Result<u64> {
        for op in self.plan.operators() {
            if let OperatorKind::Source { instrument } = &op.kind {
                if !self.instruments.contains_key(instrument) {
                    return Err(Error::UnknownInstrument(instrument.clone()));
                }
            }
        }

        let generation = self.generation + 1;
        let config = PlanConfig::from_plan(&self.plan, generation, &ProjectIndex(self))?;
        self.generation = generation;
        if !self.interface.publish(config) {
            warn!(generation, "event queue full, config not sent");
        }
        Ok(generation)
    }
}

/// Resolver view over a project's instrument and object maps.
struct ProjectIndex<'a>(&'a Project);

impl WavSetResolver for ProjectIndex<'_> {
    fn by_name(&self, instrument: &str) -> Option<Arc<WavSet>> {
        self.0.instruments.get(instrument).cloned()
    }

    fn by_object_id(&self, object_id: u64) -> Option<Arc<WavSet>> {
        self.0.objects.get(&object_id).cloned()
    }
}
