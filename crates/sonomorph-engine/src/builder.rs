//! Background rebuilding of wave sets.
//!
//! Re-encoding an instrument can take long enough to be unacceptable on
//! the control thread (let alone audio), so builds run on a dedicated
//! worker. Jobs are keyed by project object id; submitting a new build
//! for an object cancels the superseded one, and results come back
//! through a channel the control thread polls.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use tracing::{debug, warn};

use sonomorph_model::WavSet;

use crate::error::Result;

/// Produces the wave set for one object; runs on the worker thread.
/// Receives the job's liveness flag; long builds should poll it and
/// abort early once it reads false.
pub type BuildFn = Box<dyn FnOnce(&AtomicBool) -> Result<WavSet> + Send + 'static>;

struct Job {
    object_id: u64,
    build: BuildFn,
    alive: Arc<AtomicBool>,
}

/// A finished build, ready to be integrated by the control thread.
pub struct BuildResult {
    pub object_id: u64,
    pub result: Result<Arc<WavSet>>,
}

/// Worker thread handle.
///
/// Cancellation is cooperative: killed jobs that already started still
/// run to completion, but their results are discarded.
pub struct RebuildWorker {
    jobs_tx: Option<Sender<Job>>,
    results_rx: Receiver<BuildResult>,
    live: Arc<DashMap<u64, Arc<AtomicBool>>>,
    handle: Option<JoinHandle<()>>,
}

impl RebuildWorker {
    pub fn new() -> Self {
        let (jobs_tx, jobs_rx) = unbounded::<Job>();
        let (results_tx, results_rx) = unbounded::<BuildResult>();

        let handle = thread::Builder::new()
            .name("sonomorph-rebuild".into())
            .spawn(move || {
                while let Ok(job) = jobs_rx.recv() {
                    let Job {
                        object_id,
                        build,
                        alive,
                    } = job;
                    if !alive.load(Ordering::Acquire) {
                        debug!(object_id, "skipping cancelled build");
                        continue;
                    }
                    let result = build(&alive).and_then(|set| {
                        set.validate()?;
                        Ok(Arc::new(set))
                    });
                    if !alive.load(Ordering::Acquire) {
                        debug!(object_id, "discarding superseded build");
                        continue;
                    }
                    if results_tx.send(BuildResult { object_id, result }).is_err() {
                        break;
                    }
                }
            })
            .ok();
        if handle.is_none() {
            warn!("could not spawn rebuild worker thread");
        }

        Self {
            jobs_tx: Some(jobs_tx),
            results_rx,
            live: Arc::new(DashMap::new()),
            handle,
        }
    }

    /// Queue a build for `object_id`, cancelling any pending build for
    /// the same object.
    pub fn submit(&self, object_id: u64, build: BuildFn) {
        let alive = Arc::new(AtomicBool::new(true));
        if let Some(old) = self.live.insert(object_id, Arc::clone(&alive)) {
            old.store(false, Ordering::Release);
        }
        if let Some(tx) = &self.jobs_tx {
            let _ = tx.send(Job {
                object_id,
                build,
                alive,
            });
        }
    }

    /// Cancel the pending build for one object, if any.
    pub fn kill_jobs_by_id(&self, object_id: u64) {
        if let Some((_, alive)) = self.live.remove(&object_id) {
            alive.store(false, Ordering::Release);
        }
    }

    pub fn kill_all_jobs(&self) {
        self.live.retain(|_, alive| {
            alive.store(false, Ordering::Release);
            false
        });
    }

    /// Whether a live build for `object_id` is still in flight.
    pub fn search_job(&self, object_id: u64) -> bool {
        self.live
            .get(&object_id)
            .map(|alive| alive.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Fetch one finished build, non-blocking.
    pub fn try_recv(&self) -> Option<BuildResult> {
        let result = self.results_rx.try_recv().ok()?;
        self.live
            .remove_if(&result.object_id, |_, alive| alive.load(Ordering::Acquire));
        Some(result)
    }

    /// Block until one build finishes (tests and batch tools).
    pub fn recv(&self) -> Option<BuildResult> {
        let result = self.results_rx.recv().ok()?;
        self.live
            .remove_if(&result.object_id, |_, alive| alive.load(Ordering::Acquire));
        Some(result)
    }
}

impl Default for RebuildWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RebuildWorker {
    fn drop(&mut self) {
        self.jobs_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
