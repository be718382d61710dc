//! A track owned by its own thread. Edits are applied in arrival order and
//! eagerly schedule resynthesis on the shared worker pool; a newer edit to a
//! segment supersedes the job already running for it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::RwLock;

use super::cache::{CachedSegment, Generation};
use super::fingerprint::EditFingerprint;
use super::orchestrator::{Rendered, Resynthesizer};
use super::pitch_edit::EditEvent;
use super::segment::SegmentId;
use super::track::Track;
use crate::error::{EngineError, Result, SegmentFailure};

/// What readers see without waiting on the track thread.
#[derive(Clone, Debug)]
pub struct TrackSnapshot {
    /// Pitch version the edited curve corresponds to.
    pub version: u64,
    pub f0_edited: Arc<[f32]>,
    /// Latest fully assembled audio, once one exists.
    pub audio: Option<Arc<[f32]>>,
}

enum Edit {
    Apply(Range<usize>, Vec<f32>),
    Reset(Range<usize>),
    Shift(f32),
    Seed(Vec<f32>),
}

enum Message {
    Edit {
        edit: Edit,
        reply: Sender<Result<EditEvent>>,
    },
    Render {
        reply: Sender<Result<Rendered>>,
    },
    SegmentDone {
        id: SegmentId,
        generation: Generation,
        outcome: Result<CachedSegment>,
    },
    Shutdown {
        reply: Option<Sender<Track>>,
    },
}

/// Handle to a track running on its own thread.
pub struct TrackHandle {
    name: String,
    tx: Sender<Message>,
    snapshot: Arc<RwLock<TrackSnapshot>>,
    thread: Option<JoinHandle<()>>,
}

impl TrackHandle {
    pub fn spawn(track: Track, resynth: Arc<Resynthesizer>) -> Result<Self> {
        let name = track.name.clone();
        let (tx, rx) = mpsc::channel();
        let snapshot = Arc::new(RwLock::new(TrackSnapshot {
            version: track.pitch.version(),
            f0_edited: track.f0_edited().into(),
            audio: None,
        }));

        let actor = TrackActor {
            track,
            resynth,
            tx: tx.clone(),
            snapshot: Arc::clone(&snapshot),
            in_flight: HashMap::new(),
            restart: HashSet::new(),
            failures: BTreeMap::new(),
            resynthesized: Vec::new(),
            waiting: Vec::new(),
        };
        let thread = std::thread::Builder::new()
            .name(format!("track-{}", name))
            .spawn(move || actor.run(rx))?;

        Ok(Self {
            name,
            tx,
            snapshot,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn apply_edit(&self, range: Range<usize>, values: Vec<f32>) -> Result<EditEvent> {
        self.edit(Edit::Apply(range, values))
    }

    pub fn reset(&self, range: Range<usize>) -> Result<EditEvent> {
        self.edit(Edit::Reset(range))
    }

    pub fn shift_all(&self, semitones: f32) -> Result<EditEvent> {
        self.edit(Edit::Shift(semitones))
    }

    pub fn seed_f0(&self, values: Vec<f32>) -> Result<EditEvent> {
        self.edit(Edit::Seed(values))
    }

    fn edit(&self, edit: Edit) -> Result<EditEvent> {
        let (reply, rx) = mpsc::channel();
        self.send(Message::Edit { edit, reply })?;
        rx.recv().map_err(|_| self.stopped())?
    }

    /// Block until every scheduled segment has finished, then return the
    /// assembled track.
    pub fn render(&self) -> Result<Rendered> {
        let (reply, rx) = mpsc::channel();
        self.send(Message::Render { reply })?;
        rx.recv().map_err(|_| self.stopped())?
    }

    /// Latest published state; never blocks on synthesis.
    pub fn snapshot(&self) -> TrackSnapshot {
        self.snapshot.read().clone()
    }

    /// Stop the thread and take the track back.
    pub fn shutdown(mut self) -> Result<Track> {
        let (reply, rx) = mpsc::channel();
        self.send(Message::Shutdown { reply: Some(reply) })?;
        let track = rx.recv().map_err(|_| self.stopped())?;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        Ok(track)
    }

    fn send(&self, message: Message) -> Result<()> {
        self.tx.send(message).map_err(|_| self.stopped())
    }

    fn stopped(&self) -> EngineError {
        EngineError::WorkerStopped(self.name.clone())
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(Message::Shutdown { reply: None });
            let _ = thread.join();
        }
    }
}

struct TrackActor {
    track: Track,
    resynth: Arc<Resynthesizer>,
    tx: Sender<Message>,
    snapshot: Arc<RwLock<TrackSnapshot>>,
    /// Segments with a job on the pool, keyed to the pitch that job renders.
    in_flight: HashMap<SegmentId, EditFingerprint>,
    /// In-flight segments edited again; rescheduled when their job returns.
    restart: HashSet<SegmentId>,
    failures: BTreeMap<SegmentId, String>,
    resynthesized: Vec<SegmentId>,
    waiting: Vec<Sender<Result<Rendered>>>,
}

impl TrackActor {
    fn run(mut self, rx: Receiver<Message>) {
        while let Ok(message) = rx.recv() {
            match message {
                Message::Edit { edit, reply } => {
                    let result = self.apply(edit);
                    if let Ok(event) = &result {
                        self.publish_pitch();
                        self.schedule(&[event.range.clone()]);
                    }
                    let _ = reply.send(result);
                }
                Message::Render { reply } => {
                    let pending = self.track.pending_ranges();
                    if let Err(e) = self.resynth.adapter().check_compatible(&self.track.analysis) {
                        let _ = reply.send(Err(e));
                        continue;
                    }
                    self.schedule(&pending);
                    self.waiting.push(reply);
                    if self.in_flight.is_empty() {
                        self.settle();
                    }
                }
                Message::SegmentDone {
                    id,
                    generation,
                    outcome,
                } => self.finish(id, generation, outcome),
                Message::Shutdown { reply } => {
                    log::debug!("Stopping track '{}'", self.track.name);
                    if let Some(reply) = reply {
                        let _ = reply.send(self.track);
                    }
                    return;
                }
            }
        }
    }

    fn apply(&mut self, edit: Edit) -> Result<EditEvent> {
        match edit {
            Edit::Apply(range, values) => self.track.apply_edit(range, &values),
            Edit::Reset(range) => self.track.reset(range),
            Edit::Shift(semitones) => Ok(self.track.shift_all(semitones)),
            Edit::Seed(values) => Ok(self.track.seed_f0(&values)),
        }
    }

    /// Start jobs for every stale segment touched by `ranges`. Segments
    /// already rendering whose pitch changed again are superseded.
    fn schedule(&mut self, ranges: &[Range<usize>]) {
        if self.resynth.adapter().check_compatible(&self.track.analysis).is_err() {
            return;
        }
        for id in self.resynth.affected(&self.track, ranges) {
            let current = self.track.fingerprint(&self.track.segments[id.0]);
            match self.in_flight.get(&id).copied() {
                Some(rendering) if rendering == current => {}
                Some(_) => {
                    self.track.cache.supersede(id);
                    self.restart.insert(id);
                }
                None => self.dispatch(id),
            }
        }
    }

    fn dispatch(&mut self, id: SegmentId) {
        let job = self.resynth.prepare(&mut self.track, id);
        self.in_flight.insert(id, job.fingerprint);

        let tx = self.tx.clone();
        let resynth = Arc::clone(&self.resynth);
        self.resynth.pool().spawn(move || {
            let outcome = resynth.run(&job);
            let _ = tx.send(Message::SegmentDone {
                id: job.id,
                generation: job.generation,
                outcome,
            });
        });
    }

    fn finish(&mut self, id: SegmentId, generation: Generation, outcome: Result<CachedSegment>) {
        self.in_flight.remove(&id);
        match outcome {
            Ok(entry) => {
                if self.track.cache.commit(id, generation, entry) {
                    self.failures.remove(&id);
                    self.resynthesized.push(id);
                }
            }
            Err(e) => {
                if self.track.cache.is_current(id, generation) {
                    log::warn!("Segment {} of '{}' failed: {}", id.0, self.track.name, e);
                    self.failures.insert(id, e.to_string());
                }
            }
        }

        if self.restart.remove(&id) && self.track.is_stale(&self.track.segments[id.0]) {
            self.dispatch(id);
        }
        if self.in_flight.is_empty() {
            self.settle();
        }
    }

    /// Everything scheduled has landed: assemble, publish, answer renders.
    fn settle(&mut self) {
        self.track.mark_synced();
        let samples = self.resynth.assemble(&self.track);
        self.snapshot.write().audio = Some(samples.as_slice().into());

        let resynthesized = std::mem::take(&mut self.resynthesized);
        let failures: Vec<SegmentFailure> = self
            .failures
            .iter()
            .map(|(&segment, reason)| SegmentFailure {
                segment,
                reason: reason.clone(),
            })
            .collect();
        self.failures.clear();

        for reply in self.waiting.drain(..) {
            let _ = reply.send(Ok(Rendered {
                samples: samples.clone(),
                resynthesized: resynthesized.clone(),
                failures: failures.clone(),
            }));
        }
    }

    fn publish_pitch(&self) {
        let mut snapshot = self.snapshot.write();
        snapshot.version = self.track.pitch.version();
        snapshot.f0_edited = self.track.f0_edited().into();
    }
}
