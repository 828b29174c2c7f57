//! Primitive execution queue and its worker.
//!
//! Arbitration decisions are taken under entry locks, but the resulting device writes are
//! performed here, by one dedicated thread, outside every arbitration lock.
//!
//! Jobs that require delay are followed by a marker copy. The worker removes the marker only
//! after the real job has executed, so `must_delay` keeps reporting the pending write during
//! the window where the job has left the queue but has not finished yet.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use esif_arbiter_core::{ArbError, ArbResult, EntryKey, ParticipantId, Payload, PrimitiveId};

use crate::host::ExecutionPipeline;

/// Final state of a queued job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// The pipeline ran the primitive.
    Executed(ArbResult<Payload>),
    /// The queue shut down (or refused the job) before it ran.
    Abandoned,
}

/// One-shot completion signal shared between a waiter and the queue.
#[derive(Debug, Default)]
pub struct JobCompletion {
    status: Mutex<Option<JobStatus>>,
    done: Condvar,
}

impl JobCompletion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// First completion wins; later calls are ignored.
    fn complete(&self, status: JobStatus) {
        let mut slot = self.status.lock();
        if slot.is_none() {
            *slot = Some(status);
            self.done.notify_all();
        }
    }

    /// Block until the job has executed or was abandoned.
    pub fn wait(&self) -> JobStatus {
        let mut slot = self.status.lock();
        loop {
            if let Some(status) = slot.as_ref() {
                return status.clone();
            }
            self.done.wait(&mut slot);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status.lock().is_some()
    }
}

/// A primitive execution request for the worker.
#[derive(Debug)]
pub struct PrimitiveJob {
    pub participant: ParticipantId,
    pub key: EntryKey,
    pub request: Payload,
    /// Unarbitrated reads of `delayed_primitive` must wait for this job.
    pub requires_delay: bool,
    pub delayed_primitive: Option<PrimitiveId>,
    completion: Option<Arc<JobCompletion>>,
}

impl PrimitiveJob {
    /// Corrective write of an arbitrated value; nobody waits for it.
    pub fn corrective(
        participant: ParticipantId,
        key: EntryKey,
        request: Payload,
        requires_delay: bool,
        delayed_primitive: Option<PrimitiveId>,
    ) -> Self {
        Self {
            participant,
            key,
            request,
            requires_delay,
            delayed_primitive: if requires_delay { delayed_primitive } else { None },
            completion: None,
        }
    }

    /// Job whose caller blocks on `completion` for the response.
    pub fn awaited(participant: ParticipantId, key: EntryKey, request: Payload, completion: Arc<JobCompletion>) -> Self {
        Self {
            participant,
            key,
            request,
            requires_delay: false,
            delayed_primitive: None,
            completion: Some(completion),
        }
    }

    fn finish(&mut self, status: JobStatus) {
        if let Some(c) = self.completion.take() {
            c.complete(status);
        }
    }

    fn delays(&self, primitive: PrimitiveId) -> bool {
        self.requires_delay && self.delayed_primitive == Some(primitive)
    }
}

impl Drop for PrimitiveJob {
    fn drop(&mut self) {
        // Release any waiter of a job that never ran.
        self.finish(JobStatus::Abandoned);
    }
}

#[derive(Debug)]
enum Item {
    Job(PrimitiveJob),
    /// Stand-in for a delaying job that has been pulled but not finished.
    Marker { origin: u64, delayed_primitive: PrimitiveId },
    /// Completes once every item queued before it has been processed.
    Barrier(Arc<JobCompletion>),
}

#[derive(Debug)]
struct Queued {
    id: u64,
    item: Item,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Queued>,
    next_id: u64,
    shutdown: bool,
}

/// FIFO of primitive jobs drained by a single worker.
#[derive(Debug, Default)]
pub struct PrimitiveQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

/// Held queue lock. Checking for delay and enqueueing must happen under the same guard.
pub struct QueueGuard<'a> {
    queue: &'a PrimitiveQueue,
    state: MutexGuard<'a, QueueState>,
}

impl QueueGuard<'_> {
    /// Whether a pending delaying job (or its marker) targets `primitive`.
    pub fn must_delay(&self, primitive: PrimitiveId) -> bool {
        self.state.items.iter().any(|q| match &q.item {
            Item::Job(job) => job.delays(primitive),
            Item::Marker { delayed_primitive, .. } => *delayed_primitive == primitive,
            Item::Barrier(_) => false,
        })
    }

    pub fn enqueue(&mut self, job: PrimitiveJob) -> ArbResult<()> {
        if self.state.shutdown {
            warn!(participant = %job.participant, entry = %job.key, "primitive queue stopped; job refused");
            return Err(ArbError::ShuttingDown);
        }
        let id = self.state.next_id;
        self.state.next_id += 1;

        let marker = match job.delayed_primitive {
            Some(p) if job.requires_delay => Some(p),
            _ => None,
        };
        debug!(
            participant = %job.participant,
            entry = %job.key,
            requires_delay = job.requires_delay,
            "queued primitive request"
        );
        self.state.items.push_back(Queued { id, item: Item::Job(job) });
        if let Some(delayed_primitive) = marker {
            self.state.items.push_back(Queued { id, item: Item::Marker { origin: id, delayed_primitive } });
        }
        self.queue.available.notify_one();
        Ok(())
    }
}

impl PrimitiveQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> QueueGuard<'_> {
        QueueGuard { queue: self, state: self.state.lock() }
    }

    pub fn enqueue(&self, job: PrimitiveJob) -> ArbResult<()> {
        self.lock().enqueue(job)
    }

    /// Number of real jobs waiting (markers and barriers excluded).
    pub fn pending_jobs(&self) -> usize {
        self.state.lock().items.iter().filter(|q| matches!(q.item, Item::Job(_))).count()
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Completion that fires once everything queued so far has been processed.
    pub fn barrier(&self) -> ArbResult<Arc<JobCompletion>> {
        let done = JobCompletion::new();
        let mut st = self.state.lock();
        if st.shutdown {
            return Err(ArbError::ShuttingDown);
        }
        let id = st.next_id;
        st.next_id += 1;
        st.items.push_back(Queued { id, item: Item::Barrier(done.clone()) });
        self.available.notify_one();
        Ok(done)
    }

    /// Stop accepting work and wake the worker so it observes the shutdown.
    pub fn shutdown(&self) {
        let mut st = self.state.lock();
        st.shutdown = true;
        self.available.notify_all();
    }

    /// Worker loop. Runs until `shutdown`, then releases every job left behind.
    pub fn run(&self, pipeline: &dyn ExecutionPipeline) {
        debug!("primitive queue worker started");
        while let Some((id, mut job)) = self.next_job() {
            let result = pipeline.execute_unarbitrated(job.participant, job.key, &job.request);
            if let Err(e) = &result {
                debug!(participant = %job.participant, entry = %job.key, error = %e, "executed queued primitive request");
            }

            if job.requires_delay {
                let mut st = self.state.lock();
                if let Some(pos) = st
                    .items
                    .iter()
                    .position(|q| matches!(q.item, Item::Marker { origin, .. } if origin == id))
                {
                    st.items.remove(pos);
                }
            }
            job.finish(JobStatus::Executed(result));
        }
        self.drain();
        debug!("primitive queue worker exited");
    }

    fn next_job(&self) -> Option<(u64, PrimitiveJob)> {
        let mut st = self.state.lock();
        loop {
            if st.shutdown {
                return None;
            }
            match st.items.pop_front() {
                Some(Queued { id, item: Item::Job(job) }) => return Some((id, job)),
                Some(Queued { item: Item::Barrier(done), .. }) => {
                    done.complete(JobStatus::Executed(Ok(Payload::empty())));
                }
                // Markers of jobs still in flight are never at the head; stale ones are skipped.
                Some(Queued { item: Item::Marker { .. }, .. }) => {}
                None => self.available.wait(&mut st),
            }
        }
    }

    fn drain(&self) {
        let left: Vec<Queued> = self.state.lock().items.drain(..).collect();
        let jobs = left.iter().filter(|q| matches!(q.item, Item::Job(_))).count();
        if jobs > 0 {
            warn!(jobs, "primitive queue stopped with pending jobs; releasing waiters");
        }
        for q in left {
            match q.item {
                Item::Barrier(done) => done.complete(JobStatus::Abandoned),
                // Dropping a job fires its completion as abandoned.
                Item::Job(job) => drop(job),
                Item::Marker { .. } => {}
            }
        }
    }
}
