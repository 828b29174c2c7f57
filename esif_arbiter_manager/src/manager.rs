//! Arbitration manager: the public entry point of the subsystem.
//!
//! One manager exists per framework instance. It owns the global enable flag and the
//! primitive queue with its worker thread, and reaches participants only through the
//! host directory. Contexts are created lazily, the first time a participant is addressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use esif_arbiter_core::{
    AppHandle, ArbContextInfo, ArbError, ArbInfo, ArbResult, ArbiterCfg, ArbitrationType, EntryKey,
    ParticipantId, Payload,
};

use crate::context::ArbContext;
use crate::host::{ExecutionPipeline, Participant, ParticipantDirectory};
use crate::queue::{JobCompletion, JobStatus, PrimitiveJob, PrimitiveQueue};

/// Scope of an enable/disable request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// Every participant.
    Global,
    /// Every entry of one participant.
    Participant(ParticipantId),
    /// One entry.
    Entry(ParticipantId, EntryKey),
}

impl Target {
    fn entry_key(&self) -> Option<EntryKey> {
        match self {
            Target::Entry(_, key) => Some(*key),
            _ => None,
        }
    }
}

/// What happened to a primitive submitted through the manager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrimitiveOutcome {
    /// The request was arbitrated; any resulting write is applied by the queue worker.
    Queued,
    /// The primitive ran without arbitration; the response is attached.
    Executed(Payload),
}

struct Shared {
    cfg: ArbiterCfg,
    enabled: AtomicBool,
    /// Serializes context installation and multi-scope state changes.
    mgr_lock: Mutex<()>,
    queue: PrimitiveQueue,
    directory: Arc<dyn ParticipantDirectory>,
    pipeline: Arc<dyn ExecutionPipeline>,
}

pub struct ArbitrationManager {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ArbitrationManager {
    /// Create the queue and start its worker thread.
    pub fn new(
        cfg: ArbiterCfg,
        directory: Arc<dyn ParticipantDirectory>,
        pipeline: Arc<dyn ExecutionPipeline>,
    ) -> ArbResult<Self> {
        let shared = Arc::new(Shared {
            enabled: AtomicBool::new(cfg.arbitration_enabled),
            mgr_lock: Mutex::new(()),
            queue: PrimitiveQueue::new(),
            directory,
            pipeline,
            cfg,
        });

        let worker = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name(shared.cfg.worker_thread_name.clone())
            .spawn(move || worker.queue.run(worker.pipeline.as_ref()))
            .map_err(|e| {
                error!(error = %e, "failed to start primitive queue worker");
                ArbError::NoMemory
            })?;

        info!(enabled = shared.cfg.arbitration_enabled, "arbitration manager initialized");
        Ok(Self { shared, worker: Mutex::new(Some(handle)) })
    }

    /// Framework start hook. The worker already runs from `new`.
    pub fn start(&self) -> ArbResult<()> {
        if self.shared.queue.is_shutdown() {
            return Err(ArbError::ShuttingDown);
        }
        debug!("arbitration manager started");
        Ok(())
    }

    /// Stop the worker and release every waiter. Idempotent.
    pub fn stop(&self) {
        self.shared.queue.shutdown();
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            error!("primitive queue worker panicked");
        }
        info!("arbitration manager stopped");
    }

    pub fn cfg(&self) -> &ArbiterCfg {
        &self.shared.cfg
    }

    pub fn is_enabled(&self) -> bool {
        self.shared.enabled.load(Ordering::Acquire)
    }

    /// Jobs waiting for the worker.
    pub fn pending_jobs(&self) -> usize {
        self.shared.queue.pending_jobs()
    }

    /// Block until every job queued so far has been processed.
    pub fn flush(&self) -> ArbResult<()> {
        match self.shared.queue.barrier()?.wait() {
            JobStatus::Executed(_) => Ok(()),
            JobStatus::Abandoned => Err(ArbError::ShuttingDown),
        }
    }

    /// Submit `request` from `app`. Falls back to direct execution whenever arbitration does
    /// not take the request.
    pub fn execute_primitive(
        &self,
        app: AppHandle,
        participant: ParticipantId,
        key: EntryKey,
        request: Payload,
    ) -> ArbResult<PrimitiveOutcome> {
        let up = self.participant(participant)?;

        let arbitrated = if self.is_enabled() {
            self.ctx_inst(up.as_ref()).and_then(|ctx| {
                ctx.execute_primitive(app, key, request.clone(), &self.shared.queue, &self.shared.enabled)
            })
        } else {
            Err(ArbError::NotSupported)
        };

        match arbitrated {
            Ok(()) => Ok(PrimitiveOutcome::Queued),
            Err(reason) => {
                debug!(participant = up.name(), %app, entry = %key, %reason, "executing unarbitrated primitive");
                self.execute_unarbitrated(participant, key, &request).map(PrimitiveOutcome::Executed)
            }
        }
    }

    /// Direct execution, delayed behind a pending arbitrated write of the value it reads.
    fn execute_unarbitrated(&self, participant: ParticipantId, key: EntryKey, request: &Payload) -> ArbResult<Payload> {
        if self.is_enabled() {
            let completion = JobCompletion::new();
            let queued = {
                let mut queue = self.shared.queue.lock();
                queue.must_delay(key.primitive)
                    && queue
                        .enqueue(PrimitiveJob::awaited(participant, key, request.clone(), Arc::clone(&completion)))
                        .is_ok()
            };
            if queued {
                debug!(%participant, entry = %key, "delaying primitive behind pending arbitrated request");
                match completion.wait() {
                    JobStatus::Executed(result) => return result,
                    JobStatus::Abandoned => {
                        debug!(%participant, entry = %key, "delayed primitive was not executed");
                    }
                }
            }
        }
        self.shared.pipeline.execute_unarbitrated(participant, key, request)
    }

    /// Enable or disable arbitration at one scope.
    ///
    /// Enabling a narrow scope also enables every enclosing scope. Disabling drops the held
    /// requests of the scope without re-applying anything.
    pub fn set_arbitration_state(&self, target: Target, enabled: bool) -> ArbResult<()> {
        match target {
            Target::Global => {
                let _mgr = self.shared.mgr_lock.lock();
                self.shared.enabled.store(enabled, Ordering::Release);
                if !enabled {
                    self.purge_requests_locked();
                }
                info!(enabled, "set arbitration state for all participants");
            }
            Target::Participant(id) | Target::Entry(id, _) => {
                let up = self.participant(id)?;
                let ctx = self.ctx_inst(up.as_ref())?;

                let _mgr = self.shared.mgr_lock.lock();
                ctx.set_state(target.entry_key(), enabled)?;
                if enabled && !self.shared.enabled.swap(true, Ordering::AcqRel) {
                    info!("enabled arbitration for all participants");
                }
            }
        }
        Ok(())
    }

    /// Remove one entry for good. Blocks until in-flight users of the entry are done.
    pub fn stop_arbitration(&self, participant: ParticipantId, key: EntryKey) -> ArbResult<()> {
        let up = self.participant(participant)?;
        self.ctx_inst(up.as_ref())?.stop_arbitration(key)
    }

    /// Set one or both bounds, creating the entry when the primitive is arbitrable.
    pub fn set_limits(
        &self,
        participant: ParticipantId,
        key: EntryKey,
        upper: Option<u32>,
        lower: Option<u32>,
    ) -> ArbResult<()> {
        let up = self.participant(participant)?;
        let ctx = self.ctx_inst(up.as_ref())?;
        ctx.set_limits(up.as_ref(), self.shared.directory.as_ref(), key, upper, lower, &self.shared.queue)
    }

    /// Install a comparator, creating the entry when the primitive is arbitrable.
    pub fn set_arbitration_function(
        &self,
        participant: ParticipantId,
        key: EntryKey,
        arb_type: ArbitrationType,
    ) -> ArbResult<()> {
        let up = self.participant(participant)?;
        let ctx = self.ctx_inst(up.as_ref())?;
        ctx.set_arbitration_function(up.as_ref(), self.shared.directory.as_ref(), key, arb_type, &self.shared.queue)
    }

    /// Snapshot of arbitration state. `None` selects every participant or every entry.
    ///
    /// Participants without a context appear as disabled placeholders.
    pub fn get_information(&self, participant: Option<ParticipantId>, key: Option<EntryKey>) -> ArbInfo {
        let participants = self
            .shared
            .directory
            .participants()
            .into_iter()
            .filter(|up| participant.map_or(true, |id| up.id() == id))
            .map(|up| match up.arbitration_slot().get() {
                Some(ctx) => ctx.info(key),
                None => ArbContextInfo::unarbitrated(up.id(), up.name()),
            })
            .collect();

        ArbInfo { enabled: self.is_enabled(), participants }
    }

    /// Withdraw every request `app` holds, on every participant.
    pub fn remove_app(&self, app: AppHandle) {
        debug!(%app, "removing application from arbitration");
        for up in self.shared.directory.participants() {
            if let Some(ctx) = up.arbitration_slot().get() {
                ctx.remove_app(app, &self.shared.queue);
            }
        }
    }

    fn participant(&self, id: ParticipantId) -> ArbResult<Arc<dyn Participant>> {
        self.shared.directory.participant(id).ok_or(ArbError::ParticipantNotFound)
    }

    /// The participant's context, created on first use.
    fn ctx_inst(&self, up: &dyn Participant) -> ArbResult<Arc<ArbContext>> {
        let slot = up.arbitration_slot();
        if let Some(ctx) = slot.get() {
            return Ok(ctx);
        }
        info!(participant = up.name(), "no arbitration context present");

        let built = Arc::new(ArbContext::create(up, self.shared.directory.as_ref(), &self.shared.cfg));

        let _mgr = self.shared.mgr_lock.lock();
        let installed = slot.install(Arc::clone(&built)).ok_or(ArbError::ParticipantNotFound)?;
        if Arc::ptr_eq(&installed, &built) {
            info!(participant = up.name(), entries = installed.len(), "created participant arbitration context");
        }
        Ok(installed)
    }

    // Manager lock held.
    fn purge_requests_locked(&self) {
        for up in self.shared.directory.participants() {
            if let Some(ctx) = up.arbitration_slot().get() {
                ctx.purge_requests();
            }
        }
    }
}

impl Drop for ArbitrationManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ArbitrationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbitrationManager")
            .field("enabled", &self.is_enabled())
            .field("pending_jobs", &self.pending_jobs())
            .finish_non_exhaustive()
    }
}
