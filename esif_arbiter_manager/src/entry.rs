//! Shared, reference-counted arbitration entries.
//!
//! An entry is held structurally by its context (one reference taken at creation) and
//! temporally by every caller currently working on it (`EntryRef`). Deletion marks the entry,
//! drops the structural reference and then blocks until the temporal ones are gone.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use esif_arbiter_core::{
    AppHandle, ArbEntryInfo, ArbError, ArbResult, ArbitrationType, Corrective, EntryKey, EntryParams,
    EntryState, ParticipantId, Payload, PrimitiveId,
};

use crate::queue::{PrimitiveJob, PrimitiveQueue};

struct EntryCell {
    state: EntryState,
    refs: u32,
    marked_for_delete: bool,
}

pub struct ArbEntry {
    key: EntryKey,
    /// Creation sequence within the owning context.
    seq: u64,
    participant: ParticipantId,
    participant_name: Arc<str>,
    /// GET primitive that reads back what this entry writes.
    paired_get: Option<PrimitiveId>,
    cell: Mutex<EntryCell>,
    released: Condvar,
}

/// Counted reference to a live entry. Dropping it releases the reference.
pub struct EntryRef {
    entry: Arc<ArbEntry>,
}

impl Deref for EntryRef {
    type Target = ArbEntry;

    fn deref(&self) -> &ArbEntry {
        &self.entry
    }
}

impl EntryRef {
    /// Release the counted reference, keeping only the allocation alive.
    pub(crate) fn into_shared(self) -> Arc<ArbEntry> {
        Arc::clone(&self.entry)
    }
}

impl Drop for EntryRef {
    fn drop(&mut self) {
        self.entry.put_ref();
    }
}

impl std::fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntryRef").field("key", &self.entry.key).finish()
    }
}

impl ArbEntry {
    pub(crate) fn new(
        participant: ParticipantId,
        participant_name: Arc<str>,
        seq: u64,
        params: EntryParams,
        paired_get: Option<PrimitiveId>,
    ) -> Arc<Self> {
        debug!(
            participant = &*participant_name,
            entry = %params.key,
            arb_type = ?params.arb_type,
            upper = params.limits.upper,
            lower = params.limits.lower,
            "created arbitration entry"
        );
        Arc::new(Self {
            key: params.key,
            seq,
            participant,
            participant_name,
            paired_get,
            cell: Mutex::new(EntryCell { state: EntryState::new(params), refs: 1, marked_for_delete: false }),
            released: Condvar::new(),
        })
    }

    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    pub fn matches(&self, key: EntryKey) -> bool {
        self.key == key
    }

    pub(crate) fn ptr_eq(&self, other: &ArbEntry) -> bool {
        std::ptr::eq(self, other)
    }

    /// Take a temporal reference. Fails once the entry is marked for delete.
    pub fn get_ref(self: &Arc<Self>) -> ArbResult<EntryRef> {
        let mut cell = self.cell.lock();
        if cell.marked_for_delete {
            return Err(ArbError::MarkedForDelete);
        }
        cell.refs += 1;
        Ok(EntryRef { entry: Arc::clone(self) })
    }

    fn put_ref(&self) {
        let mut cell = self.cell.lock();
        cell.refs = cell.refs.saturating_sub(1);
        if cell.refs == 0 && cell.marked_for_delete {
            self.released.notify_all();
        }
    }

    pub fn ref_count(&self) -> u32 {
        self.cell.lock().refs
    }

    pub fn is_marked_for_delete(&self) -> bool {
        self.cell.lock().marked_for_delete
    }

    /// Mark for delete, release the structural reference and wait for the last temporal one.
    ///
    /// The caller must have unlinked the entry from its context and must not hold an
    /// `EntryRef` to it.
    pub(crate) fn destroy(&self) {
        let mut cell = self.cell.lock();
        if cell.marked_for_delete {
            return;
        }
        cell.marked_for_delete = true;
        cell.refs = cell.refs.saturating_sub(1);
        if cell.refs > 0 {
            debug!(participant = &*self.participant_name, entry = %self.key, refs = cell.refs, "waiting for entry references");
        }
        while cell.refs > 0 {
            self.released.wait(&mut cell);
        }
        cell.state.purge();
        debug!(participant = &*self.participant_name, entry = %self.key, "destroyed arbitration entry");
    }

    /// Submit `app`'s request and queue the new winner if it changed.
    ///
    /// `admitted` is evaluated under the entry lock. Disabling a scope purges each entry under
    /// this same lock after clearing its flag, so a request checked here is either refused or
    /// purged by the disable.
    pub fn execute(
        &self,
        app: AppHandle,
        request: Payload,
        queue: &PrimitiveQueue,
        admitted: impl FnOnce() -> bool,
    ) -> ArbResult<()> {
        let mut cell = self.cell.lock();
        if !admitted() {
            return Err(ArbError::NotSupported);
        }
        let corrective = cell.state.submit(app, request)?;
        if let Some(c) = corrective {
            self.queue_corrective(c, queue)?;
        }
        Ok(())
    }

    pub fn set_limits(&self, upper: Option<u32>, lower: Option<u32>, queue: &PrimitiveQueue) -> ArbResult<()> {
        let mut cell = self.cell.lock();
        if let Some(c) = cell.state.set_limits(upper, lower)? {
            self.queue_corrective(c, queue)?;
        }
        Ok(())
    }

    pub fn set_arbitration_type(&self, arb_type: ArbitrationType, queue: &PrimitiveQueue) -> ArbResult<()> {
        let mut cell = self.cell.lock();
        if let Some(c) = cell.state.set_arbitration_type(arb_type) {
            self.queue_corrective(c, queue)?;
        }
        Ok(())
    }

    pub fn remove_app(&self, app: AppHandle, queue: &PrimitiveQueue) {
        let mut cell = self.cell.lock();
        if let Some(c) = cell.state.remove_app(app) {
            // Nothing to report to; the loss is logged.
            let _ = self.queue_corrective(c, queue);
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.cell.lock().state.set_enabled(enabled);
    }

    pub fn is_enabled(&self) -> bool {
        self.cell.lock().state.is_enabled()
    }

    pub fn purge_requests(&self) {
        self.cell.lock().state.purge();
    }

    pub fn info(&self) -> ArbEntryInfo {
        self.cell.lock().state.info()
    }

    /// Clamped value currently applied by arbitration, if any.
    pub fn arbitrated_value(&self) -> Option<Payload> {
        self.cell.lock().state.arbitrated_value()
    }

    // Entry lock held: the queue lock nests inside it.
    fn queue_corrective(&self, c: Corrective, queue: &PrimitiveQueue) -> ArbResult<()> {
        let job = PrimitiveJob::corrective(self.participant, self.key, c.payload, c.requires_delay, self.paired_get);
        queue.enqueue(job).map_err(|e| {
            error!(participant = &*self.participant_name, entry = %self.key, error = %e, "failed to queue arbitrated request");
            e
        })
    }
}

impl std::fmt::Debug for ArbEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbEntry")
            .field("participant", &self.participant)
            .field("key", &self.key)
            .field("paired_get", &self.paired_get)
            .finish_non_exhaustive()
    }
}
