//! Per-participant arbitration context.
//!
//! A context owns the entry table of one participant. Entries are only ever appended or
//! removed by compaction, so the table keeps creation order. The table grows and shrinks in
//! fixed increments and is released entirely when it becomes empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use esif_arbiter_core::{
    AppHandle, ArbContextInfo, ArbError, ArbResult, ArbiterCfg, ArbitrationType, DefaultRow, EntryKey,
    EntryParams, Limits, ParticipantId, Payload,
};

use crate::entry::{ArbEntry, EntryRef};
use crate::host::{is_primitive_supported, Participant, ParticipantDirectory};
use crate::queue::PrimitiveQueue;

struct EntryTable {
    entries: Vec<Arc<ArbEntry>>,
    /// Slots reserved under the growth policy.
    capacity: usize,
    growth: usize,
    /// Creation sequence of the next entry. Table order is sequence order.
    next_seq: u64,
}

impl EntryTable {
    fn new(growth: usize) -> Self {
        Self { entries: Vec::new(), capacity: 0, growth: growth.max(1), next_seq: 0 }
    }

    fn find(&self, key: EntryKey) -> Option<&Arc<ArbEntry>> {
        self.entries.iter().find(|e| e.matches(key))
    }

    fn lookup(&self, key: EntryKey) -> ArbResult<EntryRef> {
        match self.find(key) {
            Some(e) => e.get_ref().map_err(|_| ArbError::NotFound),
            None => Err(ArbError::NotFound),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn insert(&mut self, entry: Arc<ArbEntry>) {
        if self.entries.len() == self.capacity {
            self.capacity += self.growth;
            self.entries.reserve_exact(self.capacity - self.entries.len());
        }
        self.entries.push(entry);
    }

    fn remove(&mut self, entry: &ArbEntry) -> ArbResult<()> {
        let pos = self.entries.iter().position(|e| e.ptr_eq(entry)).ok_or(ArbError::NotFound)?;
        self.entries.remove(pos);

        if self.entries.is_empty() {
            self.entries = Vec::new();
            self.capacity = 0;
        } else if self.capacity - self.entries.len() > self.growth {
            self.capacity -= self.growth;
            self.entries.shrink_to(self.capacity);
        }
        Ok(())
    }

    fn take_all(&mut self) -> Vec<Arc<ArbEntry>> {
        self.capacity = 0;
        std::mem::take(&mut self.entries)
    }
}

pub struct ArbContext {
    participant: ParticipantId,
    name: Arc<str>,
    enabled: AtomicBool,
    table: Mutex<EntryTable>,
}

impl ArbContext {
    /// Build a context for `participant`, seeded from the default table of its class.
    ///
    /// Built outside every lock; the manager installs it afterwards.
    pub(crate) fn create(participant: &dyn Participant, directory: &dyn ParticipantDirectory, cfg: &ArbiterCfg) -> Self {
        let ctx = Self {
            participant: participant.id(),
            name: Arc::from(participant.name()),
            enabled: AtomicBool::new(true),
            table: Mutex::new(EntryTable::new(cfg.entry_growth())),
        };
        if cfg.populate_defaults {
            ctx.populate_defaults(participant, directory, cfg.default_tables.for_class(participant.class()));
        }
        ctx
    }

    fn populate_defaults(&self, participant: &dyn Participant, directory: &dyn ParticipantDirectory, rows: &[DefaultRow]) {
        let mut table = self.table.lock();
        for row in rows {
            let Some(primitive) = directory.primitive_id(&row.primitive) else {
                debug!(participant = &*self.name, primitive = %row.primitive, "default primitive not in catalog");
                continue;
            };
            let params = row.to_params(primitive);
            if table.find(params.key).is_some() || !is_primitive_supported(participant, params.key) {
                continue;
            }
            let paired_get = directory.paired_get_primitive(primitive);
            let seq = table.next_seq();
            table.insert(ArbEntry::new(self.participant, self.name.clone(), seq, params, paired_get));
        }
        debug!(participant = &*self.name, entries = table.entries.len(), "populated default arbitration table");
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slots currently reserved for entries.
    pub fn capacity(&self) -> usize {
        self.table.lock().capacity
    }

    /// Counted reference to the matching entry. Entries being deleted are not found.
    pub fn lookup(&self, key: EntryKey) -> ArbResult<EntryRef> {
        self.table.lock().lookup(key)
    }

    /// Iterate over live entries, yielding a counted reference to each.
    ///
    /// Entries removed while iterating are skipped; the remaining ones are still visited once.
    pub fn iter(&self) -> EntryIter<'_> {
        EntryIter { ctx: self, last_seq: None }
    }

    /// Lookup, or create an entry with no comparator and unbounded limits when the
    /// participant exposes the primitive for arbitration.
    fn lookup_or_create(
        &self,
        table: &mut EntryTable,
        participant: &dyn Participant,
        directory: &dyn ParticipantDirectory,
        key: EntryKey,
    ) -> ArbResult<EntryRef> {
        if table.find(key).is_some() {
            return table.lookup(key);
        }
        if !is_primitive_supported(participant, key) {
            return Err(ArbError::NotSupported);
        }
        let params = EntryParams { key, arb_type: None, limits: Limits::default() };
        let seq = table.next_seq();
        let entry = ArbEntry::new(self.participant, self.name.clone(), seq, params, directory.paired_get_primitive(key.primitive));
        let r = entry.get_ref()?;
        table.insert(entry);
        Ok(r)
    }

    pub(crate) fn execute_primitive(
        &self,
        app: AppHandle,
        key: EntryKey,
        request: Payload,
        queue: &PrimitiveQueue,
        global: &AtomicBool,
    ) -> ArbResult<()> {
        let entry = {
            let table = self.table.lock();
            if !self.is_enabled() {
                return Err(ArbError::NotSupported);
            }
            table.lookup(key)?
        };
        // Both flags are read again under the entry lock: a disable may have run since.
        entry.execute(app, request, queue, || global.load(Ordering::Acquire) && self.is_enabled())
    }

    /// `None` addresses the whole participant.
    pub(crate) fn set_state(&self, key: Option<EntryKey>, enabled: bool) -> ArbResult<()> {
        let table = self.table.lock();
        match key {
            None => {
                self.enabled.store(enabled, Ordering::Release);
                if !enabled {
                    table.entries.iter().for_each(|e| e.purge_requests());
                }
                info!(participant = &*self.name, enabled, "set participant arbitration state");
            }
            Some(key) => {
                let entry = table.find(key).ok_or(ArbError::NotFound)?;
                entry.set_enabled(enabled);
                if enabled && !self.enabled.swap(true, Ordering::AcqRel) {
                    info!(participant = &*self.name, "enabled participant arbitration");
                }
            }
        }
        Ok(())
    }

    /// Unlink the matching entry and destroy it, waiting for in-flight users.
    pub(crate) fn stop_arbitration(&self, key: EntryKey) -> ArbResult<()> {
        for entry in self.iter() {
            if !entry.matches(key) {
                continue;
            }
            self.table.lock().remove(&entry)?;
            debug!(participant = &*self.name, entry = %key, "stopped arbitration");
            // The iteration reference must be gone before destroy waits for zero.
            entry.into_shared().destroy();
            return Ok(());
        }
        Err(ArbError::NotFound)
    }

    pub(crate) fn set_limits(
        &self,
        participant: &dyn Participant,
        directory: &dyn ParticipantDirectory,
        key: EntryKey,
        upper: Option<u32>,
        lower: Option<u32>,
        queue: &PrimitiveQueue,
    ) -> ArbResult<()> {
        let mut table = self.table.lock();
        let entry = self.lookup_or_create(&mut table, participant, directory, key)?;
        entry.set_limits(upper, lower, queue)
    }

    pub(crate) fn set_arbitration_function(
        &self,
        participant: &dyn Participant,
        directory: &dyn ParticipantDirectory,
        key: EntryKey,
        arb_type: ArbitrationType,
        queue: &PrimitiveQueue,
    ) -> ArbResult<()> {
        let mut table = self.table.lock();
        let entry = self.lookup_or_create(&mut table, participant, directory, key)?;
        entry.set_arbitration_type(arb_type, queue)
    }

    pub(crate) fn purge_requests(&self) {
        let table = self.table.lock();
        table.entries.iter().for_each(|e| e.purge_requests());
    }

    pub(crate) fn remove_app(&self, app: AppHandle, queue: &PrimitiveQueue) {
        for entry in self.iter() {
            entry.remove_app(app, queue);
        }
    }

    /// Snapshot of this context; `None` includes every entry.
    pub fn info(&self, key: Option<EntryKey>) -> ArbContextInfo {
        let table = self.table.lock();
        let entries = table
            .entries
            .iter()
            .filter(|e| key.map_or(true, |k| e.matches(k)))
            .map(|e| e.info())
            .collect();
        ArbContextInfo {
            participant_id: self.participant,
            participant_name: self.name.to_string(),
            is_arbitrated: true,
            enabled: self.is_enabled(),
            entries,
        }
    }

    /// Unlink and destroy every entry. Blocks on entries still referenced.
    pub(crate) fn destroy_entries(&self) {
        let entries = self.table.lock().take_all();
        for entry in entries {
            entry.destroy();
        }
    }
}

impl Drop for ArbContext {
    fn drop(&mut self) {
        for entry in self.table.get_mut().take_all() {
            entry.destroy();
        }
    }
}

impl std::fmt::Debug for ArbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArbContext")
            .field("participant", &self.participant)
            .field("name", &self.name)
            .field("enabled", &self.is_enabled())
            .finish_non_exhaustive()
    }
}

/// Iterator over the live entries of a context.
///
/// Each yielded `EntryRef` holds a reference until the consumer drops it.
pub struct EntryIter<'a> {
    ctx: &'a ArbContext,
    /// Creation sequence of the last entry visited.
    last_seq: Option<u64>,
}

impl Iterator for EntryIter<'_> {
    type Item = EntryRef;

    fn next(&mut self) -> Option<EntryRef> {
        let table = self.ctx.table.lock();

        // Table order is creation order, so resume at the first entry created after the
        // last one visited, whatever was removed in between.
        let start = match self.last_seq {
            Some(last) => table.entries.partition_point(|e| e.seq() <= last),
            None => 0,
        };

        for entry in &table.entries[start..] {
            self.last_seq = Some(entry.seq());
            match entry.get_ref() {
                Ok(r) => return Some(r),
                Err(_) => warn!(participant = self.ctx.name(), entry = %entry.key(), "skipping entry marked for delete"),
            }
        }
        None
    }
}
