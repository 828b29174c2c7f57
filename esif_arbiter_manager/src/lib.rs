//! esif_arbiter_manager
//!
//! Concurrent arbitration subsystem built on `esif_arbiter_core`.
//!
//! Responsibilities:
//! - own per-participant arbitration contexts (through `ArbitrationSlot`)
//! - reference-count entries and block deletion until in-flight users are done
//! - queue corrective writes and run them on one worker thread
//! - fall back to direct execution whenever arbitration does not apply
//!
//! Lock order (outermost first): manager, context, entry, queue. Completion waits and the
//! host execution pipeline are only ever entered with none of these held.
//!
//! Non-goals:
//! - no device access (the host pipeline does it)
//! - no async

pub mod host;
pub mod slot;
pub mod entry;
pub mod context;
pub mod queue;
pub mod manager;

pub use host::{
    is_primitive_supported,
    ExecutionPipeline,
    Participant,
    ParticipantDirectory,
    PrimitiveCapability,
};

pub use slot::ArbitrationSlot;
pub use entry::{ArbEntry, EntryRef};
pub use context::{ArbContext, EntryIter};
pub use queue::{JobCompletion, JobStatus, PrimitiveJob, PrimitiveQueue};

pub use manager::{
    ArbitrationManager,
    PrimitiveOutcome,
    Target,
};
