//! Host-facing interfaces: what the arbitration subsystem consumes from the framework.
//!
//! The manager never talks to devices itself. Products provide:
//! - an `ExecutionPipeline` that performs the real, unarbitrated primitive call
//! - a `ParticipantDirectory` that resolves participant handles and the primitive catalog
//!
//! Each `Participant` embeds an `ArbitrationSlot`, which owns that participant's
//! arbitration context for the participant's whole lifetime.

use std::sync::Arc;

use esif_arbiter_core::{
    ArbResult, EntryKey, ParticipantClass, ParticipantId, Payload, PrimitiveId, ARB_DATA_SIZE,
};

use crate::slot::ArbitrationSlot;

/// What the primitive catalog says about one (primitive, domain, instance) of a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrimitiveCapability {
    /// The primitive is a SET opcode.
    pub settable: bool,
    /// Size of the request data type in bytes.
    pub request_size: usize,
}

impl PrimitiveCapability {
    pub fn set_u32() -> Self {
        Self { settable: true, request_size: ARB_DATA_SIZE }
    }

    /// Only SET primitives taking exactly one 4-byte scalar are arbitrated.
    #[inline]
    pub fn is_arbitrable(&self) -> bool {
        self.settable && self.request_size == ARB_DATA_SIZE
    }
}

/// The device-facing execution path.
pub trait ExecutionPipeline: Send + Sync {
    /// Execute a primitive without arbitration and return its response buffer.
    fn execute_unarbitrated(
        &self,
        participant: ParticipantId,
        key: EntryKey,
        request: &Payload,
    ) -> ArbResult<Payload>;
}

/// A participant as seen by arbitration.
pub trait Participant: Send + Sync {
    fn id(&self) -> ParticipantId;

    fn name(&self) -> &str;

    /// Selects the default arbitration table.
    fn class(&self) -> ParticipantClass;

    /// Catalog lookup for this participant; `None` when the primitive is not exposed.
    fn primitive_capability(&self, key: EntryKey) -> Option<PrimitiveCapability>;

    /// The field holding this participant's arbitration context.
    fn arbitration_slot(&self) -> &ArbitrationSlot;
}

/// Participant manager and primitive catalog of the host framework.
pub trait ParticipantDirectory: Send + Sync {
    /// Resolve an available participant by handle.
    fn participant(&self, id: ParticipantId) -> Option<Arc<dyn Participant>>;

    /// All currently available participants, in a stable order.
    fn participants(&self) -> Vec<Arc<dyn Participant>>;

    /// Resolve a catalog name (`"SET_RAPL_POWER_LIMIT"`) to its id.
    fn primitive_id(&self, name: &str) -> Option<PrimitiveId>;

    /// GET primitive reading back what the given SET primitive writes, if any.
    fn paired_get_primitive(&self, set_primitive: PrimitiveId) -> Option<PrimitiveId>;
}

/// Arbitration eligibility of one primitive on one participant.
pub fn is_primitive_supported(participant: &dyn Participant, key: EntryKey) -> bool {
    match participant.primitive_capability(key) {
        Some(cap) if cap.is_arbitrable() => true,
        Some(cap) => {
            tracing::debug!(
                participant = participant.name(),
                entry = %key,
                settable = cap.settable,
                request_size = cap.request_size,
                "primitive unsupported for arbitration"
            );
            false
        }
        None => {
            tracing::debug!(participant = participant.name(), entry = %key, "primitive not in catalog");
            false
        }
    }
}
