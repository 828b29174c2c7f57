use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::context::ArbContext;

#[derive(Default)]
struct SlotState {
    ctx: Option<Arc<ArbContext>>,
    /// Set by `destroy`; a closed slot never receives a new context.
    closed: bool,
}

/// Per-participant holder of the arbitration context.
///
/// The participant owns the slot; the slot owns the context. The context is installed at
/// most once and destroyed when the participant tears the slot down.
#[derive(Default)]
pub struct ArbitrationSlot {
    state: RwLock<SlotState>,
}

impl ArbitrationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Arc<ArbContext>> {
        self.state.read().ctx.clone()
    }

    pub fn is_arbitrated(&self) -> bool {
        self.state.read().ctx.is_some()
    }

    /// Install `ctx` unless a context is already present, and return the one that won.
    /// `None` once the slot has been destroyed.
    pub(crate) fn install(&self, ctx: Arc<ArbContext>) -> Option<Arc<ArbContext>> {
        let mut st = self.state.write();
        if st.closed {
            return None;
        }
        Some(st.ctx.get_or_insert(ctx).clone())
    }

    /// Participant teardown: destroy the context and every entry in it.
    ///
    /// Blocks until in-flight callers have released their entry references.
    pub fn destroy(&self) {
        let ctx = {
            let mut st = self.state.write();
            st.closed = true;
            st.ctx.take()
        };
        if let Some(ctx) = ctx {
            info!(participant = ctx.name(), "destroying arbitration context");
            ctx.destroy_entries();
        }
    }
}

impl Drop for ArbitrationSlot {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl std::fmt::Debug for ArbitrationSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state.read();
        f.debug_struct("ArbitrationSlot")
            .field("arbitrated", &st.ctx.is_some())
            .field("closed", &st.closed)
            .finish()
    }
}
