use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::comparator::ArbitrationType;
use crate::error::{ArbError, ArbResult};
use crate::ids::{AppHandle, EntryKey};
use crate::info::ArbEntryInfo;
use crate::limits::Limits;
use crate::payload::Payload;
use crate::request::{ArbRequest, RequestList};

/// Creation parameters of an entry (also the row shape of the default tables).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryParams {
    pub key: EntryKey,
    /// `None` keeps requests in arrival order until a comparator is installed.
    pub arb_type: Option<ArbitrationType>,
    pub limits: Limits,
}

/// Clamped winning value that must be re-applied to the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Corrective {
    pub payload: Payload,
    /// Unarbitrated reads of the paired GET primitive must wait for this job.
    pub requires_delay: bool,
}

/// Arbitration state of one (primitive, domain, instance) triple.
///
/// Every mutator reports the value to re-apply when, and only when, the identity of the
/// winning request changed (or the bounds changed while a winner exists).
#[derive(Clone, Debug)]
pub struct EntryState {
    key: EntryKey,
    arb_type: Option<ArbitrationType>,
    limits: Limits,
    enabled: bool,
    requests: RequestList,
}

impl EntryState {
    pub fn new(params: EntryParams) -> Self {
        Self {
            key: params.key,
            arb_type: params.arb_type,
            limits: params.limits,
            enabled: true,
            requests: RequestList::new(),
        }
    }

    pub fn key(&self) -> EntryKey {
        self.key
    }

    pub fn arb_type(&self) -> Option<ArbitrationType> {
        self.arb_type
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn requests(&self) -> &RequestList {
        &self.requests
    }

    pub fn winner(&self) -> Option<&ArbRequest> {
        self.requests.head()
    }

    /// The winning value after clamping, as it would be applied now.
    pub fn arbitrated_value(&self) -> Option<Payload> {
        self.winner().map(|w| self.limits.clamp_payload(&w.payload))
    }

    /// Insert or replace `app`'s request.
    pub fn submit(&mut self, app: AppHandle, payload: Payload) -> ArbResult<Option<Corrective>> {
        if !self.enabled {
            return Err(ArbError::NotSupported);
        }
        if payload.is_empty() {
            return Err(ArbError::ParameterNull);
        }
        let prev = self.requests.head_serial();
        self.requests.submit(self.arb_type, app, payload);
        debug!(entry = %self.key, %app, held = self.requests.len(), "inserted arbitration request");
        Ok(self.corrective_if_changed(prev, true))
    }

    /// Update one or both bounds. An inverted pair is rejected and nothing changes.
    pub fn set_limits(&mut self, upper: Option<u32>, lower: Option<u32>) -> ArbResult<Option<Corrective>> {
        let changed = self.limits.update(upper, lower)?;
        debug!(
            entry = %self.key,
            upper = self.limits.upper,
            lower = self.limits.lower,
            changed,
            "set limits"
        );
        if !changed {
            return Ok(None);
        }
        Ok(self.winner().map(|w| Corrective {
            payload: self.limits.clamp_payload(&w.payload),
            requires_delay: false,
        }))
    }

    /// Swap the comparator and re-rank every held request.
    pub fn set_arbitration_type(&mut self, arb_type: ArbitrationType) -> Option<Corrective> {
        let prev = self.requests.head_serial();
        self.arb_type = Some(arb_type);
        self.requests.rearbitrate(self.arb_type);
        debug!(entry = %self.key, %arb_type, "changed arbitration function");
        self.corrective_if_changed(prev, false)
    }

    pub fn remove_app(&mut self, app: AppHandle) -> Option<Corrective> {
        let prev = self.requests.head_serial();
        if self.requests.remove_app(app) > 0 {
            debug!(entry = %self.key, %app, "removed arbitration request");
        }
        self.corrective_if_changed(prev, false)
    }

    /// Disabling drops every held request without re-applying anything.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.purge();
        }
        debug!(entry = %self.key, enabled, "set arbitration state");
    }

    pub fn purge(&mut self) {
        if !self.requests.is_empty() {
            debug!(entry = %self.key, dropped = self.requests.len(), "purging arbitration requests");
        }
        self.requests.clear();
    }

    pub fn info(&self) -> ArbEntryInfo {
        ArbEntryInfo {
            key: self.key,
            enabled: self.enabled,
            arb_type: self.arb_type,
            limits: self.limits,
            request_count: self.requests.len(),
            arbitrated_value: self.winner().and_then(|w| w.payload.as_u32()),
        }
    }

    fn corrective_if_changed(&self, prev: Option<u64>, requires_delay: bool) -> Option<Corrective> {
        let head = self.winner()?;
        if Some(head.serial()) == prev {
            return None;
        }
        debug!(entry = %self.key, winner = %head.app, "arbitrated value changed");
        Some(Corrective {
            payload: self.limits.clamp_payload(&head.payload),
            requires_delay,
        })
    }
}
