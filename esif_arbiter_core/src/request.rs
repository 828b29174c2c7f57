use crate::comparator::{ArbitrationType, Ranking};
use crate::ids::AppHandle;
use crate::payload::Payload;

/// One application's current request on one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArbRequest {
    pub app: AppHandle,
    pub payload: Payload,
    /// Identity of this submission. A re-submission gets a new serial even for the same value.
    serial: u64,
}

impl ArbRequest {
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

/// Requests held by an entry, kept in comparator order. The head is the arbitration winner.
///
/// Invariants:
/// - at most one request per `AppHandle`
/// - a request is placed in front of the first request it strictly beats; ties keep the
///   earlier request in front
/// - without a comparator, requests stay in arrival order
#[derive(Clone, Debug, Default)]
pub struct RequestList {
    requests: Vec<ArbRequest>,
    next_serial: u64,
}

impl RequestList {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn head(&self) -> Option<&ArbRequest> {
        self.requests.first()
    }

    #[inline]
    pub fn head_serial(&self) -> Option<u64> {
        self.head().map(|r| r.serial)
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ArbRequest> {
        self.requests.iter()
    }

    pub fn get(&self, app: AppHandle) -> Option<&ArbRequest> {
        self.requests.iter().find(|r| r.app == app)
    }

    /// Record `payload` for `app`, replacing any request `app` already holds.
    pub fn submit(&mut self, arb_type: Option<ArbitrationType>, app: AppHandle, payload: Payload) {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.remove_app(app);
        self.arbitrate(arb_type, ArbRequest { app, payload, serial });
    }

    /// Drop every request held by `app`. Returns how many were removed.
    pub fn remove_app(&mut self, app: AppHandle) -> usize {
        let before = self.requests.len();
        self.requests.retain(|r| r.app != app);
        before - self.requests.len()
    }

    /// Empty the list and re-insert every request, one at a time, in its current order.
    pub fn rearbitrate(&mut self, arb_type: Option<ArbitrationType>) {
        let held = std::mem::take(&mut self.requests);
        for req in held {
            self.arbitrate(arb_type, req);
        }
    }

    pub fn clear(&mut self) {
        self.requests.clear();
    }

    fn arbitrate(&mut self, arb_type: Option<ArbitrationType>, req: ArbRequest) {
        let pos = arb_type.and_then(|t| {
            self.requests
                .iter()
                .position(|cur| t.rank(&req.payload, &cur.payload) == Ranking::First)
        });
        match pos {
            Some(i) => self.requests.insert(i, req),
            None => self.requests.push(req),
        }
    }
}
