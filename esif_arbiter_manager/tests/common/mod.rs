//! In-memory host for manager tests: a participant directory, a primitive catalog and a
//! recording device pipeline that can be paused.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use esif_arbiter_core::*;
use esif_arbiter_manager::*;

pub const SET_RAPL_POWER_LIMIT: PrimitiveId = PrimitiveId(36);
pub const GET_RAPL_POWER_LIMIT: PrimitiveId = PrimitiveId(35);
pub const SET_TCC_OFFSET: PrimitiveId = PrimitiveId(50);
pub const SET_FAN_LEVEL: PrimitiveId = PrimitiveId(100);
pub const GET_FAN_LEVEL: PrimitiveId = PrimitiveId(99);
/// Settable, 4-byte, but in no default table.
pub const SET_DISPLAY_BRIGHTNESS: PrimitiveId = PrimitiveId(120);
/// Settable with an 8-byte request: never arbitrated.
pub const SET_WIDE_CONTROL: PrimitiveId = PrimitiveId(130);

pub const APP_A: AppHandle = AppHandle(0xA);
pub const APP_B: AppHandle = AppHandle(0xB);
pub const APP_C: AppHandle = AppHandle(0xC);

pub fn key(primitive: PrimitiveId, instance: u8) -> EntryKey {
    EntryKey::new(primitive, Domain::D0, Instance(instance))
}

pub fn pl(instance: u8) -> EntryKey {
    key(SET_RAPL_POWER_LIMIT, instance)
}

pub fn u32_payload(v: u32) -> Payload {
    Payload::from_u32(v)
}

pub struct FakeParticipant {
    id: ParticipantId,
    name: String,
    class: ParticipantClass,
    caps: HashMap<PrimitiveId, PrimitiveCapability>,
    slot: ArbitrationSlot,
}

impl FakeParticipant {
    pub fn new(id: u64, name: &str, class: ParticipantClass) -> Self {
        let mut caps = HashMap::new();
        for p in [SET_RAPL_POWER_LIMIT, SET_TCC_OFFSET, SET_FAN_LEVEL, SET_DISPLAY_BRIGHTNESS] {
            caps.insert(p, PrimitiveCapability::set_u32());
        }
        caps.insert(GET_RAPL_POWER_LIMIT, PrimitiveCapability { settable: false, request_size: 0 });
        caps.insert(GET_FAN_LEVEL, PrimitiveCapability { settable: false, request_size: 0 });
        caps.insert(SET_WIDE_CONTROL, PrimitiveCapability { settable: true, request_size: 8 });
        Self { id: ParticipantId(id), name: name.to_string(), class, caps, slot: ArbitrationSlot::new() }
    }

    pub fn without(mut self, primitive: PrimitiveId) -> Self {
        self.caps.remove(&primitive);
        self
    }

    pub fn slot(&self) -> &ArbitrationSlot {
        &self.slot
    }
}

impl Participant for FakeParticipant {
    fn id(&self) -> ParticipantId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn class(&self) -> ParticipantClass {
        self.class
    }

    fn primitive_capability(&self, key: EntryKey) -> Option<PrimitiveCapability> {
        self.caps.get(&key.primitive).copied()
    }

    fn arbitration_slot(&self) -> &ArbitrationSlot {
        &self.slot
    }
}

pub struct FakeDirectory {
    participants: Mutex<Vec<Arc<FakeParticipant>>>,
    names: HashMap<&'static str, PrimitiveId>,
}

impl FakeDirectory {
    pub fn new() -> Self {
        let names = HashMap::from([
            ("SET_RAPL_POWER_LIMIT", SET_RAPL_POWER_LIMIT),
            ("SET_TCC_OFFSET", SET_TCC_OFFSET),
            ("SET_FAN_LEVEL", SET_FAN_LEVEL),
        ]);
        Self { participants: Mutex::new(Vec::new()), names }
    }

    pub fn register(&self, p: FakeParticipant) -> Arc<FakeParticipant> {
        let p = Arc::new(p);
        self.participants.lock().push(Arc::clone(&p));
        p
    }

    pub fn unregister(&self, id: ParticipantId) -> Option<Arc<FakeParticipant>> {
        let mut all = self.participants.lock();
        let pos = all.iter().position(|p| p.id == id)?;
        Some(all.remove(pos))
    }
}

impl ParticipantDirectory for FakeDirectory {
    fn participant(&self, id: ParticipantId) -> Option<Arc<dyn Participant>> {
        self.participants
            .lock()
            .iter()
            .find(|p| p.id == id)
            .map(|p| Arc::clone(p) as Arc<dyn Participant>)
    }

    fn participants(&self) -> Vec<Arc<dyn Participant>> {
        self.participants.lock().iter().map(|p| Arc::clone(p) as Arc<dyn Participant>).collect()
    }

    fn primitive_id(&self, name: &str) -> Option<PrimitiveId> {
        self.names.get(name).copied()
    }

    fn paired_get_primitive(&self, set_primitive: PrimitiveId) -> Option<PrimitiveId> {
        match set_primitive {
            SET_RAPL_POWER_LIMIT => Some(GET_RAPL_POWER_LIMIT),
            SET_FAN_LEVEL => Some(GET_FAN_LEVEL),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub participant: ParticipantId,
    pub key: EntryKey,
    pub value: Option<u32>,
}

#[derive(Default)]
struct GateState {
    closed: bool,
    blocked: usize,
}

/// Device double: SETs store their value, paired GETs read it back.
#[derive(Default)]
pub struct RecordingPipeline {
    calls: Mutex<Vec<Call>>,
    device: Mutex<HashMap<(ParticipantId, PrimitiveId, Instance), u32>>,
    gate: Mutex<GateState>,
    gate_cv: Condvar,
}

impl RecordingPipeline {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Values written to one entry, in order.
    pub fn writes(&self, participant: ParticipantId, key: EntryKey) -> Vec<u32> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.participant == participant && c.key == key)
            .filter_map(|c| c.value)
            .collect()
    }

    pub fn device_value(&self, participant: ParticipantId, key: EntryKey) -> Option<u32> {
        self.device.lock().get(&(participant, key.primitive, key.instance)).copied()
    }

    /// Make SET executions block until `open`.
    pub fn close(&self) {
        self.gate.lock().closed = true;
    }

    pub fn open(&self) {
        self.gate.lock().closed = false;
        self.gate_cv.notify_all();
    }

    /// Wait until a SET is parked at the closed gate.
    pub fn wait_blocked(&self) {
        let mut g = self.gate.lock();
        while g.blocked == 0 {
            if self.gate_cv.wait_for(&mut g, Duration::from_secs(5)).timed_out() {
                panic!("no SET reached the gate");
            }
        }
    }

    fn setter_of(get: PrimitiveId) -> Option<PrimitiveId> {
        match get {
            GET_RAPL_POWER_LIMIT => Some(SET_RAPL_POWER_LIMIT),
            GET_FAN_LEVEL => Some(SET_FAN_LEVEL),
            _ => None,
        }
    }
}

impl ExecutionPipeline for RecordingPipeline {
    fn execute_unarbitrated(&self, participant: ParticipantId, key: EntryKey, request: &Payload) -> ArbResult<Payload> {
        if let Some(set) = Self::setter_of(key.primitive) {
            let v = self.device.lock().get(&(participant, set, key.instance)).copied().unwrap_or(0);
            self.calls.lock().push(Call { participant, key, value: None });
            return Ok(Payload::from_u32(v));
        }

        {
            let mut g = self.gate.lock();
            if g.closed {
                g.blocked += 1;
                self.gate_cv.notify_all();
                while g.closed {
                    self.gate_cv.wait(&mut g);
                }
                g.blocked -= 1;
            }
        }

        let value = request.as_u32();
        if let Some(v) = value {
            self.device.lock().insert((participant, key.primitive, key.instance), v);
        }
        self.calls.lock().push(Call { participant, key, value });
        Ok(request.clone())
    }
}

pub struct Harness {
    pub directory: Arc<FakeDirectory>,
    pub pipeline: Arc<RecordingPipeline>,
    pub manager: Arc<ArbitrationManager>,
}

impl Harness {
    pub fn new(cfg: ArbiterCfg) -> Self {
        let directory = Arc::new(FakeDirectory::new());
        let pipeline = RecordingPipeline::new();
        let manager = ArbitrationManager::new(
            cfg,
            Arc::clone(&directory) as Arc<dyn ParticipantDirectory>,
            Arc::clone(&pipeline) as Arc<dyn ExecutionPipeline>,
        )
        .unwrap();
        Self { directory, pipeline, manager: Arc::new(manager) }
    }

    /// One CPU participant (id 1) seeded from the default tables.
    pub fn with_cpu() -> (Self, Arc<FakeParticipant>) {
        let h = Self::new(ArbiterCfg::default());
        let cpu = h.directory.register(FakeParticipant::new(1, "TCPU", ParticipantClass::Cpu));
        (h, cpu)
    }

    pub fn submit(&self, app: AppHandle, participant: &FakeParticipant, key: EntryKey, v: u32) -> PrimitiveOutcome {
        self.manager.execute_primitive(app, participant.id(), key, u32_payload(v)).unwrap()
    }
}
