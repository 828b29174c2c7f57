#![allow(clippy::missing_safety_doc)]

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use esif_arbiter_core::{
    AppHandle, ArbError, ArbInfo, ArbResult, ArbiterCfg, ArbitrationType, Domain, EntryKey, Instance,
    ParticipantClass, ParticipantId, Payload, PrimitiveId,
};
use esif_arbiter_manager::{
    ArbitrationManager, ArbitrationSlot, ExecutionPipeline, Participant, ParticipantDirectory,
    PrimitiveCapability, PrimitiveOutcome, Target,
};

/// FFI ABI version for esif_arbiter_ffi.
///
/// Bump this when any `#[repr(C)]` struct layout or exported function signature changes.
pub const ESIF_ARBITER_FFI_VERSION: u32 = 1;

#[no_mangle]
pub extern "C" fn esif_arbiter_ffi_version() -> u32 {
    ESIF_ARBITER_FFI_VERSION
}

// Information blob identification.
const INFO_MAGIC: u32 = 0x4942_5241; // "ARBI" little-endian
const INFO_VERSION: u32 = 1;

/// Participant handle addressing every participant.
pub const ESIF_ARB_ALL_PARTICIPANTS: u64 = u64::MAX;

/// Initial scratch size for responses of directly executed primitives.
const RESPONSE_CAP: usize = 256;

/// Buffer growths attempted when the host reports a larger response.
const RESPONSE_RETRIES: usize = 3;

// Return codes.
pub const ESIF_ARB_OK: i32 = 0;
/// The request was taken by arbitration; no response data.
pub const ESIF_ARB_QUEUED: i32 = 1;
pub const ESIF_ARB_E_PARAMETER_NULL: i32 = -1;
pub const ESIF_ARB_E_NOT_FOUND: i32 = -2;
pub const ESIF_ARB_E_PARTICIPANT_NOT_FOUND: i32 = -3;
pub const ESIF_ARB_E_NOT_SUPPORTED: i32 = -4;
pub const ESIF_ARB_E_OUT_OF_BOUNDS: i32 = -5;
pub const ESIF_ARB_E_NO_MEMORY: i32 = -6;
pub const ESIF_ARB_E_UNSPECIFIED: i32 = -7;
pub const ESIF_ARB_E_MARKED_FOR_DELETE: i32 = -8;
pub const ESIF_ARB_E_SHUTTING_DOWN: i32 = -9;
pub const ESIF_ARB_E_EXECUTION: i32 = -10;
pub const ESIF_ARB_E_NEED_LARGER_BUFFER: i32 = -11;
pub const ESIF_ARB_E_ALREADY_REGISTERED: i32 = -12;

fn rc_of(e: &ArbError) -> i32 {
    match e {
        ArbError::ParameterNull => ESIF_ARB_E_PARAMETER_NULL,
        ArbError::NotFound => ESIF_ARB_E_NOT_FOUND,
        ArbError::ParticipantNotFound => ESIF_ARB_E_PARTICIPANT_NOT_FOUND,
        ArbError::NotSupported => ESIF_ARB_E_NOT_SUPPORTED,
        ArbError::OutOfBounds => ESIF_ARB_E_OUT_OF_BOUNDS,
        ArbError::NoMemory => ESIF_ARB_E_NO_MEMORY,
        ArbError::Unspecified => ESIF_ARB_E_UNSPECIFIED,
        ArbError::MarkedForDelete => ESIF_ARB_E_MARKED_FOR_DELETE,
        ArbError::ShuttingDown => ESIF_ARB_E_SHUTTING_DOWN,
        ArbError::Execution(_) => ESIF_ARB_E_EXECUTION,
    }
}

fn rc(r: ArbResult<()>) -> i32 {
    match r {
        Ok(()) => ESIF_ARB_OK,
        Err(e) => rc_of(&e),
    }
}

/// FFI string view (UTF-8 bytes).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EsifStr {
    pub ptr: *const u8,
    pub len: usize,
}

impl EsifStr {
    fn as_str(&self) -> Option<&str> {
        if self.ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(self.ptr, self.len) };
        std::str::from_utf8(bytes).ok()
    }
}

/// Owned byte buffer (for the information blob).
#[repr(C)]
pub struct EsifBytes {
    pub ptr: *mut u8,
    pub len: usize,
}

/// Manager cfg for FFI (keep it minimal).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EsifArbCfg {
    pub arbitration_enabled: u8,
    pub populate_defaults: u8,
    pub entry_growth: u32,
}

#[no_mangle]
pub extern "C" fn esif_arbiter_cfg_default() -> EsifArbCfg {
    let d = ArbiterCfg::default();
    EsifArbCfg {
        arbitration_enabled: d.arbitration_enabled as u8,
        populate_defaults: d.populate_defaults as u8,
        entry_growth: d.entry_growth as u32,
    }
}

fn cfg_from_ffi(c: EsifArbCfg) -> ArbiterCfg {
    ArbiterCfg {
        arbitration_enabled: c.arbitration_enabled != 0,
        populate_defaults: c.populate_defaults != 0,
        entry_growth: c.entry_growth as usize,
        ..ArbiterCfg::default()
    }
}

/// Direct primitive execution. Returns 0 on success.
///
/// `response_len` receives the full response length. When it exceeds `response_cap`, only the
/// first `response_cap` bytes are written and the call is repeated with a buffer of the
/// reported size (the return status of the short call is ignored).
pub type EsifExecuteFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
    request: *const u8,
    request_len: usize,
    response: *mut u8,
    response_cap: usize,
    response_len: *mut usize,
) -> i32;

/// Catalog name lookup. Returns 0 when the name is unknown.
pub type EsifPrimitiveIdFn = unsafe extern "C" fn(ctx: *mut c_void, name: *const u8, name_len: usize) -> u32;

/// GET primitive paired with a SET primitive, 0 when none.
pub type EsifPairedGetFn = unsafe extern "C" fn(ctx: *mut c_void, set_primitive: u32) -> u32;

/// Capability lookup. Returns nonzero and fills the outputs when the participant exposes
/// the primitive.
pub type EsifCapabilityFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
    settable: *mut u8,
    request_size: *mut u32,
) -> i32;

/// Host callbacks. `execute` is required; the others may be null.
///
/// Callbacks are invoked from caller threads and from the queue worker thread, so they must
/// be thread-safe, and `ctx` must stay valid until the manager is freed.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct EsifArbHost {
    pub ctx: *mut c_void,
    pub execute: Option<EsifExecuteFn>,
    pub primitive_id: Option<EsifPrimitiveIdFn>,
    pub paired_get: Option<EsifPairedGetFn>,
    pub capability: Option<EsifCapabilityFn>,
}

struct Host {
    vtable: EsifArbHost,
    execute: EsifExecuteFn,
}

// The host contract requires thread-safe callbacks and a context that outlives the manager.
unsafe impl Send for Host {}
unsafe impl Sync for Host {}

impl ExecutionPipeline for Host {
    fn execute_unarbitrated(&self, participant: ParticipantId, key: EntryKey, request: &Payload) -> ArbResult<Payload> {
        let req = request.as_bytes();
        let mut response = vec![0u8; RESPONSE_CAP];

        for _ in 0..=RESPONSE_RETRIES {
            let mut len = 0usize;
            let status = unsafe {
                (self.execute)(
                    self.vtable.ctx,
                    participant.0,
                    key.primitive.0,
                    key.domain.0,
                    key.instance.0,
                    if req.is_empty() { ptr::null() } else { req.as_ptr() },
                    req.len(),
                    response.as_mut_ptr(),
                    response.len(),
                    &mut len,
                )
            };
            if len > response.len() {
                debug!(participant = %participant, entry = %key, needed = len, "growing response buffer");
                response = vec![0u8; len];
                continue;
            }
            if status != 0 {
                return Err(ArbError::Execution(format!("host status {status}")));
            }
            response.truncate(len);
            return Ok(Payload::new(response));
        }

        warn!(participant = %participant, entry = %key, "host response size kept growing");
        Err(ArbError::Execution("response does not fit".to_string()))
    }
}

impl Host {
    fn capability(&self, participant: ParticipantId, key: EntryKey) -> Option<PrimitiveCapability> {
        let f = self.vtable.capability?;
        let mut settable = 0u8;
        let mut size = 0u32;
        let found = unsafe {
            f(
                self.vtable.ctx,
                participant.0,
                key.primitive.0,
                key.domain.0,
                key.instance.0,
                &mut settable,
                &mut size,
            )
        };
        (found != 0).then(|| PrimitiveCapability { settable: settable != 0, request_size: size as usize })
    }
}

struct FfiParticipant {
    id: ParticipantId,
    name: String,
    class: ParticipantClass,
    host: Arc<Host>,
    slot: ArbitrationSlot,
}

impl Participant for FfiParticipant {
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
        self.host.capability(self.id, key)
    }

    fn arbitration_slot(&self) -> &ArbitrationSlot {
        &self.slot
    }
}

struct Registry {
    host: Arc<Host>,
    participants: RwLock<Vec<Arc<FfiParticipant>>>,
}

impl ParticipantDirectory for Registry {
    fn participant(&self, id: ParticipantId) -> Option<Arc<dyn Participant>> {
        self.participants
            .read()
            .iter()
            .find(|p| p.id == id)
            .map(|p| Arc::clone(p) as Arc<dyn Participant>)
    }

    fn participants(&self) -> Vec<Arc<dyn Participant>> {
        self.participants.read().iter().map(|p| Arc::clone(p) as Arc<dyn Participant>).collect()
    }

    fn primitive_id(&self, name: &str) -> Option<PrimitiveId> {
        let f = self.host.vtable.primitive_id?;
        let id = unsafe { f(self.host.vtable.ctx, name.as_ptr(), name.len()) };
        (id != 0).then_some(PrimitiveId(id))
    }

    fn paired_get_primitive(&self, set_primitive: PrimitiveId) -> Option<PrimitiveId> {
        let f = self.host.vtable.paired_get?;
        let id = unsafe { f(self.host.vtable.ctx, set_primitive.0) };
        (id != 0).then_some(PrimitiveId(id))
    }
}

/// Opaque handle exposed over FFI.
#[repr(C)]
pub struct EsifArbiterManager {
    inner: ArbitrationManager,
    registry: Arc<Registry>,
}

/// Participant classes as passed over FFI.
pub const ESIF_ARB_CLASS_OTHER: u32 = 0;
pub const ESIF_ARB_CLASS_CPU: u32 = 1;
pub const ESIF_ARB_CLASS_WIRELESS: u32 = 2;
pub const ESIF_ARB_CLASS_FAN: u32 = 3;
pub const ESIF_ARB_CLASS_PRIMARY: u32 = 4;

fn class_from_ffi(c: u32) -> ParticipantClass {
    match c {
        ESIF_ARB_CLASS_CPU => ParticipantClass::Cpu,
        ESIF_ARB_CLASS_WIRELESS => ParticipantClass::Wireless,
        ESIF_ARB_CLASS_FAN => ParticipantClass::Fan,
        ESIF_ARB_CLASS_PRIMARY => ParticipantClass::Primary,
        _ => ParticipantClass::Other,
    }
}

fn entry_key(primitive: u32, domain: u16, instance: u8) -> EntryKey {
    EntryKey::new(PrimitiveId(primitive), Domain(domain), Instance(instance))
}

/// Create a manager and start its queue worker.
///
/// Returns null when `host.execute` is missing or the worker cannot be started.
#[no_mangle]
pub extern "C" fn esif_arbiter_manager_new(cfg: EsifArbCfg, host: EsifArbHost) -> *mut EsifArbiterManager {
    let Some(execute) = host.execute else {
        warn!("host vtable without execute callback");
        return ptr::null_mut();
    };
    let host = Arc::new(Host { vtable: host, execute });
    let registry = Arc::new(Registry { host: Arc::clone(&host), participants: RwLock::new(Vec::new()) });

    let inner = match ArbitrationManager::new(
        cfg_from_ffi(cfg),
        Arc::clone(&registry) as Arc<dyn ParticipantDirectory>,
        host as Arc<dyn ExecutionPipeline>,
    ) {
        Ok(m) => m,
        Err(_) => return ptr::null_mut(),
    };
    Box::into_raw(Box::new(EsifArbiterManager { inner, registry }))
}

/// Stop the worker and free the manager. Contexts of registered participants are destroyed.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_manager_free(h: *mut EsifArbiterManager) {
    if !h.is_null() {
        let handle = Box::from_raw(h);
        handle.inner.stop();
        let all = std::mem::take(&mut *handle.registry.participants.write());
        for p in all {
            p.slot.destroy();
        }
        drop(handle);
    }
}

/// Make a participant addressable. `class` is one of the `ESIF_ARB_CLASS_*` values.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_participant_register(
    h: *mut EsifArbiterManager,
    participant: u64,
    name: EsifStr,
    class: u32,
) -> i32 {
    if h.is_null() || participant == ESIF_ARB_ALL_PARTICIPANTS {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    let Some(name) = name.as_str() else {
        return ESIF_ARB_E_PARAMETER_NULL;
    };

    let mut all = handle.registry.participants.write();
    if all.iter().any(|p| p.id.0 == participant) {
        return ESIF_ARB_E_ALREADY_REGISTERED;
    }
    all.push(Arc::new(FfiParticipant {
        id: ParticipantId(participant),
        name: name.to_string(),
        class: class_from_ffi(class),
        host: Arc::clone(&handle.registry.host),
        slot: ArbitrationSlot::new(),
    }));
    ESIF_ARB_OK
}

/// Remove a participant and destroy its arbitration context.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_participant_unregister(h: *mut EsifArbiterManager, participant: u64) -> i32 {
    if h.is_null() {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    let removed = {
        let mut all = handle.registry.participants.write();
        match all.iter().position(|p| p.id.0 == participant) {
            Some(pos) => all.remove(pos),
            None => return ESIF_ARB_E_PARTICIPANT_NOT_FOUND,
        }
    };
    removed.slot.destroy();
    ESIF_ARB_OK
}

/// Submit a primitive. Returns `ESIF_ARB_QUEUED` when arbitration took the request, otherwise
/// the primitive was executed and its response copied to `response`.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_execute_primitive(
    h: *mut EsifArbiterManager,
    app: u64,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
    request: *const u8,
    request_len: usize,
    response: *mut u8,
    response_cap: usize,
    response_len: *mut usize,
) -> i32 {
    if h.is_null() || (request.is_null() && request_len > 0) {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    let payload = if request.is_null() {
        Payload::empty()
    } else {
        Payload::from(std::slice::from_raw_parts(request, request_len))
    };

    let outcome = handle.inner.execute_primitive(
        AppHandle(app),
        ParticipantId(participant),
        entry_key(primitive, domain, instance),
        payload,
    );
    match outcome {
        Ok(PrimitiveOutcome::Queued) => {
            if !response_len.is_null() {
                *response_len = 0;
            }
            ESIF_ARB_QUEUED
        }
        Ok(PrimitiveOutcome::Executed(data)) => {
            if !response_len.is_null() {
                *response_len = data.len();
            }
            if data.len() > response_cap || (response.is_null() && !data.is_empty()) {
                return ESIF_ARB_E_NEED_LARGER_BUFFER;
            }
            if !data.is_empty() {
                ptr::copy_nonoverlapping(data.as_bytes().as_ptr(), response, data.len());
            }
            ESIF_ARB_OK
        }
        Err(e) => rc_of(&e),
    }
}

fn target(participant: u64, primitive: u32, domain: u16, instance: u8) -> Target {
    if participant == ESIF_ARB_ALL_PARTICIPANTS {
        Target::Global
    } else if primitive == 0 {
        Target::Participant(ParticipantId(participant))
    } else {
        Target::Entry(ParticipantId(participant), entry_key(primitive, domain, instance))
    }
}

/// `participant == ESIF_ARB_ALL_PARTICIPANTS` addresses every participant; `primitive == 0`
/// addresses every entry of the participant.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_set_state(
    h: *mut EsifArbiterManager,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
    enabled: u8,
) -> i32 {
    if h.is_null() {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    rc(handle.inner.set_arbitration_state(target(participant, primitive, domain, instance), enabled != 0))
}

#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_stop(
    h: *mut EsifArbiterManager,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
) -> i32 {
    if h.is_null() {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    rc(handle.inner.stop_arbitration(ParticipantId(participant), entry_key(primitive, domain, instance)))
}

/// Null bounds keep their current value.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_set_limits(
    h: *mut EsifArbiterManager,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
    upper: *const u32,
    lower: *const u32,
) -> i32 {
    if h.is_null() {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    let upper = if upper.is_null() { None } else { Some(*upper) };
    let lower = if lower.is_null() { None } else { Some(*lower) };
    rc(handle.inner.set_limits(ParticipantId(participant), entry_key(primitive, domain, instance), upper, lower))
}

/// `arb_type` is the raw comparator id (1 = greater-than, 2 = less-than).
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_set_function(
    h: *mut EsifArbiterManager,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
    arb_type: u32,
) -> i32 {
    if h.is_null() {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    let arb_type = match ArbitrationType::try_from(arb_type) {
        Ok(t) => t,
        Err(e) => {
            warn!(arb_type, "rejected unknown arbitration type");
            return rc_of(&e);
        }
    };
    rc(handle.inner.set_arbitration_function(ParticipantId(participant), entry_key(primitive, domain, instance), arb_type))
}

#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_remove_app(h: *mut EsifArbiterManager, app: u64) -> i32 {
    if h.is_null() {
        return ESIF_ARB_E_PARAMETER_NULL;
    }
    let handle = &*h;
    handle.inner.remove_app(AppHandle(app));
    ESIF_ARB_OK
}

/// Domain code of a two-character qualifier ("D0"), 0 when invalid.
#[no_mangle]
pub extern "C" fn esif_arbiter_domain_from_str(qualifier: EsifStr) -> u16 {
    qualifier.as_str().and_then(Domain::from_qualifier).map_or(0, |d| d.0)
}

/// Information format (binary, little-endian):
/// [u32 magic = "ARBI"][u32 version = 1][u32 enabled][u32 count][u32 arbitrated_count]
/// repeated count times:
///   [u64 participant][u32 name_len][name bytes][u32 is_arbitrated][u32 enabled][u32 entries]
///   repeated entries times:
///     [u32 primitive][u16 domain][u8 instance][u8 enabled][u32 arb_type, 0 = none]
///     [u32 upper][u32 lower][u32 request_count][u32 has_value][u32 value]
fn encode_info(info: &ArbInfo) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    let put = |buf: &mut Vec<u8>, v: u32| buf.extend_from_slice(&v.to_le_bytes());

    put(&mut buf, INFO_MAGIC);
    put(&mut buf, INFO_VERSION);
    put(&mut buf, info.enabled as u32);
    put(&mut buf, info.count() as u32);
    put(&mut buf, info.arbitrated_count() as u32);

    for p in &info.participants {
        buf.extend_from_slice(&p.participant_id.0.to_le_bytes());
        put(&mut buf, p.participant_name.len() as u32);
        buf.extend_from_slice(p.participant_name.as_bytes());
        put(&mut buf, p.is_arbitrated as u32);
        put(&mut buf, p.enabled as u32);
        put(&mut buf, p.entries.len() as u32);

        for e in &p.entries {
            put(&mut buf, e.key.primitive.0);
            buf.extend_from_slice(&e.key.domain.0.to_le_bytes());
            buf.push(e.key.instance.0);
            buf.push(e.enabled as u8);
            put(&mut buf, e.arb_type.map_or(0, |t| t.id()));
            put(&mut buf, e.limits.upper);
            put(&mut buf, e.limits.lower);
            put(&mut buf, e.request_count as u32);
            put(&mut buf, e.arbitrated_value.is_some() as u32);
            put(&mut buf, e.arbitrated_value.unwrap_or(0));
        }
    }
    buf
}

/// Arbitration information as an owned blob (must be freed with `esif_arbiter_bytes_free`).
///
/// `participant == ESIF_ARB_ALL_PARTICIPANTS` selects every participant; `primitive == 0`
/// selects every entry.
#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_info(
    h: *mut EsifArbiterManager,
    participant: u64,
    primitive: u32,
    domain: u16,
    instance: u8,
) -> EsifBytes {
    if h.is_null() {
        return EsifBytes { ptr: ptr::null_mut(), len: 0 };
    }
    let handle = &*h;
    let participant = (participant != ESIF_ARB_ALL_PARTICIPANTS).then_some(ParticipantId(participant));
    let key = (primitive != 0).then(|| entry_key(primitive, domain, instance));
    let info = handle.inner.get_information(participant, key);

    let mut boxed = encode_info(&info).into_boxed_slice();
    let ptr = boxed.as_mut_ptr();
    let len = boxed.len();
    std::mem::forget(boxed);

    EsifBytes { ptr, len }
}

#[no_mangle]
pub unsafe extern "C" fn esif_arbiter_bytes_free(b: EsifBytes) {
    if !b.ptr.is_null() {
        let slice_ptr = std::ptr::slice_from_raw_parts_mut(b.ptr, b.len);
        drop(Box::from_raw(slice_ptr));
    }
}
