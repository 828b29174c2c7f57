use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque handle of a participant instance (CPU, fan, wireless card, ...).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ParticipantId(pub u64);

/// Opaque handle of the application submitting a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppHandle(pub u64);

/// Primitive identifier as assigned by the primitive catalog. `0` is never a real primitive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PrimitiveId(pub u32);

/// Domain qualifier within a participant, in the two-character wire encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Domain(pub u16);

/// Primitive instance. `255` addresses "any instance" in catalog rows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Instance(pub u8);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for AppHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Domain {
    /// Domain "D0".
    pub const D0: Domain = Domain(u16::from_le_bytes([b'D', b'0']));
    /// Domain "D1".
    pub const D1: Domain = Domain(u16::from_le_bytes([b'D', b'1']));
    /// Domain "D2".
    pub const D2: Domain = Domain(u16::from_le_bytes([b'D', b'2']));

    /// Parse a two-character qualifier ("D0", "d1", ...). The first character is upper-cased;
    /// the second is taken verbatim. Returns `None` for anything shorter than two bytes.
    pub fn from_qualifier(qualifier: &str) -> Option<Domain> {
        let b = qualifier.as_bytes();
        if b.len() < 2 {
            return None;
        }
        Some(Domain(u16::from_le_bytes([b[0].to_ascii_uppercase(), b[1]])))
    }

    /// Two-character form, with non-printable bytes rendered as `?`.
    pub fn qualifier(&self) -> String {
        self.0
            .to_le_bytes()
            .iter()
            .map(|&c| if c.is_ascii_graphic() { c as char } else { '?' })
            .collect()
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualifier())
    }
}

/// Identity of one arbitration entry inside a participant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryKey {
    pub primitive: PrimitiveId,
    pub domain: Domain,
    pub instance: Instance,
}

impl EntryKey {
    pub fn new(primitive: PrimitiveId, domain: Domain, instance: Instance) -> Self {
        Self { primitive, domain, instance }
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prim = {}, Dom = {}, Inst = {}", self.primitive, self.domain, self.instance)
    }
}
