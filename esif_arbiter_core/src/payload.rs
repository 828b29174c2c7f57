use serde::{Deserialize, Serialize};

/// Size of the only payload shape that is arbitrated: one little-endian `u32`.
pub const ARB_DATA_SIZE: usize = std::mem::size_of::<u32>();

/// Owned copy of a primitive request/response buffer.
///
/// Arbitration clones the caller's buffer on submission, so later changes by the caller never
/// leak into the held request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    bytes: Vec<u8>,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_u32(value: u32) -> Self {
        Self { bytes: value.to_le_bytes().to_vec() }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The leading `u32`, or `None` when the buffer is too short to hold one.
    #[inline]
    pub fn as_u32(&self) -> Option<u32> {
        let head: [u8; ARB_DATA_SIZE] = self.bytes.get(..ARB_DATA_SIZE)?.try_into().ok()?;
        Some(u32::from_le_bytes(head))
    }

    /// Clone with the leading `u32` replaced. Trailing bytes are kept.
    /// Returns `None` for buffers that hold no `u32`.
    pub fn with_u32(&self, value: u32) -> Option<Payload> {
        self.as_u32()?;
        let mut bytes = self.bytes.clone();
        bytes[..ARB_DATA_SIZE].copy_from_slice(&value.to_le_bytes());
        Some(Payload { bytes })
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self { bytes: bytes.to_vec() }
    }
}
