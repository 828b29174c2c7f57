use serde::{Deserialize, Serialize};

use crate::error::{ArbError, ArbResult};
use crate::payload::Payload;

pub const LIMIT_MIN: u32 = 0;
pub const LIMIT_MAX: u32 = u32::MAX;
/// Percent-valued primitives use hundredths of a percent.
pub const LIMIT_MAX_PERCENT: u32 = 10_000;
pub const LIMIT_MIN_PERCENT: u32 = 0;

/// Inclusive `[lower, upper]` band the arbitrated value is clamped into before it is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub upper: u32,
    pub lower: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self { upper: LIMIT_MAX, lower: LIMIT_MIN }
    }
}

impl Limits {
    pub fn new(upper: u32, lower: u32) -> ArbResult<Self> {
        if upper < lower {
            return Err(ArbError::OutOfBounds);
        }
        Ok(Self { upper, lower })
    }

    pub fn percent() -> Self {
        Self { upper: LIMIT_MAX_PERCENT, lower: LIMIT_MIN_PERCENT }
    }

    #[inline]
    pub fn clamp(&self, value: u32) -> u32 {
        value.max(self.lower).min(self.upper)
    }

    /// Clamp the leading `u32` of a payload. Payloads without one are returned unchanged.
    pub fn clamp_payload(&self, payload: &Payload) -> Payload {
        match payload.as_u32() {
            Some(v) if self.clamp(v) != v => {
                tracing::debug!(requested = v, limited = self.clamp(v), "limiting request");
                payload.with_u32(self.clamp(v)).unwrap_or_else(|| payload.clone())
            }
            _ => payload.clone(),
        }
    }

    /// Apply a partial update; a bound given as `None` keeps its current value.
    ///
    /// Returns whether anything changed. An inverted result is rejected and `self` is left
    /// untouched.
    pub fn update(&mut self, upper: Option<u32>, lower: Option<u32>) -> ArbResult<bool> {
        let next = Limits::new(upper.unwrap_or(self.upper), lower.unwrap_or(self.lower))?;
        let changed = next != *self;
        *self = next;
        Ok(changed)
    }
}
