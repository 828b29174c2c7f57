use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ArbError;
use crate::payload::Payload;

/// Arbitration function applied to one entry.
///
/// The numeric values are the ones used on the administrative interface; `0` is reserved for
/// "no comparator" and is rejected by `TryFrom<u32>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ArbitrationType {
    /// The numerically greatest `u32` wins.
    GreaterThan = 1,
    /// The numerically smallest `u32` wins.
    LessThan = 2,
}

/// Outcome of ranking two candidate payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ranking {
    /// The first candidate has priority (including: only the first is valid).
    First,
    /// The second candidate has priority (including: only the second is valid).
    Second,
    /// Both are valid and equal in priority.
    Tie,
    /// Neither holds a readable `u32`.
    BothInvalid,
}

impl ArbitrationType {
    pub fn id(self) -> u32 {
        self as u32
    }

    /// Rank `a` against `b`. An unreadable payload always loses to a readable one.
    pub fn rank(self, a: &Payload, b: &Payload) -> Ranking {
        let ranking = match (a.as_u32(), b.as_u32()) {
            (None, None) => Ranking::BothInvalid,
            (Some(_), None) => Ranking::First,
            (None, Some(_)) => Ranking::Second,
            (Some(x), Some(y)) => {
                let ord = match self {
                    ArbitrationType::GreaterThan => x.cmp(&y),
                    ArbitrationType::LessThan => y.cmp(&x),
                };
                match ord {
                    Ordering::Greater => Ranking::First,
                    Ordering::Less => Ranking::Second,
                    Ordering::Equal => Ranking::Tie,
                }
            }
        };
        tracing::trace!(
            arb_type = %self,
            a = ?a.as_u32(),
            b = ?b.as_u32(),
            ?ranking,
            "ranked requests"
        );
        ranking
    }
}

impl TryFrom<u32> for ArbitrationType {
    type Error = ArbError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(ArbitrationType::GreaterThan),
            2 => Ok(ArbitrationType::LessThan),
            _ => Err(ArbError::OutOfBounds),
        }
    }
}

impl fmt::Display for ArbitrationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArbitrationType::GreaterThan => f.write_str("UINT32_GREATER_THAN"),
            ArbitrationType::LessThan => f.write_str("UINT32_LESS_THAN"),
        }
    }
}
