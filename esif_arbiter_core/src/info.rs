//! Read-only arbitration snapshots for diagnostic callers.

use serde::{Deserialize, Serialize};

use crate::comparator::ArbitrationType;
use crate::ids::{EntryKey, ParticipantId};
use crate::limits::Limits;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbEntryInfo {
    pub key: EntryKey,
    pub enabled: bool,
    pub arb_type: Option<ArbitrationType>,
    pub limits: Limits,
    pub request_count: usize,
    /// Current winner before clamping, if it holds a readable `u32`.
    pub arbitrated_value: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbContextInfo {
    pub participant_id: ParticipantId,
    pub participant_name: String,
    /// Whether the participant has an arbitration context at all.
    pub is_arbitrated: bool,
    pub enabled: bool,
    pub entries: Vec<ArbEntryInfo>,
}

impl ArbContextInfo {
    /// Placeholder for a participant that was never arbitrated.
    pub fn unarbitrated(participant_id: ParticipantId, participant_name: impl Into<String>) -> Self {
        Self {
            participant_id,
            participant_name: participant_name.into(),
            is_arbitrated: false,
            enabled: false,
            entries: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbInfo {
    pub enabled: bool,
    pub participants: Vec<ArbContextInfo>,
}

impl ArbInfo {
    pub fn count(&self) -> usize {
        self.participants.len()
    }

    pub fn arbitrated_count(&self) -> usize {
        self.participants.iter().filter(|p| p.is_arbitrated).count()
    }

    pub fn participant(&self, id: ParticipantId) -> Option<&ArbContextInfo> {
        self.participants.iter().find(|p| p.participant_id == id)
    }
}
