//! esif_arbiter_core
//!
//! Pure arbitration logic for competing primitive SET requests.
//!
//! - No locks
//! - No threads
//! - No host access
//!
//! Locking, reference counting and the execution queue live in `esif_arbiter_manager`.

pub mod ids;
pub mod payload;
pub mod error;

pub mod comparator;
pub mod limits;
pub mod request;
pub mod entry;
pub mod defaults;
pub mod info;
pub mod cfg;

pub use ids::{AppHandle, Domain, EntryKey, Instance, ParticipantId, PrimitiveId};
pub use payload::{Payload, ARB_DATA_SIZE};
pub use error::{ArbError, ArbResult};

pub use comparator::{ArbitrationType, Ranking};
pub use limits::{Limits, LIMIT_MAX, LIMIT_MAX_PERCENT, LIMIT_MIN, LIMIT_MIN_PERCENT};
pub use request::{ArbRequest, RequestList};
pub use entry::{Corrective, EntryParams, EntryState};
pub use defaults::{DefaultRow, DefaultTables, ParticipantClass};
pub use info::{ArbContextInfo, ArbEntryInfo, ArbInfo};
pub use cfg::ArbiterCfg;
