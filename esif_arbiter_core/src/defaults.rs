use serde::{Deserialize, Serialize};

use crate::comparator::ArbitrationType;
use crate::ids::{Domain, EntryKey, Instance, PrimitiveId};
use crate::entry::EntryParams;
use crate::limits::Limits;

// ---------------------------------------------------------------------
// Default arbitration tables: entries a participant context is seeded
// with at creation, keyed by participant class.
// ---------------------------------------------------------------------

/// Participant classes that carry a default table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParticipantClass {
    Cpu,
    Wireless,
    Fan,
    /// The primary (IETM) participant.
    Primary,
    Other,
}

/// One default row. The primitive is named as in the primitive catalog and resolved to an id
/// when a context is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultRow {
    pub primitive: String,
    pub domain: Domain,
    pub instance: Instance,
    pub arb_type: ArbitrationType,
    pub limits: Limits,
}

impl DefaultRow {
    pub fn new(primitive: &str, domain: Domain, instance: u8, arb_type: ArbitrationType, limits: Limits) -> Self {
        Self {
            primitive: primitive.to_string(),
            domain,
            instance: Instance(instance),
            arb_type,
            limits,
        }
    }

    pub fn to_params(&self, primitive: PrimitiveId) -> EntryParams {
        EntryParams {
            key: EntryKey::new(primitive, self.domain, self.instance),
            arb_type: Some(self.arb_type),
            limits: self.limits,
        }
    }
}

/// Per-class default tables.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultTables {
    pub cpu: Vec<DefaultRow>,
    pub wireless: Vec<DefaultRow>,
    pub fan: Vec<DefaultRow>,
    pub primary: Vec<DefaultRow>,
}

impl DefaultTables {
    pub fn empty() -> Self {
        Self { cpu: Vec::new(), wireless: Vec::new(), fan: Vec::new(), primary: Vec::new() }
    }

    pub fn for_class(&self, class: ParticipantClass) -> &[DefaultRow] {
        match class {
            ParticipantClass::Cpu => &self.cpu,
            ParticipantClass::Wireless => &self.wireless,
            ParticipantClass::Fan => &self.fan,
            ParticipantClass::Primary => &self.primary,
            ParticipantClass::Other => &[],
        }
    }
}

impl Default for DefaultTables {
    fn default() -> Self {
        use ArbitrationType::{GreaterThan, LessThan};
        let d0 = Domain::D0;
        let max = Limits::default();

        let rapl = |out: &mut Vec<DefaultRow>| {
            for inst in [0, 1, 3] {
                out.push(DefaultRow::new("SET_RAPL_POWER_LIMIT", d0, inst, LessThan, max));
            }
        };
        let rapl_enable = |out: &mut Vec<DefaultRow>| {
            for inst in [0, 1] {
                out.push(DefaultRow::new("SET_RAPL_POWER_LIMIT_ENABLE", d0, inst, LessThan, max));
            }
        };

        let mut cpu = vec![
            DefaultRow::new("SET_PERF_PREFERENCE_MAX", d0, 255, LessThan, Limits::percent()),
            DefaultRow::new("SET_PERF_PREFERENCE_MIN", d0, 255, LessThan, Limits::percent()),
            DefaultRow::new("SET_PLATFORM_POWER_LIMIT", d0, 0, LessThan, max),
            DefaultRow::new("SET_PLATFORM_POWER_LIMIT", d0, 1, LessThan, max),
            DefaultRow::new("SET_PLATFORM_POWER_LIMIT_ENABLE", d0, 0, LessThan, max),
            DefaultRow::new("SET_PLATFORM_POWER_LIMIT_ENABLE", d0, 1, LessThan, max),
            DefaultRow::new("SET_PLATFORM_POWER_LIMIT_TIME_WINDOW", d0, 0, LessThan, max),
            // Offlining more cores is the more conservative request.
            DefaultRow::new("SET_PROC_NUMBER_OFFLINE_CORES", Domain::D1, 255, GreaterThan, max),
        ];
        rapl(&mut cpu);
        cpu.push(DefaultRow::new("SET_RAPL_POWER_LIMIT_DUTY_CYCLE", d0, 2, LessThan, max));
        rapl_enable(&mut cpu);
        for inst in [0, 1] {
            cpu.push(DefaultRow::new("SET_RAPL_POWER_LIMIT_TIME_WINDOW", d0, inst, LessThan, max));
        }
        cpu.push(DefaultRow::new("SET_TCC_OFFSET", d0, 255, GreaterThan, max));

        let mut wireless = Vec::new();
        rapl(&mut wireless);
        rapl_enable(&mut wireless);

        Self {
            cpu,
            wireless,
            fan: vec![DefaultRow::new("SET_FAN_LEVEL", d0, 255, GreaterThan, max)],
            primary: Vec::new(),
        }
    }
}
