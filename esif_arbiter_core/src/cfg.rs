use serde::{Deserialize, Serialize};

use crate::defaults::DefaultTables;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterCfg {
    /// Global arbitration state at start-up.
    pub arbitration_enabled: bool,
    /// Entry-table growth (and shrink) increment per context.
    pub entry_growth: usize,
    pub worker_thread_name: String,
    /// Seed new contexts from `default_tables`.
    pub populate_defaults: bool,
    pub default_tables: DefaultTables,
}

impl Default for ArbiterCfg {
    fn default() -> Self {
        Self {
            arbitration_enabled: true,
            entry_growth: 10,
            worker_thread_name: "UfArbMgrPrimitiveQueue".to_string(),
            populate_defaults: true,
            default_tables: DefaultTables::default(),
        }
    }
}

impl ArbiterCfg {
    /// Growth increment, never below one.
    pub fn entry_growth(&self) -> usize {
        self.entry_growth.max(1)
    }
}
