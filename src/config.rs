use serde::{Deserialize, Serialize};

/// Engine settings. Every field has a default so partial YAML files are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of process instances a batch modification works on at the same time.
    pub batch_parallelism: usize,
    /// Validate the execution tree after every instruction.
    pub check_invariants: bool,
    pub authorization_enabled: bool,
    pub history_enabled: bool,
    /// Upper bound when following `replaced_by` links.
    pub max_replacement_chain: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_parallelism: 4,
            check_invariants: true,
            authorization_enabled: true,
            history_enabled: true,
            max_replacement_chain: 64,
        }
    }
}
