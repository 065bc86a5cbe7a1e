// src/search/mod.rs

pub mod node;
pub mod report;
pub mod select;
pub mod syzygy;
pub mod tree;

use serde::{Deserialize, Serialize};

pub use node::{Node, PotentialNode};
pub use report::{cp_to_score, score_to_cp};
pub use select::Playout;
pub use syzygy::{NullTablebase, Probe, SyzygyTablebase, TablebaseProbe};
pub use tree::SearchTree;

/// Deepest ply the tree is expected to reach; mate scores count down from
/// here so that shorter mates order first.
pub const MAX_DEPTH: u32 = 127;

pub const DEFAULT_TRY_PLAYOUT_LIMIT: i32 = 3;
pub const DEFAULT_VLD_MAX: i64 = 800;
pub const DEFAULT_CPUCT_INIT: f32 = 1.25;
pub const DEFAULT_CPUCT_BASE: f32 = 19_652.0;
pub const DEFAULT_CPUCT_FACTOR: f32 = 2.0;

/// Tunable search parameters.
///
/// `try_playout_limit` bounds how often a single playout may restart after
/// running into in-flight or unextendable nodes; `vld_max` bounds the
/// virtual loss it may spend while doing so.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub try_playout_limit: i32,
    pub vld_max: i64,
    pub cpuct_init: f32,
    pub cpuct_base: f32,
    pub cpuct_factor: f32,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            try_playout_limit: DEFAULT_TRY_PLAYOUT_LIMIT,
            vld_max: DEFAULT_VLD_MAX,
            cpuct_init: DEFAULT_CPUCT_INIT,
            cpuct_base: DEFAULT_CPUCT_BASE,
            cpuct_factor: DEFAULT_CPUCT_FACTOR,
        }
    }
}

impl SearchSettings {
    /// Exploration constant, growing slowly with the visit weight `n` of the
    /// node being scored.
    pub fn cpuct(&self, n: f32) -> f32 {
        self.cpuct_init + self.cpuct_factor * ((n + self.cpuct_base) / self.cpuct_base).ln()
    }

    pub fn with_try_playout_limit(mut self, limit: i32) -> Self {
        self.try_playout_limit = limit;
        self
    }

    pub fn with_vld_max(mut self, vld_max: i64) -> Self {
        self.vld_max = vld_max;
        self
    }
}
