//! Background consolidation of atoms into molecules.
//!
//! A pass builds an affinity graph over recent free atoms,
//! `w = beta * cos + (1 - beta) * exp(-lambda * days)`, finds connected
//! clusters above threshold and synthesizes one molecule per cluster. Free
//! atoms that connect to an existing molecule extend it instead.

pub mod affinity;
mod manager;
mod scheduler;

pub use affinity::AffinityEdge;
pub use manager::{
    ConsolidationConfig, ConsolidationManager, ConsolidationReport, ConsolidationScope,
    SkippedCluster,
};
pub use scheduler::{ConsolidationScheduler, SchedulerConfig};
