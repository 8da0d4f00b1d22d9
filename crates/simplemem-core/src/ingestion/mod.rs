//! Gated ingestion: windowing, the entropy gate, and atomization.
//!
//! A transcript is split into windows. Each window is scored against the
//! recent history of its memory space; accepted windows are decomposed into
//! context-independent atom candidates ready for indexing.

pub mod atomizer;
pub mod coreference;
pub mod entropy_gate;
pub mod history;
pub mod types;
pub mod windowing;

pub use atomizer::{extract_claims, Atomizer, AtomizerConfig};
pub use coreference::{resolve_pronouns, Referents, Resolved};
pub use entropy_gate::{EntropyGate, GateConfig, GateEvaluation};
pub use history::{HistoryFrame, RecentHistory};
pub use types::*;
pub use windowing::{split_windows, WindowingConfig};
