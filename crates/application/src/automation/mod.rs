mod engine;
mod stats;

pub use engine::AutomationEngine;
pub use stats::{extract_stat_refs, StatRef};
