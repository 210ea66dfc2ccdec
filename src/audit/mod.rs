//! Reconciliation engine.
//!
//! - `types`: check units, unit reports, mismatch classification and the run error type.
//! - `context`: collaborators, per-call timeout and run deadline shared by every unit.
//! - `comparator`: diffs replayed ledger state against state fetched from the node.
//! - `orchestrator`: the generic driver running a `UnitCheck` unit by unit.
//! - `checks`: the concrete checks.

pub mod checks;
pub mod comparator;
pub mod context;
pub mod orchestrator;
pub mod progress_tracker;
pub mod types;

pub use checks::{build_check, load_addresses};
pub use comparator::{HeightData, ReconciliationComparator, WatchedAccount};
pub use context::AuditContext;
pub use orchestrator::{CheckDriver, UnitCheck};
pub use progress_tracker::{RunProgressTracker, RunStats};
pub use types::*;
