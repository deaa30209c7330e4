//! EngineDriver (C2) — unified read-only execution across engines.

pub mod drivers;
pub mod normalize;
pub mod placeholder;
pub mod traits;

pub use traits::EngineDriver;

use crate::types::EngineKind;

/// Default per-call timeout for `EngineDriver::execute`, per spec.md §4.2.
pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 30_000;

/// Returns an engine driver suitable for the given connection kind.
pub fn driver_for(engine: EngineKind) -> std::sync::Arc<dyn EngineDriver> {
    match engine {
        EngineKind::RelationalA => std::sync::Arc::new(drivers::relational_a::RelationalADriver::new()),
        EngineKind::RelationalB => std::sync::Arc::new(drivers::relational_b::RelationalBDriver::new()),
        EngineKind::Document => std::sync::Arc::new(drivers::document::DocumentDriver::new()),
    }
}
