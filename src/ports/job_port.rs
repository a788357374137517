//! Periodic background job port.

use crate::domain::error::StocksimError;

/// One unit of background work driven by a scheduler.
///
/// `run_once` runs a single iteration to completion and returns a one-line
/// summary. Implementations isolate per-item failures; an `Err` means the
/// whole iteration could not run (for example, the store was unreachable).
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &str;

    fn run_once(&self) -> Result<String, StocksimError>;
}
