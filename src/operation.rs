//! The error boundary around every remote unit of work.

use tracing::{debug, warn};

use crate::error::{Fault, ProcessingError, Result};

/// Run one network+parse+mutate unit of work under a human-readable label.
///
/// Whatever fault `work` raises comes back as a [`ProcessingError`] whose
/// message starts with `label`. A `ProcessingError` produced by a nested
/// operation passes through untouched. Nothing is retried.
pub fn run<T, F>(label: impl Into<String>, work: F) -> Result<T>
where
  F: FnOnce() -> std::result::Result<T, Fault>,
{
  let label = label.into();
  debug!(operation = %label, "starting");

  match work() {
    Ok(value) => Ok(value),
    Err(Fault::Nested(inner)) => Err(*inner),
    Err(fault) => {
      warn!(operation = %label, error = %fault, "operation failed");
      Err(ProcessingError::new(label, fault))
    }
  }
}
