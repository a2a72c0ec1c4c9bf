//! Tree model access strategy: a pluggable not-found policy so strict
//! call sites (command results) can assert while lenient call sites
//! (unsolicited notifications arriving mid-enumeration) degrade gracefully.

use log::warn;

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeModelAccessStrategy {
  /// Propagate a `ModelError` to the caller.
  Throw,
  /// Log at `warn` and return `None`/skip the update.
  LogAndReturnNull,
  /// Return `None`/skip the update without logging.
  Silent,
}

impl TreeModelAccessStrategy {
  /// Resolves a lookup result according to the strategy. `Ok(None)` means
  /// "not found, handled per policy"; `Err` only occurs under `Throw`.
  pub fn resolve<T>(
    self,
    found: Option<T>,
    context: impl Fn() -> String,
  ) -> Result<Option<T>, ModelError> {
    match found {
      Some(v) => Ok(Some(v)),
      None => match self {
        TreeModelAccessStrategy::Throw => {
          Err(ModelError::invalid_descriptor(context()))
        }
        TreeModelAccessStrategy::LogAndReturnNull => {
          warn!("tree access miss: {}", context());
          Ok(None)
        }
        TreeModelAccessStrategy::Silent => Ok(None),
      },
    }
  }
}
