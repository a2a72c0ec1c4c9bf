//! Exclusive-access state tracked per entity.

use serde::{Deserialize, Serialize};

use crate::identifiers::EntityID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AcquireState {
  #[default]
  Undefined,
  NotSupported,
  NotAcquired,
  Acquired,
  AcquiredByOther,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockState {
  #[default]
  Undefined,
  NotSupported,
  NotLocked,
  Locked,
  LockedByOther,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExclusiveAccessState {
  pub acquire_state: AcquireState,
  pub acquiring_controller: Option<EntityID>,
  pub lock_state: LockState,
  pub locking_controller: Option<EntityID>,
  pub subscribed_to_unsolicited: bool,
}
