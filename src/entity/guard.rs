//! Scoped entity guards.
//!
//! `ControlledEntityHandle` is the *reference-only* guard: a cheap `Arc`
//! clone that keeps the entity alive but takes no lock. Calling
//! [`ControlledEntityHandle::lock`] produces the *held-locked* guard,
//! [`ControlledEntityRef`], which serializes against the networking
//! executor's critical section for its lifetime and releases on every exit
//! path (panics included, via `Drop`).

use std::cell::{Cell, RefCell};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::entity::controlled_entity::ControlledEntity;

thread_local! {
  /// How many `ControlledEntityRef` guards the current thread holds right
  /// now, across all entities. Used by `Controller::with_all_locks_released`
  /// to assert the self-deadlock-avoidance precondition before a long-lived
  /// client callback runs with no entity locks held.
  static HELD_ENTITY_LOCKS: Cell<u32> = const { Cell::new(0) };
}

pub(crate) fn held_entity_lock_count() -> u32 {
  HELD_ENTITY_LOCKS.with(|c| c.get())
}

fn incr_held() {
  HELD_ENTITY_LOCKS.with(|c| c.set(c.get() + 1));
}

fn decr_held() {
  HELD_ENTITY_LOCKS.with(|c| c.set(c.get().saturating_sub(1)));
}

/// Shared, reentrant-locked cell backing one entity's record.
pub type EntityCell = ReentrantMutex<RefCell<ControlledEntity>>;

/// A reference-only guard: keeps the entity alive without blocking the
/// networking executor.
#[derive(Clone)]
pub struct ControlledEntityHandle {
  cell: Arc<EntityCell>,
}

impl ControlledEntityHandle {
  pub fn new(entity: ControlledEntity) -> Self {
    Self {
      cell: Arc::new(ReentrantMutex::new(RefCell::new(entity))),
    }
  }

  pub(crate) fn from_cell(cell: Arc<EntityCell>) -> Self {
    Self { cell }
  }

  pub(crate) fn cell(&self) -> &Arc<EntityCell> {
    &self.cell
  }

  /// Acquires the held-locked guard, serializing against the networking
  /// executor for as long as the returned guard lives.
  pub fn lock(&self) -> ControlledEntityRef<'_> {
    let guard = self.cell.lock();
    incr_held();
    ControlledEntityRef { guard }
  }

  /// Runs `f` with read/write access, holding the lock only for `f`'s
  /// duration — the common case for single-step updates.
  pub fn with<R>(&self, f: impl FnOnce(&mut ControlledEntity) -> R) -> R {
    let guard = self.lock();
    f(&mut guard.borrow_mut())
  }
}

/// The held-locked scoped guard. Borrows through a `RefCell` so callers get
/// either shared or exclusive access to the `ControlledEntity` without the
/// `ReentrantMutex` itself needing `&mut` (it only serializes threads, not
/// aliasing within a thread).
pub struct ControlledEntityRef<'a> {
  guard: ReentrantMutexGuard<'a, RefCell<ControlledEntity>>,
}

impl<'a> ControlledEntityRef<'a> {
  pub fn borrow(&self) -> std::cell::Ref<'_, ControlledEntity> {
    self.guard.borrow()
  }

  pub fn borrow_mut(&self) -> std::cell::RefMut<'_, ControlledEntity> {
    self.guard.borrow_mut()
  }
}

impl Drop for ControlledEntityRef<'_> {
  fn drop(&mut self) {
    decr_held();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identifiers::EntityID;

  #[test]
  fn lock_then_drop_restores_zero_held_count() {
    let handle = ControlledEntityHandle::new(ControlledEntity::new(EntityID(1), false));
    assert_eq!(held_entity_lock_count(), 0);
    {
      let guard = handle.lock();
      assert_eq!(guard.borrow().entity_id, EntityID(1));
      assert_eq!(held_entity_lock_count(), 1);
    }
    assert_eq!(held_entity_lock_count(), 0);
  }

  #[test]
  fn with_mutates_through_closure() {
    let handle = ControlledEntityHandle::new(ControlledEntity::new(EntityID(2), false));
    handle.with(|e| e.entity_model_id = 42);
    assert_eq!(handle.lock().borrow().entity_model_id, 42);
  }

  #[test]
  fn reentrant_lock_on_same_thread_does_not_deadlock() {
    let handle = ControlledEntityHandle::new(ControlledEntity::new(EntityID(3), false));
    let outer = handle.lock();
    let inner = handle.lock();
    assert_eq!(held_entity_lock_count(), 2);
    drop(inner);
    drop(outer);
  }
}
