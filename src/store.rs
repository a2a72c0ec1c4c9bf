//! Entity Store: process-wide (per-Controller) mapping from
//! `EntityID` to a shared `ControlledEntity` handle.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::debug;
use parking_lot::ReentrantMutex;

use crate::entity::guard::EntityCell;
use crate::entity::{ControlledEntity, ControlledEntityHandle};
use crate::identifiers::EntityID;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
  AlreadyPresent(EntityID),
}

/// The store's map is itself behind a reentrant mutex guarding the
/// EntityID→entity map and iteration.
#[derive(Default)]
pub struct EntityStore {
  inner: ReentrantMutex<std::cell::RefCell<BTreeMap<EntityID, Arc<EntityCell>>>>,
}

impl EntityStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fails if the identifier is already present.
  pub fn insert(&self, entity: ControlledEntity) -> Result<ControlledEntityHandle, StoreError> {
    let id = entity.entity_id;
    let guard = self.inner.lock();
    let mut map = guard.borrow_mut();
    if map.contains_key(&id) {
      return Err(StoreError::AlreadyPresent(id));
    }
    let handle = ControlledEntityHandle::new(entity);
    map.insert(id, Arc::clone(handle.cell()));
    debug!("entity store: inserted {id}");
    Ok(handle)
  }

  pub fn find(&self, id: EntityID) -> Option<ControlledEntityHandle> {
    let guard = self.inner.lock();
    let map = guard.borrow();
    map.get(&id).cloned().map(ControlledEntityHandle::from_cell)
  }

  pub fn remove(&self, id: EntityID) -> Option<ControlledEntityHandle> {
    let guard = self.inner.lock();
    let mut map = guard.borrow_mut();
    let removed = map.remove(&id).map(ControlledEntityHandle::from_cell);
    if removed.is_some() {
      debug!("entity store: removed {id}");
    }
    removed
  }

  pub fn contains(&self, id: EntityID) -> bool {
    let guard = self.inner.lock();
    guard.borrow().contains_key(&id)
  }

  pub fn len(&self) -> usize {
    let guard = self.inner.lock();
    guard.borrow().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Read-only iteration; holds the store mutex for the duration of `f`.
  pub fn iterate(&self, mut f: impl FnMut(EntityID, &ControlledEntityHandle)) {
    let guard = self.inner.lock();
    let map = guard.borrow();
    for (id, cell) in map.iter() {
      let handle = ControlledEntityHandle::from_cell(Arc::clone(cell));
      f(*id, &handle);
    }
  }

  pub fn all_ids(&self) -> Vec<EntityID> {
    let guard = self.inner.lock();
    guard.borrow().keys().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn insert_then_find_round_trips() {
    let store = EntityStore::new();
    let id = EntityID(1);
    store.insert(ControlledEntity::new(id, false)).unwrap();
    assert!(store.find(id).is_some());
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn duplicate_insert_is_rejected() {
    let store = EntityStore::new();
    let id = EntityID(1);
    store.insert(ControlledEntity::new(id, false)).unwrap();
    let err = store.insert(ControlledEntity::new(id, false)).unwrap_err();
    assert_eq!(err, StoreError::AlreadyPresent(id));
  }

  #[test]
  fn remove_drops_entity_from_map() {
    let store = EntityStore::new();
    let id = EntityID(1);
    store.insert(ControlledEntity::new(id, false)).unwrap();
    assert!(store.remove(id).is_some());
    assert!(store.find(id).is_none());
    assert!(store.is_empty());
  }

  #[test]
  fn iterate_sees_every_entity() {
    let store = EntityStore::new();
    store.insert(ControlledEntity::new(EntityID(1), false)).unwrap();
    store.insert(ControlledEntity::new(EntityID(2), false)).unwrap();
    let mut seen = Vec::new();
    store.iterate(|id, _| seen.push(id));
    seen.sort();
    assert_eq!(seen, vec![EntityID(1), EntityID(2)]);
  }
}
