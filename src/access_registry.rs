//! Exclusive Access Registry.
//!
//! Clients call [`Controller::request_exclusive_access`], which asks
//! the protocol for an Acquire/PersistentAcquire/Lock and, on success, mints
//! an opaque [`AccessToken`] through this registry. The registry's own job
//! starts after that: it remembers which tokens are outstanding per entity
//! so that when the underlying state later drops back to
//! `NotAcquired`/`NotLocked` (observed via an AECP response or unsolicited
//! notification), every token of the matching kind is invalidated at once.
//!
//! PersistentAcquire and Acquire are "treated identically for matching"
//! — both are represented by [`AccessKind::Acquire`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AccessError;
use crate::identifiers::EntityID;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AccessKind {
  Acquire,
  Lock,
}

/// Opaque handle returned to clients by `requestExclusiveAccess`. Equality
/// and ordering are by identity only; the fields are not meant to be
/// interpreted by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AccessToken(u64);

struct TokenEntry {
  entity_id: EntityID,
  kind: AccessKind,
  valid: bool,
}

/// Guards a `BTreeMap<EntityID, Vec<AccessToken>>`-shaped multimap under a
/// single non-reentrant lock, unlike the entity-store and per-entity locks.
#[derive(Default)]
pub struct AccessRegistry {
  next_id: AtomicU64,
  tokens: Mutex<BTreeMap<AccessToken, TokenEntry>>,
  by_entity: Mutex<BTreeMap<EntityID, Vec<AccessToken>>>,
}

impl AccessRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Mints a token for a successful Acquire/Lock claim. Called by the
  /// Controller facade only after the protocol command has already
  /// succeeded; the registry itself never talks to the wire.
  pub fn issue(&self, entity_id: EntityID, kind: AccessKind) -> AccessToken {
    let token = AccessToken(self.next_id.fetch_add(1, Ordering::Relaxed));
    self.tokens.lock().insert(
      token,
      TokenEntry {
        entity_id,
        kind,
        valid: true,
      },
    );
    self.by_entity.lock().entry(entity_id).or_default().push(token);
    token
  }

  pub fn is_valid(&self, token: AccessToken) -> bool {
    self.tokens.lock().get(&token).is_some_and(|e| e.valid)
  }

  pub fn kind_of(&self, token: AccessToken) -> Option<AccessKind> {
    self.tokens.lock().get(&token).map(|e| e.kind)
  }

  /// Explicit client-initiated release (`Controller::release`/`unlock`):
  /// invalidates just this one token, regardless of what the wire
  /// later reports.
  pub fn invalidate(&self, token: AccessToken) -> Result<(), AccessError> {
    let mut tokens = self.tokens.lock();
    let entry = tokens.get_mut(&token).ok_or(AccessError::TokenInvalidated)?;
    if !entry.valid {
      return Err(AccessError::TokenInvalidated);
    }
    entry.valid = false;
    Ok(())
  }

  /// Invalidates every outstanding token of `kind` for `entity_id` because
  /// the dispatcher observed the corresponding state drop back to
  /// `NotAcquired`/`NotLocked`. Matching happens atomically under the
  /// registry lock; the returned tokens are the ones whose callbacks should
  /// now run, invoked by the caller *outside* the lock.
  pub fn invalidate_dropped(&self, entity_id: EntityID, kind: AccessKind) -> Vec<AccessToken> {
    let mut tokens = self.tokens.lock();
    let by_entity = self.by_entity.lock();
    let Some(candidates) = by_entity.get(&entity_id) else {
      return Vec::new();
    };
    let mut invalidated = Vec::new();
    for &token in candidates {
      if let Some(entry) = tokens.get_mut(&token) {
        if entry.valid && entry.kind == kind {
          entry.valid = false;
          invalidated.push(token);
        }
      }
    }
    invalidated
  }

  /// Forgets every token for an entity that has gone offline or been
  /// removed from the store, so the registry does not grow unbounded
  /// across reconnects.
  pub fn forget_entity(&self, entity_id: EntityID) {
    if let Some(tokens) = self.by_entity.lock().remove(&entity_id) {
      let mut table = self.tokens.lock();
      for token in tokens {
        table.remove(&token);
      }
    }
  }
}

/// Thin wrapper pairing a token with the registry it came from, returned to
/// clients so they can invalidate it without threading the registry through
/// their own code. Mirrors the reference-only style of
/// [`crate::entity::ControlledEntityHandle`].
#[derive(Clone)]
pub struct ExclusiveAccessHandle {
  registry: Arc<AccessRegistry>,
  pub token: AccessToken,
  pub entity_id: EntityID,
  pub kind: AccessKind,
}

impl ExclusiveAccessHandle {
  pub(crate) fn new(registry: Arc<AccessRegistry>, entity_id: EntityID, kind: AccessKind) -> Self {
    let token = registry.issue(entity_id, kind);
    Self {
      registry,
      token,
      entity_id,
      kind,
    }
  }

  pub fn is_valid(&self) -> bool {
    self.registry.is_valid(self.token)
  }

  pub fn release(&self) -> Result<(), AccessError> {
    self.registry.invalidate(self.token)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn issued_token_is_valid_until_invalidated() {
    let registry = AccessRegistry::new();
    let entity = EntityID(1);
    let token = registry.issue(entity, AccessKind::Acquire);
    assert!(registry.is_valid(token));
    registry.invalidate(token).unwrap();
    assert!(!registry.is_valid(token));
  }

  #[test]
  fn double_invalidate_reports_already_invalidated() {
    let registry = AccessRegistry::new();
    let token = registry.issue(EntityID(1), AccessKind::Lock);
    registry.invalidate(token).unwrap();
    assert_eq!(registry.invalidate(token), Err(AccessError::TokenInvalidated));
  }

  #[test]
  fn persistent_acquire_matches_acquire_for_drop_invalidation() {
    let registry = AccessRegistry::new();
    let entity = EntityID(7);
    let acquire_token = registry.issue(entity, AccessKind::Acquire);
    let lock_token = registry.issue(entity, AccessKind::Lock);

    let dropped = registry.invalidate_dropped(entity, AccessKind::Acquire);
    assert_eq!(dropped, vec![acquire_token]);
    assert!(!registry.is_valid(acquire_token));
    assert!(registry.is_valid(lock_token));
  }

  #[test]
  fn drop_invalidation_only_affects_matching_entity() {
    let registry = AccessRegistry::new();
    let a = registry.issue(EntityID(1), AccessKind::Acquire);
    let b = registry.issue(EntityID(2), AccessKind::Acquire);
    let dropped = registry.invalidate_dropped(EntityID(1), AccessKind::Acquire);
    assert_eq!(dropped, vec![a]);
    assert!(registry.is_valid(b));
  }

  #[test]
  fn forget_entity_removes_all_of_its_tokens() {
    let registry = AccessRegistry::new();
    let entity = EntityID(3);
    let t1 = registry.issue(entity, AccessKind::Acquire);
    let t2 = registry.issue(entity, AccessKind::Lock);
    registry.forget_entity(entity);
    assert!(!registry.is_valid(t1));
    assert!(!registry.is_valid(t2));
  }

  #[test]
  fn exclusive_access_handle_releases_through_registry() {
    let registry = Arc::new(AccessRegistry::new());
    let handle = ExclusiveAccessHandle::new(Arc::clone(&registry), EntityID(9), AccessKind::Acquire);
    assert!(handle.is_valid());
    handle.release().unwrap();
    assert!(!handle.is_valid());
  }
}
