//! Enumeration phase tracking and the per-entity expected-query set.

use std::collections::BTreeSet;

use crate::identifiers::DescriptorType;
use crate::retry::{QueryClass, RetryCounters};

/// Phase order the engine advances through. `OnEntityModelEnumerated` is a
/// notification point rather than a phase with its own queries, so it is
/// not represented here; the engine fires it between `GetStaticModel` and
/// the two tails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EnumerationPhase {
  GetMilanInfo,
  CheckPackedDynamicInfoSupported,
  RegisterUnsolicited,
  GetStaticModel,
  GetDescriptorDynamicInfo,
  GetDynamicInfo,
}

impl EnumerationPhase {
  pub const ALL_IN_ORDER: [EnumerationPhase; 6] = [
    EnumerationPhase::GetMilanInfo,
    EnumerationPhase::CheckPackedDynamicInfoSupported,
    EnumerationPhase::RegisterUnsolicited,
    EnumerationPhase::GetStaticModel,
    EnumerationPhase::GetDescriptorDynamicInfo,
    EnumerationPhase::GetDynamicInfo,
  ];

  pub fn next(self) -> Option<EnumerationPhase> {
    let idx = Self::ALL_IN_ORDER.iter().position(|&p| p == self)?;
    Self::ALL_IN_ORDER.get(idx + 1).copied()
  }
}

/// Identifies one outstanding query so its response can be matched
/// individually, since response order is not guaranteed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExpectedQueryKey {
  pub class: QueryClass,
  pub descriptor_type: Option<DescriptorType>,
  pub descriptor_index: Option<u16>,
  pub sub_index: Option<u16>,
}

impl ExpectedQueryKey {
  pub fn simple(class: QueryClass) -> Self {
    Self {
      class,
      descriptor_type: None,
      descriptor_index: None,
      sub_index: None,
    }
  }

  pub fn for_descriptor(class: QueryClass, descriptor_type: DescriptorType, index: u16) -> Self {
    Self {
      class,
      descriptor_type: Some(descriptor_type),
      descriptor_index: Some(index),
      sub_index: None,
    }
  }
}

/// The full per-entity enumeration bookkeeping.
#[derive(Debug, Clone)]
pub struct EnumerationState {
  /// Remaining phases, in order; empty once the entity is ready to
  /// advertise.
  pub remaining_phases: Vec<EnumerationPhase>,
  pub expected_queries: BTreeSet<ExpectedQueryKey>,
  pub retry_counters: RetryCounters,
  pub fatal_error: bool,
  pub advertised: bool,
  pub ignore_cached_model: bool,
  pub packed_dynamic_info_supported: Option<bool>,
  pub unsolicited_supported: bool,
  /// Set when `GetStaticModel` was skipped via a valid cached model; governs
  /// whether `GetDescriptorDynamicInfo` has real work to do.
  pub used_cached_static_model: bool,
}

impl Default for EnumerationState {
  fn default() -> Self {
    Self {
      remaining_phases: EnumerationPhase::ALL_IN_ORDER.to_vec(),
      expected_queries: BTreeSet::new(),
      retry_counters: RetryCounters::default(),
      fatal_error: false,
      advertised: false,
      ignore_cached_model: false,
      packed_dynamic_info_supported: None,
      unsolicited_supported: false,
      used_cached_static_model: false,
    }
  }
}

impl EnumerationState {
  pub fn current_phase(&self) -> Option<EnumerationPhase> {
    self.remaining_phases.first().copied()
  }

  /// A phase completes only when every query it issued has been answered
  ///. Call once a key is resolved; advances `remaining_phases` when
  /// the current phase has no more outstanding queries.
  pub fn resolve_query(&mut self, key: &ExpectedQueryKey) {
    self.expected_queries.remove(key);
  }

  pub fn issue_query(&mut self, key: ExpectedQueryKey) {
    self.expected_queries.insert(key);
  }

  pub fn phase_has_outstanding_queries(&self) -> bool {
    !self.expected_queries.is_empty()
  }

  /// Advances past the current phase. No-op if queries are still
  /// outstanding or enumeration already completed.
  pub fn advance_phase(&mut self) -> bool {
    if self.phase_has_outstanding_queries() || self.remaining_phases.is_empty() {
      return false;
    }
    self.remaining_phases.remove(0);
    true
  }

  /// Restarts enumeration from `GetStaticModel`, abandoning the cached
  /// static model.
  pub fn restart_from_static_model(&mut self) {
    self.remaining_phases = vec![
      EnumerationPhase::GetStaticModel,
      EnumerationPhase::GetDescriptorDynamicInfo,
      EnumerationPhase::GetDynamicInfo,
    ];
    self.expected_queries.clear();
  }

  /// Restarts just the GetDynamicInfo phase using individual commands,
  /// after a packed-batch fatal classification.
  pub fn restart_dynamic_info_unpacked(&mut self) {
    self.packed_dynamic_info_supported = Some(false);
    if self.current_phase() != Some(EnumerationPhase::GetDynamicInfo) {
      self.remaining_phases.retain(|&p| p == EnumerationPhase::GetDynamicInfo);
      if self.remaining_phases.is_empty() {
        self.remaining_phases.push(EnumerationPhase::GetDynamicInfo);
      }
    }
    self.expected_queries.clear();
  }

  pub fn is_complete(&self) -> bool {
    self.remaining_phases.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn phase_advances_only_when_queries_drained() {
    let mut state = EnumerationState::default();
    let key = ExpectedQueryKey::simple(QueryClass::MilanInfo);
    state.issue_query(key);
    assert!(!state.advance_phase());
    state.resolve_query(&key);
    assert!(state.advance_phase());
    assert_eq!(
      state.current_phase(),
      Some(EnumerationPhase::CheckPackedDynamicInfoSupported)
    );
  }

  #[test]
  fn full_phase_order_completes() {
    let mut state = EnumerationState::default();
    while !state.is_complete() {
      assert!(state.advance_phase());
    }
    assert!(state.is_complete());
  }

  #[test]
  fn restart_from_static_model_drops_queued_cache_phases() {
    let mut state = EnumerationState::default();
    state.remaining_phases = vec![EnumerationPhase::GetDynamicInfo];
    state.restart_from_static_model();
    assert_eq!(state.current_phase(), Some(EnumerationPhase::GetStaticModel));
  }
}
