//! The Enumeration Engine: drives each discovered entity through the
//! ordered phase sequence, tracks outstanding queries, and schedules
//! retries through the networking executor's delayed queue.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use crate::entity::compatibility::{CompatibilityFlag, MilanVersion};
use crate::entity::enumeration_state::{EnumerationPhase, ExpectedQueryKey};
use crate::enumeration::classify::{classify_phase_failure, PhaseOutcome};
use crate::identifiers::{DescriptorType, EntityID};
use crate::protocol::interface::{AecpCommand, MvuCommand, ProtocolInterface, SequenceID};
use crate::retry::{BackoffPolicy, QueryClass};
use crate::store::EntityStore;

/// Hooks the engine calls back into once an entity finishes a phase or all
/// phases.
/// Kept as a narrow trait rather than a hard dependency on the dispatcher or
/// controller facade, so the engine can be unit-tested with a fake.
pub trait EnumerationHooks: Send + Sync {
  fn on_entity_model_enumerated(&self, entity_id: EntityID);
  fn on_pre_advertise(&self, entity_id: EntityID);
  fn on_entity_online(&self, entity_id: EntityID);
  fn on_post_advertise(&self, entity_id: EntityID);
  fn on_enumeration_aborted(&self, entity_id: EntityID);
}

/// The subset of a `ControlledEntity` the engine needs to decide which
/// queries to issue for the current phase. Abstracted behind a closure-style
/// accessor so `engine.rs` does not need a direct dependency on the entity
/// guard's locking discipline; `Controller`/`Dispatcher` supply the real
/// implementation over `EntityStore`.
pub struct PhaseInputs {
  pub aem_supported: bool,
  pub vendor_unique_supported: bool,
  pub has_cached_static_model: bool,
  pub entity_model_cache_enabled: bool,
  pub full_static_enumeration: bool,
  pub descriptor_counts: Vec<(DescriptorType, u16)>,
  pub packed_dynamic_info_supported: Option<bool>,
}

static NEXT_SEQUENCE: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(1);

/// Shared with the dispatcher's breadth-first child-descriptor issuance so
/// both sides draw sequence IDs from the same counter.
pub(crate) fn next_sequence() -> SequenceID {
  NEXT_SEQUENCE.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
}

pub struct EnumerationEngine {
  protocol: Arc<dyn ProtocolInterface>,
  store: Arc<EntityStore>,
  hooks: Arc<dyn EnumerationHooks>,
  backoff: BackoffPolicy,
  on_delayed_retry: Box<dyn Fn(EntityID, Duration, Box<dyn FnOnce() + Send>) + Send + Sync>,
}

impl EnumerationEngine {
  pub fn new(
    protocol: Arc<dyn ProtocolInterface>,
    store: Arc<EntityStore>,
    hooks: Arc<dyn EnumerationHooks>,
    backoff: BackoffPolicy,
    on_delayed_retry: impl Fn(EntityID, Duration, Box<dyn FnOnce() + Send>) + Send + Sync + 'static,
  ) -> Self {
    Self {
      protocol,
      store,
      hooks,
      backoff,
      on_delayed_retry: Box::new(on_delayed_retry),
    }
  }

  /// Begins phase 1 for a newly-discovered entity.
  pub fn start(&self, entity_id: EntityID, inputs: &PhaseInputs) {
    debug!("{entity_id}: starting enumeration");
    self.issue_phase_queries(entity_id, inputs);
  }

  /// Issues every query the current phase requires. Phases with nothing to
  /// issue (e.g. `GetMilanInfo` on a non-AEM+VU entity) advance immediately.
  fn issue_phase_queries(&self, entity_id: EntityID, inputs: &PhaseInputs) {
    let Some(handle) = self.store.find(entity_id) else {
      warn!("{entity_id}: issue_phase_queries on unknown entity");
      return;
    };
    let phase = handle.with(|e| e.enumeration.current_phase());
    let Some(phase) = phase else {
      self.complete_enumeration(entity_id);
      return;
    };

    match phase {
      EnumerationPhase::GetMilanInfo => {
        if inputs.aem_supported && inputs.vendor_unique_supported {
          let key = ExpectedQueryKey::simple(QueryClass::MilanInfo);
          handle.with(|e| e.enumeration.issue_query(key));
          self.protocol.send_mvu(entity_id, next_sequence(), MvuCommand::GetMilanInfo);
        } else {
          self.advance_after_empty_phase(entity_id, inputs);
        }
      }
      EnumerationPhase::CheckPackedDynamicInfoSupported => {
        // Both probes below are AECP/AEM commands; an entity that never
        // declared AEM support cannot answer either one.
        if !inputs.aem_supported {
          self.advance_after_empty_phase(entity_id, inputs);
          return;
        }
        let key = ExpectedQueryKey::simple(QueryClass::CheckPackedDynamicInfo);
        handle.with(|e| e.enumeration.issue_query(key));
        self.protocol.send_aecp(entity_id, next_sequence(), AecpCommand::GetDynamicInfoProbe);
      }
      EnumerationPhase::RegisterUnsolicited => {
        if !inputs.aem_supported {
          self.advance_after_empty_phase(entity_id, inputs);
          return;
        }
        let key = ExpectedQueryKey::simple(QueryClass::RegisterUnsolicited);
        handle.with(|e| e.enumeration.issue_query(key));
        self
          .protocol
          .send_aecp(entity_id, next_sequence(), AecpCommand::RegisterUnsolicitedNotifications);
      }
      EnumerationPhase::GetStaticModel => {
        if inputs.has_cached_static_model && inputs.entity_model_cache_enabled {
          debug!("{entity_id}: valid cached static model, skipping to GetDescriptorDynamicInfo");
          handle.with(|e| {
            e.enumeration.used_cached_static_model = true;
            e.enumeration.remaining_phases.retain(|&p| p != EnumerationPhase::GetStaticModel);
          });
          self.issue_phase_queries(entity_id, inputs);
          return;
        }
        if !inputs.aem_supported {
          // No AEM: nothing to enumerate; fall straight through.
          self.advance_after_empty_phase(entity_id, inputs);
          return;
        }
        let key = ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, DescriptorType::Entity, 0);
        handle.with(|e| e.enumeration.issue_query(key));
        self.protocol.send_aecp(
          entity_id,
          next_sequence(),
          AecpCommand::ReadDescriptor { descriptor_type: DescriptorType::Entity, descriptor_index: 0 },
        );
        // Breadth-first: once the EntityDescriptor response brings in the
        // configuration's descriptor counts, the dispatcher's
        // `on_descriptor_read` requests the rest (and, if
        // full-static-enumeration or locale selection requires it, every
        // other configuration's Locale/Strings too).
      }
      EnumerationPhase::GetDescriptorDynamicInfo => {
        // Fires exactly once per entity, regardless of which path led here.
        self.hooks.on_entity_model_enumerated(entity_id);
        if !handle.with(|e| e.enumeration.used_cached_static_model) {
          // Only the cached-model fast path reaches this phase for real: a
          // freshly-read full descriptor already carries current dynamic
          // fields inline.
          self.advance_after_empty_phase(entity_id, inputs);
          return;
        }
        // Real traversal of the cached tree to request per-descriptor
        // dynamic fields is driven by the dispatcher via
        // `issue_descriptor_dynamic_info_queries`, which knows the cached
        // tree's shape.
        if inputs.descriptor_counts.is_empty() {
          self.advance_after_empty_phase(entity_id, inputs);
        }
      }
      EnumerationPhase::GetDynamicInfo => {
        for (descriptor_type, count) in &inputs.descriptor_counts {
          for index in 0..*count {
            let class = if inputs.packed_dynamic_info_supported == Some(true) {
              QueryClass::GetPackedDynamicInfo
            } else {
              QueryClass::DynamicInfo
            };
            let key = ExpectedQueryKey::for_descriptor(class, *descriptor_type, index);
            handle.with(|e| e.enumeration.issue_query(key));
          }
        }
        if inputs.descriptor_counts.is_empty() {
          self.advance_after_empty_phase(entity_id, inputs);
        }
        // The actual AECP/packed-GET_DYNAMIC_INFO sends are issued by the
        // dispatcher's `issue_dynamic_info_queries`, which has the static
        // model shape needed to build per-descriptor requests and pack them
        // up to the AECP maximum payload.
      }
    }
  }

  /// A phase with no outstanding queries for this entity (e.g. Milan info
  /// skipped because the entity doesn't declare AEM+VU) advances
  /// immediately and proceeds to issue the next phase's queries.
  fn advance_after_empty_phase(&self, entity_id: EntityID, inputs: &PhaseInputs) {
    let Some(handle) = self.store.find(entity_id) else { return };
    let advanced = handle.with(|e| e.enumeration.advance_phase());
    if advanced {
      self.issue_phase_queries(entity_id, inputs);
    } else {
      self.complete_enumeration(entity_id);
    }
  }

  /// Call when a single query's response/classification arrives. `outcome`
  /// is `Ok(())` for success (payload application is the Dispatcher's job,
  /// done before this call), `Err(action)` for a classified failure.
  pub fn resolve_query(
    &self,
    entity_id: EntityID,
    key: ExpectedQueryKey,
    outcome: Result<(), crate::retry::FailureAction>,
    inputs: &PhaseInputs,
  ) {
    let Some(handle) = self.store.find(entity_id) else { return };

    match outcome {
      Ok(()) => {
        handle.with(|e| e.enumeration.resolve_query(&key));
        self.maybe_advance(entity_id, inputs);
      }
      Err(action) if action.is_retriable() => {
        let decision = handle.with(|e| e.enumeration.retry_counters.counter_mut(key.class).record_and_decide(key.class, self.backoff));
        match decision {
          Some(delay) => {
            handle.with(|e| e.statistics.record_retry());
            self.schedule_retry(entity_id, key, delay, inputs);
          }
          None => {
            handle.with(|e| e.enumeration.resolve_query(&key));
            self.apply_phase_outcome(entity_id, key, action, inputs);
          }
        }
      }
      Err(action) => {
        handle.with(|e| e.enumeration.resolve_query(&key));
        self.apply_phase_outcome(entity_id, key, action, inputs);
      }
    }
  }

  fn schedule_retry(&self, entity_id: EntityID, key: ExpectedQueryKey, delay: Duration, inputs: &PhaseInputs) {
    let protocol = Arc::clone(&self.protocol);
    let command = reissue_command(key);
    debug!("{entity_id}: scheduling retry for {key:?} in {delay:?}");
    let _ = inputs;
    (self.on_delayed_retry)(
      entity_id,
      delay,
      Box::new(move || {
        if let Some(command) = command {
          protocol.send_aecp(entity_id, next_sequence(), command);
        }
      }),
    );
  }

  fn apply_phase_outcome(
    &self,
    entity_id: EntityID,
    key: ExpectedQueryKey,
    action: crate::retry::FailureAction,
    inputs: &PhaseInputs,
  ) {
    let Some(handle) = self.store.find(entity_id) else { return };
    let phase = handle.with(|e| e.enumeration.current_phase());
    let Some(phase) = phase else { return };
    let outcome = classify_phase_failure(phase, action);
    match outcome {
      PhaseOutcome::Continue => {}
      PhaseOutcome::ContinueAndDowngradeMilan => {
        handle.with(|e| {
          e.compatibility.downgrade_milan_version(
            MilanVersion::new(1, 0),
            Some("required-command-missing"),
          );
        });
      }
      PhaseOutcome::Fatal => {
        handle.with(|e| e.enumeration.fatal_error = true);
        warn!("{entity_id}: enumeration aborted (fatal classification on {key:?})");
        self.hooks.on_enumeration_aborted(entity_id);
        return;
      }
      PhaseOutcome::FallbackToFullDescriptor => {
        handle.with(|e| {
          let descriptor_key = ExpectedQueryKey::for_descriptor(
            QueryClass::Descriptor,
            key.descriptor_type.unwrap_or(DescriptorType::Entity),
            key.descriptor_index.unwrap_or(0),
          );
          e.enumeration.issue_query(descriptor_key);
        });
        if let (Some(descriptor_type), Some(descriptor_index)) = (key.descriptor_type, key.descriptor_index) {
          self.protocol.send_aecp(
            entity_id,
            next_sequence(),
            AecpCommand::ReadDescriptor { descriptor_type, descriptor_index },
          );
        }
      }
      PhaseOutcome::RestartFromStaticModel => {
        handle.with(|e| e.enumeration.restart_from_static_model());
        self.issue_phase_queries(entity_id, inputs);
        return;
      }
      PhaseOutcome::DisablePackedFastPath => {
        handle.with(|e| {
          e.compatibility.flags.insert(CompatibilityFlag::Misbehaving);
          e.enumeration.restart_dynamic_info_unpacked();
        });
        self.issue_phase_queries(entity_id, inputs);
        return;
      }
    }
    self.maybe_advance(entity_id, inputs);
  }

  fn maybe_advance(&self, entity_id: EntityID, inputs: &PhaseInputs) {
    let Some(handle) = self.store.find(entity_id) else { return };
    if handle.with(|e| e.enumeration.phase_has_outstanding_queries()) {
      return;
    }
    let advanced = handle.with(|e| e.enumeration.advance_phase());
    if advanced {
      self.issue_phase_queries(entity_id, inputs);
    } else {
      self.complete_enumeration(entity_id);
    }
  }

  /// All phases complete with no fatal flag: pre-advertise,
  /// advertise, online, post-advertise, in that order.
  fn complete_enumeration(&self, entity_id: EntityID) {
    let Some(handle) = self.store.find(entity_id) else { return };
    let fatal = handle.with(|e| e.enumeration.fatal_error);
    if fatal {
      self.hooks.on_enumeration_aborted(entity_id);
      return;
    }
    info!("{entity_id}: enumeration complete, advertising");
    self.hooks.on_pre_advertise(entity_id);
    handle.with(|e| e.enumeration.advertised = true);
    self.hooks.on_entity_online(entity_id);
    self.hooks.on_post_advertise(entity_id);
  }
}

/// Best-effort reconstruction of the command to resend on retry. Since the
/// expected-query key doesn't retain full command parameters (only its
/// matching coordinates), a real deployment's Dispatcher keeps a small
/// side-table of in-flight command payloads; this helper covers the cases
/// the key alone determines.
fn reissue_command(key: ExpectedQueryKey) -> Option<AecpCommand> {
  match (key.class, key.descriptor_type, key.descriptor_index) {
    (QueryClass::Descriptor, Some(descriptor_type), Some(descriptor_index)) => {
      Some(AecpCommand::ReadDescriptor { descriptor_type, descriptor_index })
    }
    (QueryClass::CheckPackedDynamicInfo, _, _) => Some(AecpCommand::GetDynamicInfoProbe),
    (QueryClass::RegisterUnsolicited, _, _) => Some(AecpCommand::RegisterUnsolicitedNotifications),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Mutex;

  use crate::entity::ControlledEntity;
  use crate::protocol::interface::{AcmpCommand, MvuCommand as Mvu};

  #[derive(Default)]
  struct RecordingProtocol {
    aecp_sent: Mutex<Vec<AecpCommand>>,
    mvu_sent: Mutex<Vec<MvuCommand>>,
  }

  impl ProtocolInterface for RecordingProtocol {
    fn send_aecp(&self, _entity_id: EntityID, _sequence_id: SequenceID, command: AecpCommand) {
      self.aecp_sent.lock().unwrap().push(command);
    }
    fn send_mvu(&self, _entity_id: EntityID, _sequence_id: SequenceID, command: MvuCommand) {
      self.mvu_sent.lock().unwrap().push(command);
    }
    fn send_acmp(&self, _sequence_id: SequenceID, _command: AcmpCommand) {}
    fn enable_entity_advertising(&self, _available_duration_secs: u32) {}
    fn disable_entity_advertising(&self) {}
    fn discover_entities(&self, _entity_id: Option<EntityID>) {}
    fn is_self_locked(&self) -> bool {
      false
    }
  }

  #[derive(Default)]
  struct CountingHooks {
    online: AtomicUsize,
    aborted: AtomicUsize,
    pre_advertise: AtomicUsize,
  }

  impl EnumerationHooks for CountingHooks {
    fn on_entity_model_enumerated(&self, _entity_id: EntityID) {}
    fn on_pre_advertise(&self, _entity_id: EntityID) {
      self.pre_advertise.fetch_add(1, Ordering::SeqCst);
    }
    fn on_entity_online(&self, _entity_id: EntityID) {
      self.online.fetch_add(1, Ordering::SeqCst);
    }
    fn on_post_advertise(&self, _entity_id: EntityID) {}
    fn on_enumeration_aborted(&self, _entity_id: EntityID) {
      self.aborted.fetch_add(1, Ordering::SeqCst);
    }
  }

  fn no_aem_inputs() -> PhaseInputs {
    PhaseInputs {
      aem_supported: false,
      vendor_unique_supported: false,
      has_cached_static_model: false,
      entity_model_cache_enabled: false,
      full_static_enumeration: false,
      descriptor_counts: vec![],
      packed_dynamic_info_supported: None,
    }
  }

  #[test]
  fn entity_without_aem_or_vu_skips_straight_through_to_advertised() {
    let store = Arc::new(EntityStore::new());
    let id = EntityID(1);
    store.insert(ControlledEntity::new(id, false)).unwrap();
    let protocol = Arc::new(RecordingProtocol::default());
    let hooks = Arc::new(CountingHooks::default());
    let engine = EnumerationEngine::new(
      protocol,
      Arc::clone(&store),
      Arc::clone(&hooks) as Arc<dyn EnumerationHooks>,
      BackoffPolicy::default(),
      |_, _, _| {},
    );

    engine.start(id, &no_aem_inputs());

    assert_eq!(hooks.online.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.pre_advertise.load(Ordering::SeqCst), 1);
    let handle = store.find(id).unwrap();
    assert!(handle.with(|e| e.is_advertised()));
  }

  #[test]
  fn milan_info_query_issues_mvu_command_when_supported() {
    let store = Arc::new(EntityStore::new());
    let id = EntityID(2);
    store.insert(ControlledEntity::new(id, false)).unwrap();
    let protocol = Arc::new(RecordingProtocol::default());
    let hooks = Arc::new(CountingHooks::default());
    let engine = EnumerationEngine::new(
      Arc::clone(&protocol) as Arc<dyn ProtocolInterface>,
      Arc::clone(&store),
      hooks as Arc<dyn EnumerationHooks>,
      BackoffPolicy::default(),
      |_, _, _| {},
    );
    let inputs = PhaseInputs {
      aem_supported: true,
      vendor_unique_supported: true,
      ..no_aem_inputs()
    };

    engine.start(id, &inputs);

    assert_eq!(protocol.mvu_sent.lock().unwrap().as_slice(), &[Mvu::GetMilanInfo]);
    let handle = store.find(id).unwrap();
    assert!(handle.with(|e| e.enumeration.phase_has_outstanding_queries()));
  }

  #[test]
  fn fatal_classification_aborts_without_advertising() {
    let store = Arc::new(EntityStore::new());
    let id = EntityID(3);
    store.insert(ControlledEntity::new(id, false)).unwrap();
    let protocol = Arc::new(RecordingProtocol::default());
    let hooks = Arc::new(CountingHooks::default());
    let engine = EnumerationEngine::new(
      protocol,
      Arc::clone(&store),
      Arc::clone(&hooks) as Arc<dyn EnumerationHooks>,
      BackoffPolicy::default(),
      |_, _, _| {},
    );
    let inputs = no_aem_inputs();
    engine.start(id, &inputs);
    let handle = store.find(id).unwrap();
    let key = handle.with(|e| e.enumeration.expected_queries.iter().next().copied());
    // Force the entity back into an outstanding state to exercise a fatal
    // classification path directly.
    handle.with(|e| {
      e.enumeration.remaining_phases = vec![EnumerationPhase::GetStaticModel];
      e.enumeration.advertised = false;
      e.enumeration
        .issue_query(ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, DescriptorType::Entity, 0));
    });
    let _ = key;
    engine.resolve_query(
      id,
      ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, DescriptorType::Entity, 0),
      Err(crate::retry::FailureAction::ErrorFatal),
      &inputs,
    );

    assert_eq!(hooks.aborted.load(Ordering::SeqCst), 1);
    assert!(!handle.with(|e| e.is_advertised()));
    assert!(handle.with(|e| e.enumeration.fatal_error));
  }
}
