//! The Dispatcher:
//! the single `ProtocolEventSink` implementation. Every ADP/AECP/ACMP/MVU
//! callback from the external Protocol Interface lands here; this module
//! applies the change to the relevant `ControlledEntity`, maintains the
//! derived graphs, and fans the resulting `ControllerEvent`s out to
//! observers before handing failure classifications to the
//! `EnumerationEngine`.

use std::sync::{Arc, Mutex, OnceLock};

use log::{debug, trace, warn};

use crate::access_registry::{AccessKind, AccessRegistry};
use crate::entity::access_state::{AcquireState, LockState};
use crate::entity::compatibility::CompatibilityFlag;
use crate::entity::controlled_entity::{ControlledEntity, MilanInfo};
use crate::entity::enumeration_state::ExpectedQueryKey;
use crate::enumeration::engine::{EnumerationEngine, PhaseInputs};
use crate::graphs::channel_connections::ChannelConnectionsGraph;
use crate::graphs::clock_chain;
use crate::graphs::stream_connections::StreamConnectionsGraph;
use crate::identifiers::{DescriptorType, EntityID, StreamIndex};
use crate::model::descriptors::{StaticDescriptor, StreamDirection};
use crate::model::dynamic::{StreamDynamicState, StreamInputConnectionInfo};
use crate::observer::ControllerEvent;
use crate::protocol::interface::{
  AcmpCommand, AdpEvent, AecpCommand, MvuCommand, ProtocolEventSink, ProtocolInterface,
  SequenceID, SniffedAcmpEvent, UnsolicitedNotification,
};
use crate::protocol::status::{AcmpStatus, AemAecpStatus, ClassifiableStatus, MvuStatus};
use crate::retry::QueryClass;
use crate::store::EntityStore;

/// Shared mutable graph state, guarded independently of any one
/// entity's lock since a connection event touches both endpoints.
#[derive(Default)]
pub struct GraphsState {
  pub stream_connections: StreamConnectionsGraph,
  pub channel_connections: ChannelConnectionsGraph,
}

/// Reads the subset of entity state the enumeration engine needs to decide
/// the current phase's queries, without exposing the guard itself.
fn phase_inputs_for(entity: &ControlledEntity) -> PhaseInputs {
  let descriptor_counts = entity
    .model
    .current_configuration()
    .map(|config| {
      config
        .descriptor
        .as_ref()
        .map(|d| d.descriptor_counts.iter().map(|(k, v)| (*k, *v)).collect())
        .unwrap_or_default()
    })
    .unwrap_or_default();

  PhaseInputs {
    aem_supported: entity.entity_capabilities.aem_supported,
    vendor_unique_supported: entity.entity_capabilities.vendor_unique_supported,
    has_cached_static_model: entity.model.entity.is_some(),
    entity_model_cache_enabled: !entity.enumeration.ignore_cached_model,
    full_static_enumeration: false,
    descriptor_counts,
    packed_dynamic_info_supported: entity.enumeration.packed_dynamic_info_supported,
  }
}

pub struct Dispatcher {
  store: Arc<EntityStore>,
  protocol: Arc<dyn ProtocolInterface>,
  /// Set once, after construction, by `Controller::new`: the engine
  /// itself is built with hooks that delegate back into this `Dispatcher`,
  /// so the two must be wired in two steps to break the cycle.
  engine: OnceLock<Arc<EnumerationEngine>>,
  events: crate::observer::ControllerEventSender,
  graphs: Mutex<GraphsState>,
  access_registry: Arc<AccessRegistry>,
}

impl Dispatcher {
  pub fn new(
    store: Arc<EntityStore>,
    protocol: Arc<dyn ProtocolInterface>,
    events: crate::observer::ControllerEventSender,
    access_registry: Arc<AccessRegistry>,
  ) -> Self {
    Self {
      store,
      protocol,
      engine: OnceLock::new(),
      events,
      graphs: Mutex::new(GraphsState::default()),
      access_registry,
    }
  }

  /// Completes construction by supplying the `EnumerationEngine` this
  /// dispatcher forwards classified outcomes to. Must be called exactly
  /// once, before any protocol event reaches this sink.
  pub fn set_engine(&self, engine: Arc<EnumerationEngine>) {
    if self.engine.set(engine).is_err() {
      warn!("Dispatcher::set_engine called more than once; ignoring");
    }
  }

  fn engine(&self) -> &Arc<EnumerationEngine> {
    self.engine.get().expect("Dispatcher::set_engine must be called before use")
  }

  fn emit(&self, event: ControllerEvent) {
    self.events.send(event);
  }

  /// Resolves an outstanding query with the entity's current phase inputs,
  /// handing the result to the enumeration engine.
  fn resolve(&self, entity_id: EntityID, key: ExpectedQueryKey, outcome: Result<(), crate::retry::FailureAction>) {
    if let Err(action) = outcome {
      self.apply_failure_compatibility_effect(entity_id, action);
    }
    let Some(handle) = self.store.find(entity_id) else { return };
    let inputs = handle.with(|e| phase_inputs_for(e));
    self.engine().resolve_query(entity_id, key, outcome, &inputs);
  }

  /// Applies the direct compatibility consequence of a classified failure
  /// (§4.F: `ErrorContinue` clears IEEE17221, `MisbehaveContinue` sets
  /// Misbehaving), independent of whatever `PhaseOutcome` the enumeration
  /// engine separately derives for retry/abort purposes. Emits
  /// `CompatibilityChanged` only once the entity is advertised, per §4.E
  /// ("fires onCompatibilityChanged if advertised").
  fn apply_failure_compatibility_effect(&self, entity_id: EntityID, action: crate::retry::FailureAction) {
    use crate::retry::FailureAction;
    let Some(handle) = self.store.find(entity_id) else { return };
    let (changed, advertised, flags, milan_version) = handle.with(|e| {
      let changed = match action {
        FailureAction::ErrorContinue => {
          e.compatibility.remove_flag(CompatibilityFlag::Ieee17221, Some("4.F ErrorContinue"))
        }
        FailureAction::MisbehaveContinue => {
          e.compatibility.add_flag(CompatibilityFlag::Misbehaving, Some("4.F MisbehaveContinue"))
        }
        _ => false,
      };
      (changed, e.is_advertised(), e.compatibility.flags, e.compatibility.milan_version)
    });
    if changed && advertised {
      self.emit(ControllerEvent::CompatibilityChanged { entity_id, flags, milan_version });
    }
  }

  /// Read-only snapshot of the current talker→listeners graph, used by the
  /// pre-advertise reconciliation pass for a late joiner.
  pub fn stream_connection_graph_snapshot(&self) -> StreamConnectionsGraph {
    self.graphs.lock().unwrap().stream_connections.clone()
  }

  fn apply_read_descriptor(
    &self,
    entity_id: EntityID,
    descriptor_type: DescriptorType,
    descriptor_index: u16,
    node: StaticDescriptor,
  ) {
    let Some(handle) = self.store.find(entity_id) else { return };
    handle.with(|e| insert_static_node(e, node));
    debug!("{entity_id}: applied descriptor {descriptor_type:?}[{descriptor_index}]");
  }

  /// Issues one `ReadDescriptor` and records its expectation.
  fn issue_descriptor_query(&self, entity_id: EntityID, descriptor_type: DescriptorType, descriptor_index: u16) {
    let Some(handle) = self.store.find(entity_id) else { return };
    let key = ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, descriptor_type, descriptor_index);
    handle.with(|e| e.enumeration.issue_query(key));
    self.protocol.send_aecp(
      entity_id,
      crate::enumeration::engine::next_sequence(),
      AecpCommand::ReadDescriptor { descriptor_type, descriptor_index },
    );
  }

  /// Issues one `ReadDescriptor` per index of every descriptor type the
  /// current configuration declares, completing the breadth-first fetch
  /// once the `ConfigurationDescriptor` itself is known.
  fn issue_child_descriptor_queries(&self, entity_id: EntityID, counts: &crate::model::descriptors::DescriptorCounts) {
    for (&descriptor_type, &count) in counts {
      if matches!(descriptor_type, DescriptorType::Entity | DescriptorType::Configuration) {
        continue;
      }
      for descriptor_index in 0..count {
        self.issue_descriptor_query(entity_id, descriptor_type, descriptor_index);
      }
    }
  }
}

/// Inserts a freshly-read descriptor into the entity's static tree.
/// The `EntityDescriptor` establishes the configuration the rest
/// of the tree nests under; all others go into the current configuration.
fn insert_static_node(entity: &mut ControlledEntity, node: StaticDescriptor) {
  use crate::model::descriptors::*;

  if let StaticDescriptor::Entity(d) = &node {
    entity.model.entity = Some(d.clone());
    entity
      .model
      .configurations
      .entry(d.current_configuration.0)
      .or_default();
    return;
  }

  let Some(entity_desc) = &entity.model.entity else {
    warn!("descriptor applied before EntityDescriptor known; dropping");
    return;
  };
  let config_index = entity_desc.current_configuration.0;
  let config = entity.model.configurations.entry(config_index).or_default();

  match node {
    StaticDescriptor::Entity(_) => unreachable!(),
    StaticDescriptor::Configuration(d) => config.descriptor = Some(d),
    StaticDescriptor::AudioUnit(d) => {
      config.audio_units.insert(d.index.0, d);
    }
    StaticDescriptor::Stream(d) => match d.direction {
      StreamDirection::Input => {
        config.stream_inputs.insert(d.index.0, d);
      }
      StreamDirection::Output => {
        config.stream_outputs.insert(d.index.0, d);
      }
    },
    StaticDescriptor::Jack(d) => {
      config.jack_inputs.insert(d.index.0, d);
    }
    StaticDescriptor::AvbInterface(d) => {
      config.avb_interfaces.insert(d.index.0, d);
    }
    StaticDescriptor::ClockSource(d) => {
      config.clock_sources.insert(d.index.0, d);
    }
    StaticDescriptor::MemoryObject(d) => {
      config.memory_objects.insert(d.index.0, d);
    }
    StaticDescriptor::Locale(d) => {
      config.locales.insert(d.index.0, d);
    }
    StaticDescriptor::Strings(d) => {
      config.strings.insert(d.index.0, d);
    }
    StaticDescriptor::StreamPort(d) => match d.direction {
      StreamDirection::Input => {
        config.stream_ports_input.insert(d.index.0, d);
      }
      StreamDirection::Output => {
        config.stream_ports_output.insert(d.index.0, d);
      }
    },
    StaticDescriptor::AudioCluster(d) => {
      config.audio_clusters.insert(d.index.0, d);
    }
    StaticDescriptor::AudioMap(d) => {
      config.audio_maps.insert(d.index.0, d);
    }
    StaticDescriptor::Control(d) => {
      config.controls.insert(d.index.0, d);
    }
    StaticDescriptor::ClockDomain(d) => {
      config.clock_domains.insert(d.index.0, d);
    }
    StaticDescriptor::Timing(d) => {
      config.timing.insert(d.index.0, d);
    }
    StaticDescriptor::PtpInstance(d) => {
      config.ptp_instances.insert(d.index.0, d);
    }
    StaticDescriptor::PtpPort(d) => {
      config.ptp_ports.insert(d.index.0, d);
    }
  }
}

impl ProtocolEventSink for Dispatcher {
  fn on_adp_event(&self, event: AdpEvent) {
    match event {
      AdpEvent::EntityOnline(info) => {
        if self.store.contains(info.entity_id) {
          trace!("{}: duplicate ADP online, ignoring", info.entity_id);
          return;
        }
        let mut entity = ControlledEntity::new(info.entity_id, false);
        entity.entity_model_id = info.entity_model_id;
        entity.entity_capabilities = info.entity_capabilities;
        entity.talker_capabilities = info.talker_capabilities;
        entity.listener_capabilities = info.listener_capabilities;
        entity.controller_capabilities = info.controller_capabilities;
        entity.association_id = info.association_id;
        entity.interfaces = info.interfaces;
        let Ok(handle) = self.store.insert(entity) else {
          warn!("{}: duplicate EntityID at insert race", info.entity_id);
          return;
        };
        let inputs = handle.with(|e| phase_inputs_for(e));
        self.engine().start(info.entity_id, &inputs);
      }
      AdpEvent::EntityUpdate(info) => {
        let Some(handle) = self.store.find(info.entity_id) else { return };
        handle.with(|e| {
          // Only overwrite when the incoming ADP frame's AssociationIDValid bit is
          // set (Open Question in DESIGN.md): a frame with the bit clear leaves the
          // previously-stored value untouched rather than clearing it to None.
          if info.association_id_valid {
            e.association_id = info.association_id;
          }
          e.interfaces = info.interfaces;
        });
        self.emit(ControllerEvent::EntityUpdate { entity_id: info.entity_id });
      }
      AdpEvent::EntityOffline(entity_id) => {
        if self.store.remove(entity_id).is_some() {
          self.graphs.lock().unwrap().stream_connections.forget_entity(entity_id);
          self.access_registry.forget_entity(entity_id);
          self.emit(ControllerEvent::EntityOffline { entity_id });
        }
      }
    }
  }

  fn on_aecp_response(
    &self,
    entity_id: EntityID,
    _sequence_id: SequenceID,
    command: AecpCommand,
    status: AemAecpStatus,
  ) {
    if !status.is_success() {
      let action = status.classify();
      let key = key_for_command(&command);
      self.resolve(entity_id, key, Err(action));
      return;
    }

    match command {
      AecpCommand::ReadDescriptor { descriptor_type, descriptor_index } => {
        // A successful ReadDescriptor normally arrives through
        // `on_descriptor_read` with the decoded node attached; this arm only
        // resolves the expectation without touching the model, for an
        // implementor that has no payload to hand back (or already applied
        // it itself).
        let key = ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, descriptor_type, descriptor_index);
        self.resolve(entity_id, key, Ok(()));
      }
      AecpCommand::GetDynamicInfoProbe => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| e.enumeration.packed_dynamic_info_supported = Some(true));
        self.resolve(entity_id, ExpectedQueryKey::simple(QueryClass::CheckPackedDynamicInfo), Ok(()));
      }
      AecpCommand::RegisterUnsolicitedNotifications => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| {
          e.enumeration.unsolicited_supported = true;
          e.access.subscribed_to_unsolicited = true;
        });
        self.resolve(entity_id, ExpectedQueryKey::simple(QueryClass::RegisterUnsolicited), Ok(()));
      }
      AecpCommand::Acquire { .. } => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| e.access.acquire_state = AcquireState::Acquired);
        self.emit(ControllerEvent::AcquireStateChanged {
          entity_id,
          state: AcquireState::Acquired,
          owner: None,
        });
      }
      AecpCommand::Release => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| e.access.acquire_state = AcquireState::NotAcquired);
        self.access_registry.invalidate_dropped(entity_id, AccessKind::Acquire);
        self.emit(ControllerEvent::AcquireStateChanged {
          entity_id,
          state: AcquireState::NotAcquired,
          owner: None,
        });
      }
      AecpCommand::Lock => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| e.access.lock_state = LockState::Locked);
        self.emit(ControllerEvent::LockStateChanged {
          entity_id,
          state: LockState::Locked,
          owner: None,
        });
      }
      AecpCommand::Unlock => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| e.access.lock_state = LockState::NotLocked);
        self.access_registry.invalidate_dropped(entity_id, AccessKind::Lock);
        self.emit(ControllerEvent::LockStateChanged {
          entity_id,
          state: LockState::NotLocked,
          owner: None,
        });
      }
      AecpCommand::SetSamplingRate { audio_unit_index, sampling_rate } => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| {
          e.dynamic.audio_units.entry(audio_unit_index.0).or_default().current_sampling_rate =
            Some(sampling_rate);
        });
        self.emit(ControllerEvent::SamplingRateChanged { entity_id, audio_unit_index });
      }
      AecpCommand::SetClockSource { clock_domain_index, clock_source_index } => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| {
          e.dynamic.clock_domains.entry(clock_domain_index.0).or_default().current_clock_source =
            Some(clock_source_index);
        });
        self.recompute_and_emit_clock_chain(entity_id, clock_domain_index);
        self.emit(ControllerEvent::ClockSourceChanged { entity_id, clock_domain_index, clock_source_index });
      }
      AecpCommand::StartStreamInput { stream_index } => {
        self.set_stream_running(entity_id, true, stream_index, true);
      }
      AecpCommand::StopStreamInput { stream_index } => {
        self.set_stream_running(entity_id, true, stream_index, false);
      }
      AecpCommand::StartStreamOutput { stream_index } => {
        self.set_stream_running(entity_id, false, stream_index, true);
      }
      AecpCommand::StopStreamOutput { stream_index } => {
        self.set_stream_running(entity_id, false, stream_index, false);
      }
      AecpCommand::SetName { target, name } => {
        self.apply_name_change(entity_id, target, name);
      }
      AecpCommand::SetControlValues { control_index, current } => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| {
          e.dynamic.controls.insert(
            control_index.0,
            crate::model::dynamic::ControlValues { current, out_of_bounds: false },
          );
        });
        self.emit(ControllerEvent::ControlValuesChanged { entity_id, control_index });
      }
      AecpCommand::Identify { enable } => {
        if enable {
          self.emit(ControllerEvent::IdentificationStarted { entity_id });
        } else {
          self.emit(ControllerEvent::IdentificationStopped { entity_id });
        }
      }
      AecpCommand::AddAudioMappings { stream_port_index, mappings } => {
        self.apply_audio_mapping_change(entity_id, stream_port_index, |current| current.extend(mappings));
      }
      AecpCommand::RemoveAudioMappings { stream_port_index, mappings } => {
        self.apply_audio_mapping_change(entity_id, stream_port_index, |current| {
          current.retain(|m| !mappings.contains(m));
        });
      }
      _ => {
        // Remaining command kinds (stream format/info queries, memory-object
        // operations, device-memory transfers, counters, max transit time,
        // audio mappings) update dynamic state the same way but carry no
        // compatibility/graph side effects; a real dispatcher applies their
        // decoded payload through the same `handle.with(...)` pattern.
        self.emit(ControllerEvent::EntityUpdate { entity_id });
      }
    }
  }

  /// Applies a decoded `ReadDescriptor` payload, resolves the matching
  /// expectation, and — for the two node kinds `GetStaticModel`'s
  /// breadth-first walk pivots on — issues the next round of child queries
  /// before resolving, so the phase never advances prematurely:
  /// `EntityDescriptor` triggers a fetch of its current configuration's
  /// `ConfigurationDescriptor`, and that descriptor's `descriptor_counts`
  /// in turn trigger one `ReadDescriptor` per remaining child index.
  fn on_descriptor_read(
    &self,
    entity_id: EntityID,
    descriptor_type: DescriptorType,
    descriptor_index: u16,
    node: StaticDescriptor,
  ) {
    let current_configuration = match &node {
      StaticDescriptor::Entity(d) => Some(d.current_configuration),
      _ => None,
    };
    let child_counts = match &node {
      StaticDescriptor::Configuration(d) => Some(d.descriptor_counts.clone()),
      _ => None,
    };

    self.apply_read_descriptor(entity_id, descriptor_type, descriptor_index, node);

    if let Some(configuration_index) = current_configuration {
      self.issue_descriptor_query(entity_id, DescriptorType::Configuration, configuration_index.0);
    }
    if let Some(counts) = child_counts {
      self.issue_child_descriptor_queries(entity_id, &counts);
    }

    let key = ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, descriptor_type, descriptor_index);
    self.resolve(entity_id, key, Ok(()));
  }

  fn on_aecp_unsolicited(&self, entity_id: EntityID, notification: UnsolicitedNotification) {
    let Some(handle) = self.store.find(entity_id) else { return };
    handle.with(|e| e.statistics.aem_unsolicited_count += 1);

    match notification {
      UnsolicitedNotification::EntityNameChanged(name) => {
        handle.with(|e| e.dynamic.entity_name = Some(name.clone()));
        self.emit(ControllerEvent::EntityNameChanged { entity_id, name });
      }
      UnsolicitedNotification::EntityGroupNameChanged(name) => {
        handle.with(|e| e.dynamic.entity_group_name = Some(name.clone()));
        self.emit(ControllerEvent::EntityGroupNameChanged { entity_id, name });
      }
      UnsolicitedNotification::StreamInputStarted { stream_index } => {
        self.set_stream_running(entity_id, true, stream_index, true);
      }
      UnsolicitedNotification::StreamInputStopped { stream_index } => {
        self.set_stream_running(entity_id, true, stream_index, false);
      }
      UnsolicitedNotification::StreamOutputStarted { stream_index } => {
        self.set_stream_running(entity_id, false, stream_index, true);
      }
      UnsolicitedNotification::StreamOutputStopped { stream_index } => {
        self.set_stream_running(entity_id, false, stream_index, false);
      }
      UnsolicitedNotification::SamplingRateChanged { audio_unit_index, sampling_rate } => {
        handle.with(|e| {
          e.dynamic.audio_units.entry(audio_unit_index.0).or_default().current_sampling_rate =
            Some(sampling_rate);
        });
        self.emit(ControllerEvent::SamplingRateChanged { entity_id, audio_unit_index });
      }
      UnsolicitedNotification::ClockSourceChanged { clock_domain_index, clock_source_index } => {
        handle.with(|e| {
          e.dynamic.clock_domains.entry(clock_domain_index.0).or_default().current_clock_source =
            Some(clock_source_index);
        });
        self.recompute_and_emit_clock_chain(entity_id, clock_domain_index);
        self.emit(ControllerEvent::ClockSourceChanged { entity_id, clock_domain_index, clock_source_index });
      }
      UnsolicitedNotification::ControlValuesChanged { control_index, current } => {
        handle.with(|e| {
          e.dynamic.controls.insert(
            control_index.0,
            crate::model::dynamic::ControlValues { current, out_of_bounds: false },
          );
        });
        self.emit(ControllerEvent::ControlValuesChanged { entity_id, control_index });
      }
      UnsolicitedNotification::AcquiredStateChanged { acquired_by } => {
        let state = if acquired_by.is_some() { AcquireState::AcquiredByOther } else { AcquireState::NotAcquired };
        handle.with(|e| {
          e.access.acquire_state = state;
          e.access.acquiring_controller = acquired_by;
        });
        if state == AcquireState::NotAcquired {
          self.access_registry.invalidate_dropped(entity_id, AccessKind::Acquire);
        }
        self.emit(ControllerEvent::AcquireStateChanged { entity_id, state, owner: acquired_by });
      }
      UnsolicitedNotification::LockedStateChanged { locked_by } => {
        let state = if locked_by.is_some() { LockState::LockedByOther } else { LockState::NotLocked };
        handle.with(|e| {
          e.access.lock_state = state;
          e.access.locking_controller = locked_by;
        });
        if state == LockState::NotLocked {
          self.access_registry.invalidate_dropped(entity_id, AccessKind::Lock);
        }
        self.emit(ControllerEvent::LockStateChanged { entity_id, state, owner: locked_by });
      }
      UnsolicitedNotification::NameChanged { target, name } => {
        self.apply_name_change(entity_id, target, name);
      }
      UnsolicitedNotification::StreamPortAudioMappingsChanged { stream_port_index, mappings } => {
        self.apply_audio_mapping_change(entity_id, stream_port_index, |current| *current = mappings);
      }
      _ => {
        self.emit(ControllerEvent::EntityUpdate { entity_id });
      }
    }
  }

  fn on_mvu_response(
    &self,
    entity_id: EntityID,
    _sequence_id: SequenceID,
    command: MvuCommand,
    status: MvuStatus,
  ) {
    if !status.is_success() {
      let action = status.classify();
      let key = match command {
        MvuCommand::GetMilanInfo => ExpectedQueryKey::simple(QueryClass::MilanInfo),
        _ => ExpectedQueryKey::simple(QueryClass::DynamicInfo),
      };
      self.resolve(entity_id, key, Err(action));
      return;
    }

    match command {
      MvuCommand::GetMilanInfo => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| {
          e.milan_info = Some(MilanInfo::default());
          e.compatibility.add_flag(CompatibilityFlag::Milan, Some("4.6.4"));
        });
        self.resolve(entity_id, ExpectedQueryKey::simple(QueryClass::MilanInfo), Ok(()));
      }
      MvuCommand::GetSystemUniqueId => {
        let Some(handle) = self.store.find(entity_id) else { return };
        handle.with(|e| e.milan_dynamic_state.system_unique_id = Some(0));
      }
      _ => {
        self.emit(ControllerEvent::EntityUpdate { entity_id });
      }
    }
  }

  fn on_acmp_response(&self, _sequence_id: SequenceID, command: AcmpCommand, status: AcmpStatus) {
    if !status.is_success() {
      debug!("ACMP command {command:?} failed with {status:?}");
      let action = status.classify();
      for entity_id in acmp_command_entities(&command) {
        self.apply_failure_compatibility_effect(entity_id, action);
      }
      return;
    }
    match command {
      AcmpCommand::ConnectStream { talker, talker_stream, listener, listener_stream } => {
        self.apply_stream_connected(talker, talker_stream, listener, listener_stream, false);
      }
      AcmpCommand::DisconnectStream { talker, talker_stream, listener, listener_stream } => {
        self.apply_stream_disconnected(talker, talker_stream, listener, listener_stream);
      }
      _ => {}
    }
  }

  fn on_acmp_sniffed(&self, event: SniffedAcmpEvent) {
    match event {
      SniffedAcmpEvent::Connected { talker, talker_stream, listener, listener_stream }
      | SniffedAcmpEvent::FastConnect { talker, talker_stream, listener, listener_stream } => {
        self.apply_stream_connected(talker, talker_stream, listener, listener_stream, true);
      }
      SniffedAcmpEvent::Disconnected { talker, talker_stream, listener, listener_stream } => {
        self.apply_stream_disconnected(talker, talker_stream, listener, listener_stream);
      }
    }
  }

  fn on_memory_transfer_progress(&self, entity_id: EntityID, bytes_done: u64, bytes_total: u64) {
    trace!("{entity_id}: memory transfer {bytes_done}/{bytes_total}");
  }
}

impl Dispatcher {
  fn set_stream_running(&self, entity_id: EntityID, is_input: bool, stream_index: StreamIndex, running: bool) {
    let Some(handle) = self.store.find(entity_id) else { return };
    handle.with(|e| {
      e.dynamic.streams.entry((is_input, stream_index.0)).or_default().running = running;
    });
    let event = match (is_input, running) {
      (true, true) => ControllerEvent::StreamInputStarted { entity_id, stream_index },
      (true, false) => ControllerEvent::StreamInputStopped { entity_id, stream_index },
      (false, true) => ControllerEvent::StreamOutputStarted { entity_id, stream_index },
      (false, false) => ControllerEvent::StreamOutputStopped { entity_id, stream_index },
    };
    self.emit(event);
  }

  fn apply_name_change(&self, entity_id: EntityID, target: crate::protocol::interface::NameTarget, name: String) {
    use crate::protocol::interface::NameTarget;
    let Some(handle) = self.store.find(entity_id) else { return };
    match target {
      NameTarget::Entity => {
        handle.with(|e| e.dynamic.entity_name = Some(name.clone()));
        self.emit(ControllerEvent::EntityNameChanged { entity_id, name });
      }
      NameTarget::EntityGroup => {
        handle.with(|e| e.dynamic.entity_group_name = Some(name.clone()));
        self.emit(ControllerEvent::EntityGroupNameChanged { entity_id, name });
      }
      NameTarget::StreamInput(index) => {
        handle.with(|e| e.dynamic.streams.entry((true, index)).or_default().name = Some(name));
        self.emit(ControllerEvent::EntityUpdate { entity_id });
      }
      NameTarget::StreamOutput(index) => {
        handle.with(|e| e.dynamic.streams.entry((false, index)).or_default().name = Some(name));
        self.emit(ControllerEvent::EntityUpdate { entity_id });
      }
      _ => {
        self.emit(ControllerEvent::EntityUpdate { entity_id });
      }
    }
  }

  /// Applies a stream connection to both the listener's per-stream dynamic
  /// state and the shared talker→listeners graph, then checks reciprocity:
  /// every connection the listener reports must appear in the talker's
  /// listener set and vice versa.
  fn apply_stream_connected(
    &self,
    talker: EntityID,
    talker_stream: StreamIndex,
    listener: EntityID,
    listener_stream: StreamIndex,
    changed_by_other: bool,
  ) {
    let info = StreamInputConnectionInfo::Connected { talker, stream: talker_stream };
    if let Some(handle) = self.store.find(listener) {
      handle.with(|e| {
        let state = e.dynamic.streams.entry((true, listener_stream.0)).or_insert_with(StreamDynamicState::default);
        state.connection_info = Some(info);
      });
      self.emit(ControllerEvent::StreamInputConnectionChanged {
        entity_id: listener,
        stream_index: listener_stream,
        info,
        changed_by_other,
      });
    }
    let listeners = {
      let mut graphs = self.graphs.lock().unwrap();
      graphs.stream_connections.connect(talker, talker_stream, listener, listener_stream);
      graphs.stream_connections.listeners_of(talker, talker_stream)
    };
    self.emit(ControllerEvent::StreamOutputConnectionsChanged {
      entity_id: talker,
      stream_index: talker_stream,
      listeners,
    });
  }

  fn apply_stream_disconnected(
    &self,
    talker: EntityID,
    talker_stream: StreamIndex,
    listener: EntityID,
    listener_stream: StreamIndex,
  ) {
    if let Some(handle) = self.store.find(listener) {
      handle.with(|e| {
        if let Some(state) = e.dynamic.streams.get_mut(&(true, listener_stream.0)) {
          state.connection_info = Some(StreamInputConnectionInfo::NotConnected);
        }
      });
      self.emit(ControllerEvent::StreamInputConnectionChanged {
        entity_id: listener,
        stream_index: listener_stream,
        info: StreamInputConnectionInfo::NotConnected,
        changed_by_other: true,
      });
    }
    let listeners = {
      let mut graphs = self.graphs.lock().unwrap();
      graphs.stream_connections.disconnect(talker, talker_stream, listener, listener_stream);
      graphs.stream_connections.listeners_of(talker, talker_stream)
    };
    self.emit(ControllerEvent::StreamOutputConnectionsChanged {
      entity_id: talker,
      stream_index: talker_stream,
      listeners,
    });
  }

  /// Recomputes the media-clock chain rooted at `(entity_id, domain)` and
  /// emits the result. Called whenever a clock
  /// source change could alter any downstream chain.
  fn recompute_and_emit_clock_chain(&self, entity_id: EntityID, clock_domain_index: crate::identifiers::ClockDomainIndex) {
    let chain = clock_chain::compute_chain(&self.store, entity_id, clock_domain_index);
    self.emit(ControllerEvent::MediaClockChainChanged { entity_id, clock_domain_index, chain });
  }

  /// Reconciles a freshly-enumerated entity against every already-advertised
  /// entity, before it becomes visible: late-joiner talker/listener
  /// reciprocity, initial media-clock chains, and the cross-entity latency
  /// check. Called by the
  /// `EnumerationEngine` through `Controller`'s `EnumerationHooks` bridge.
  pub(crate) fn on_pre_advertise(&self, entity_id: EntityID) {
    if let Some(handle) = self.store.find(entity_id) {
      handle.with(|e| {
        let findings = crate::compatibility_validator::validate_post_enumeration(e);
        if !findings.is_empty() {
          debug!("{entity_id}: {} post-enumeration finding(s): {findings:?}", findings.len());
        }
      });
    }
    self.reconcile_late_joiner_stream_connections(entity_id);
    self.compute_and_emit_all_clock_chains(entity_id);
    self.run_latency_check(entity_id);
  }

  pub(crate) fn on_entity_online(&self, entity_id: EntityID) {
    self.emit(ControllerEvent::EntityOnline { entity_id });
  }

  /// ADP carries no "currently identifying" bit today, so there is
  /// nothing to re-raise here yet; kept as the
  /// hook's designated home so adding that bit later doesn't require
  /// touching the engine.
  pub(crate) fn on_post_advertise(&self, _entity_id: EntityID) {}

  pub(crate) fn on_enumeration_aborted(&self, _entity_id: EntityID) {}

  pub(crate) fn on_entity_model_enumerated(&self, entity_id: EntityID) {
    self.emit(ControllerEvent::EntityModelEnumerated { entity_id });
  }

  /// Reconciles this entity's stream connections against every other
  /// already-advertised entity at pre-advertise time: both the case where
  /// this entity is the listener whose cached connection info predates the
  /// shared graph knowing about it, and the case where this entity is the
  /// talker some other already-advertised listener already points at.
  fn reconcile_late_joiner_stream_connections(&self, entity_id: EntityID) {
    let Some(handle) = self.store.find(entity_id) else { return };

    let listener_side: Vec<(StreamIndex, EntityID, StreamIndex)> = handle.with(|e| {
      e.dynamic
        .streams
        .iter()
        .filter_map(|((is_input, idx), state)| {
          if !*is_input {
            return None;
          }
          let (talker, talker_stream) = state.connection_info.and_then(|i| i.connected_to())?;
          Some((StreamIndex(*idx), talker, talker_stream))
        })
        .collect()
    });
    for (listener_stream, talker, talker_stream) in listener_side {
      self.graphs.lock().unwrap().stream_connections.connect(talker, talker_stream, entity_id, listener_stream);
    }

    let mut discovered = Vec::new();
    self.store.iterate(|other_id, other_handle| {
      if other_id == entity_id || !other_handle.with(|e| e.is_advertised()) {
        return;
      }
      other_handle.with(|other| {
        for ((is_input, idx), state) in other.dynamic.streams.iter() {
          if !*is_input {
            continue;
          }
          if let Some((talker, talker_stream)) = state.connection_info.and_then(|i| i.connected_to()) {
            if talker == entity_id {
              discovered.push((talker_stream, other_id, StreamIndex(*idx)));
            }
          }
        }
      });
    });
    for (talker_stream, listener, listener_stream) in discovered {
      self.graphs.lock().unwrap().stream_connections.connect(entity_id, talker_stream, listener, listener_stream);
    }
  }

  fn compute_and_emit_all_clock_chains(&self, entity_id: EntityID) {
    let Some(handle) = self.store.find(entity_id) else { return };
    let domains: Vec<crate::identifiers::ClockDomainIndex> = handle.with(|e| {
      e.model
        .current_configuration()
        .map(|c| c.clock_domains.keys().map(|&i| crate::identifiers::ClockDomainIndex(i)).collect())
        .unwrap_or_default()
    });
    for domain in domains {
      self.recompute_and_emit_clock_chain(entity_id, domain);
    }
  }

  /// Applies an audio-mapping add/remove/replace to a listener's
  /// StreamPortInput and recomputes the channel-connections graph for that
  /// port,
  /// emitting one `ChannelInputConnectionChanged` per affected cluster.
  fn apply_audio_mapping_change(
    &self,
    entity_id: EntityID,
    stream_port_index: crate::identifiers::StreamPortIndex,
    mutate: impl FnOnce(&mut Vec<crate::model::descriptors::AudioMapping>),
  ) {
    let Some(handle) = self.store.find(entity_id) else { return };
    handle.with(|e| {
      let port = e.dynamic.stream_ports.entry((true, stream_port_index.0)).or_default();
      mutate(&mut port.dynamic_mappings);
    });

    let mut graphs = self.graphs.lock().unwrap();
    graphs.channel_connections.recompute_stream_port(&self.store, entity_id, stream_port_index);
    let clusters: Vec<crate::identifiers::ClusterIndex> = graphs
      .channel_connections
      .channel_connections(entity_id, stream_port_index)
      .iter()
      .map(|c| c.listener_cluster)
      .collect();
    drop(graphs);
    for cluster_index in clusters {
      self.emit(ControllerEvent::ChannelInputConnectionChanged {
        entity_id,
        stream_port_index,
        cluster_index,
      });
    }
  }

  /// Cross-entity latency check: flags a listener StreamInput whose reported
  /// `msrpAccumulatedLatency` exceeds its connected talker's
  /// `presentationTimeOffset`.
  fn run_latency_check(&self, entity_id: EntityID) {
    let Some(handle) = self.store.find(entity_id) else { return };
    let mut newly_flagged = Vec::new();
    handle.with(|listener_entity| {
      for ((is_input, idx), state) in listener_entity.dynamic.streams.iter() {
        if !*is_input {
          continue;
        }
        let Some(latency) = state.info_ex.msrp_accumulated_latency_ns else { continue };
        let Some((talker, talker_stream)) = state.connection_info.and_then(|i| i.connected_to()) else {
          continue;
        };
        let Some(talker_handle) = self.store.find(talker) else { continue };
        let offset = talker_handle.with(|t| {
          t.dynamic
            .streams
            .get(&(false, talker_stream.0))
            .and_then(|s| s.info_ex.presentation_time_offset_ns)
        });
        if offset.is_some_and(|offset| latency > offset) {
          newly_flagged.push(StreamIndex(*idx));
        }
      }
      for idx in &newly_flagged {
        listener_entity.diagnostics.stream_input_over_latency.insert(*idx);
      }
    });
    if !newly_flagged.is_empty() {
      self.emit(ControllerEvent::DiagnosticsChanged { entity_id });
    }
  }
}

/// Every entity a failed ACMP command's compatibility consequence (§4.F)
/// applies to — both endpoints for a connect/disconnect, the single named
/// endpoint for a state query.
fn acmp_command_entities(command: &AcmpCommand) -> Vec<EntityID> {
  match *command {
    AcmpCommand::ConnectStream { talker, listener, .. } | AcmpCommand::DisconnectStream { talker, listener, .. } => {
      vec![talker, listener]
    }
    AcmpCommand::DisconnectTalkerStream { talker, .. } => vec![talker],
    AcmpCommand::GetTalkerStreamState { talker, .. } => vec![talker],
    AcmpCommand::GetListenerStreamState { listener, .. } => vec![listener],
    AcmpCommand::GetTalkerStreamConnectionByIndex { talker, .. } => vec![talker],
  }
}

/// Maps a failed `AecpCommand` back to the `ExpectedQueryKey` it would have
/// resolved, for classes the enumeration engine tracks. Commands issued
/// outside enumeration (post-enumeration control operations) have no
/// matching key and are simply dropped from retry tracking.
fn key_for_command(command: &AecpCommand) -> ExpectedQueryKey {
  match command {
    AecpCommand::ReadDescriptor { descriptor_type, descriptor_index } => {
      ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, *descriptor_type, *descriptor_index)
    }
    AecpCommand::GetDynamicInfoProbe => ExpectedQueryKey::simple(QueryClass::CheckPackedDynamicInfo),
    AecpCommand::RegisterUnsolicitedNotifications => ExpectedQueryKey::simple(QueryClass::RegisterUnsolicited),
    _ => ExpectedQueryKey::simple(QueryClass::DynamicInfo),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::identifiers::ClockDomainIndex;
  use crate::model::descriptors::{ConfigurationDescriptor, DescriptorCounts, EntityCapabilities, EntityDescriptor};
  use crate::observer::event_channel;
  use crate::retry::BackoffPolicy;

  #[derive(Default)]
  struct NullProtocol;
  impl ProtocolInterface for NullProtocol {
    fn send_aecp(&self, _e: EntityID, _s: SequenceID, _c: AecpCommand) {}
    fn send_mvu(&self, _e: EntityID, _s: SequenceID, _c: MvuCommand) {}
    fn send_acmp(&self, _s: SequenceID, _c: AcmpCommand) {}
    fn enable_entity_advertising(&self, _d: u32) {}
    fn disable_entity_advertising(&self) {}
    fn discover_entities(&self, _e: Option<EntityID>) {}
    fn is_self_locked(&self) -> bool {
      false
    }
  }

  struct NullHooks;
  impl crate::enumeration::EnumerationHooks for NullHooks {
    fn on_entity_model_enumerated(&self, _e: EntityID) {}
    fn on_pre_advertise(&self, _e: EntityID) {}
    fn on_entity_online(&self, _e: EntityID) {}
    fn on_post_advertise(&self, _e: EntityID) {}
    fn on_enumeration_aborted(&self, _e: EntityID) {}
  }

  fn make_dispatcher() -> (Dispatcher, crate::observer::ControllerEventReceiver) {
    let store = Arc::new(EntityStore::new());
    let protocol: Arc<dyn ProtocolInterface> = Arc::new(NullProtocol::default());
    let engine = Arc::new(EnumerationEngine::new(
      Arc::clone(&protocol),
      Arc::clone(&store),
      Arc::new(NullHooks),
      BackoffPolicy::default(),
      |_, _, _| {},
    ));
    let (tx, rx) = event_channel(32);
    let dispatcher = Dispatcher::new(store, protocol, tx, Arc::new(crate::access_registry::AccessRegistry::new()));
    dispatcher.set_engine(engine);
    (dispatcher, rx)
  }

  fn entity_descriptor(id: EntityID) -> StaticDescriptor {
    StaticDescriptor::Entity(EntityDescriptor {
      entity_id: id,
      entity_model_id: 1,
      entity_capabilities: EntityCapabilities {
        aem_supported: true,
        vendor_unique_supported: false,
        class_a_supported: false,
        class_b_supported: false,
        gptp_supported: false,
        association_id_supported: false,
        association_id_valid: false,
      },
      talker_capabilities: crate::model::descriptors::TalkerCapabilities {
        implemented: false,
        other_source: false,
        control_source: false,
        media_clock_source: false,
        smpte_source: false,
        midi_source: false,
        audio_source: false,
        video_source: false,
      },
      listener_capabilities: crate::model::descriptors::ListenerCapabilities {
        implemented: false,
        other_sink: false,
        control_sink: false,
        media_clock_sink: false,
        smpte_sink: false,
        midi_sink: false,
        audio_sink: false,
        video_sink: false,
      },
      controller_capabilities: crate::model::descriptors::ControllerCapabilities { implemented: false },
      association_id: None,
      configurations_count: 1,
      current_configuration: crate::identifiers::ConfigurationIndex(0),
      identify_control_index: None,
    })
  }

  #[test]
  fn read_descriptor_inserts_entity_and_configuration() {
    let (dispatcher, _rx) = make_dispatcher();
    let id = EntityID(1);
    dispatcher.store.insert(ControlledEntity::new(id, false)).unwrap();
    dispatcher.apply_read_descriptor(id, DescriptorType::Entity, 0, entity_descriptor(id));
    let handle = dispatcher.store.find(id).unwrap();
    assert!(handle.with(|e| e.model.entity.is_some()));
    assert!(handle.with(|e| e.model.configuration(crate::identifiers::ConfigurationIndex(0)).is_some()));
  }

  #[derive(Default)]
  struct RecordingProtocol {
    aecp_sent: Mutex<Vec<AecpCommand>>,
  }
  impl ProtocolInterface for RecordingProtocol {
    fn send_aecp(&self, _e: EntityID, _s: SequenceID, command: AecpCommand) {
      self.aecp_sent.lock().unwrap().push(command);
    }
    fn send_mvu(&self, _e: EntityID, _s: SequenceID, _c: MvuCommand) {}
    fn send_acmp(&self, _s: SequenceID, _c: AcmpCommand) {}
    fn enable_entity_advertising(&self, _d: u32) {}
    fn disable_entity_advertising(&self) {}
    fn discover_entities(&self, _e: Option<EntityID>) {}
    fn is_self_locked(&self) -> bool {
      false
    }
  }

  fn make_dispatcher_with_recording_protocol() -> (Dispatcher, Arc<RecordingProtocol>) {
    let store = Arc::new(EntityStore::new());
    let protocol = Arc::new(RecordingProtocol::default());
    let engine = Arc::new(EnumerationEngine::new(
      Arc::clone(&protocol) as Arc<dyn ProtocolInterface>,
      Arc::clone(&store),
      Arc::new(NullHooks),
      BackoffPolicy::default(),
      |_, _, _| {},
    ));
    let (tx, _rx) = event_channel(32);
    let dispatcher = Dispatcher::new(
      store,
      Arc::clone(&protocol) as Arc<dyn ProtocolInterface>,
      tx,
      Arc::new(crate::access_registry::AccessRegistry::new()),
    );
    dispatcher.set_engine(engine);
    (dispatcher, protocol)
  }

  #[test]
  fn on_descriptor_read_of_entity_issues_configuration_fetch() {
    let (dispatcher, protocol) = make_dispatcher_with_recording_protocol();
    let id = EntityID(30);
    dispatcher.store.insert(ControlledEntity::new(id, false)).unwrap();

    dispatcher.on_descriptor_read(id, DescriptorType::Entity, 0, entity_descriptor(id));

    assert_eq!(
      protocol.aecp_sent.lock().unwrap().as_slice(),
      &[AecpCommand::ReadDescriptor { descriptor_type: DescriptorType::Configuration, descriptor_index: 0 }]
    );
    let handle = dispatcher.store.find(id).unwrap();
    assert!(handle.with(|e| e
      .enumeration
      .expected_queries
      .contains(&ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, DescriptorType::Configuration, 0))));
  }

  #[test]
  fn on_descriptor_read_of_configuration_issues_breadth_first_child_fetch() {
    let (dispatcher, protocol) = make_dispatcher_with_recording_protocol();
    let id = EntityID(31);
    dispatcher.store.insert(ControlledEntity::new(id, false)).unwrap();
    dispatcher.apply_read_descriptor(id, DescriptorType::Entity, 0, entity_descriptor(id));

    let mut descriptor_counts = DescriptorCounts::new();
    descriptor_counts.insert(DescriptorType::StreamOutput, 2);
    let configuration = StaticDescriptor::Configuration(ConfigurationDescriptor {
      index: crate::identifiers::ConfigurationIndex(0),
      descriptor_counts,
      is_active: true,
    });

    dispatcher.on_descriptor_read(id, DescriptorType::Configuration, 0, configuration);

    let sent = protocol.aecp_sent.lock().unwrap();
    assert!(sent.contains(&AecpCommand::ReadDescriptor { descriptor_type: DescriptorType::StreamOutput, descriptor_index: 0 }));
    assert!(sent.contains(&AecpCommand::ReadDescriptor { descriptor_type: DescriptorType::StreamOutput, descriptor_index: 1 }));
    assert!(!sent.iter().any(|c| matches!(c, AecpCommand::ReadDescriptor { descriptor_type: DescriptorType::Configuration, .. })));

    let handle = dispatcher.store.find(id).unwrap();
    assert!(handle.with(|e| !e
      .enumeration
      .expected_queries
      .contains(&ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, DescriptorType::Configuration, 0))));
    assert!(handle.with(|e| e
      .enumeration
      .expected_queries
      .contains(&ExpectedQueryKey::for_descriptor(QueryClass::Descriptor, DescriptorType::StreamOutput, 1))));
  }

  #[test]
  fn set_clock_source_emits_chain_event() {
    let (dispatcher, rx) = make_dispatcher();
    let id = EntityID(2);
    dispatcher.store.insert(ControlledEntity::new(id, false)).unwrap();
    dispatcher.on_aecp_response(
      id,
      1,
      AecpCommand::SetClockSource {
        clock_domain_index: ClockDomainIndex(0),
        clock_source_index: crate::identifiers::ClockSourceIndex(0),
      },
      AemAecpStatus::Success,
    );
    let mut saw_clock_changed = false;
    while let Some(event) = rx.try_recv() {
      if matches!(event, ControllerEvent::ClockSourceChanged { .. }) {
        saw_clock_changed = true;
      }
    }
    assert!(saw_clock_changed);
  }

  #[test]
  fn adp_online_inserts_and_starts_enumeration() {
    let (dispatcher, _rx) = make_dispatcher();
    let id = EntityID(3);
    dispatcher.on_adp_event(AdpEvent::EntityOnline(crate::protocol::interface::AdpEntityInfo {
      entity_id: id,
      entity_model_id: 0,
      entity_capabilities: EntityCapabilities {
        aem_supported: false,
        vendor_unique_supported: false,
        class_a_supported: false,
        class_b_supported: false,
        gptp_supported: false,
        association_id_supported: false,
        association_id_valid: false,
      },
      talker_capabilities: crate::model::descriptors::TalkerCapabilities {
        implemented: false,
        other_source: false,
        control_source: false,
        media_clock_source: false,
        smpte_source: false,
        midi_source: false,
        audio_source: false,
        video_source: false,
      },
      listener_capabilities: crate::model::descriptors::ListenerCapabilities {
        implemented: false,
        other_sink: false,
        control_sink: false,
        media_clock_sink: false,
        smpte_sink: false,
        midi_sink: false,
        audio_sink: false,
        video_sink: false,
      },
      controller_capabilities: crate::model::descriptors::ControllerCapabilities { implemented: false },
      association_id: None,
      association_id_valid: false,
      identify_control_index: None,
      interfaces: Default::default(),
    }));
    assert!(dispatcher.store.contains(id));
    let handle = dispatcher.store.find(id).unwrap();
    assert!(handle.with(|e| e.is_advertised()));
  }

  fn adp_info_with_association(id: EntityID, association_id: Option<u64>, association_id_valid: bool) -> crate::protocol::interface::AdpEntityInfo {
    crate::protocol::interface::AdpEntityInfo {
      entity_id: id,
      entity_model_id: 0,
      entity_capabilities: EntityCapabilities {
        aem_supported: false,
        vendor_unique_supported: false,
        class_a_supported: false,
        class_b_supported: false,
        gptp_supported: false,
        association_id_supported: true,
        association_id_valid,
      },
      talker_capabilities: crate::model::descriptors::TalkerCapabilities {
        implemented: false,
        other_source: false,
        control_source: false,
        media_clock_source: false,
        smpte_source: false,
        midi_source: false,
        audio_source: false,
        video_source: false,
      },
      listener_capabilities: crate::model::descriptors::ListenerCapabilities {
        implemented: false,
        other_sink: false,
        control_sink: false,
        media_clock_sink: false,
        smpte_sink: false,
        midi_sink: false,
        audio_sink: false,
        video_sink: false,
      },
      controller_capabilities: crate::model::descriptors::ControllerCapabilities { implemented: false },
      association_id,
      association_id_valid,
      identify_control_index: None,
      interfaces: Default::default(),
    }
  }

  #[test]
  fn entity_update_ignores_association_id_when_valid_bit_clear() {
    let (dispatcher, _rx) = make_dispatcher();
    let id = EntityID(4);
    dispatcher.on_adp_event(AdpEvent::EntityOnline(adp_info_with_association(id, Some(0xAABB), true)));
    let handle = dispatcher.store.find(id).unwrap();
    assert_eq!(handle.with(|e| e.association_id), Some(0xAABB));

    dispatcher.on_adp_event(AdpEvent::EntityUpdate(adp_info_with_association(id, None, false)));
    assert_eq!(handle.with(|e| e.association_id), Some(0xAABB));

    dispatcher.on_adp_event(AdpEvent::EntityUpdate(adp_info_with_association(id, Some(0xCCDD), true)));
    assert_eq!(handle.with(|e| e.association_id), Some(0xCCDD));
  }

  #[test]
  fn disconnect_clears_listener_connection_info() {
    let (dispatcher, _rx) = make_dispatcher();
    let talker = EntityID(10);
    let listener = EntityID(11);
    dispatcher.store.insert(ControlledEntity::new(listener, false)).unwrap();
    dispatcher.apply_stream_connected(talker, StreamIndex(0), listener, StreamIndex(0), false);
    dispatcher.apply_stream_disconnected(talker, StreamIndex(0), listener, StreamIndex(0));
    let handle = dispatcher.store.find(listener).unwrap();
    let info = handle.with(|e| e.dynamic.streams.get(&(true, 0)).and_then(|s| s.connection_info));
    assert_eq!(info, Some(StreamInputConnectionInfo::NotConnected));
  }

  #[test]
  fn misbehaving_classification_sets_flag_and_emits_when_advertised() {
    let (dispatcher, rx) = make_dispatcher();
    let id = EntityID(20);
    let mut entity = ControlledEntity::new(id, false);
    entity.compatibility.add_flag(CompatibilityFlag::Milan, None);
    entity.compatibility.milan_version = crate::entity::compatibility::MilanVersion::new(1, 3);
    entity.enumeration.advertised = true;
    dispatcher.store.insert(entity).unwrap();

    dispatcher.on_aecp_response(id, 1, AecpCommand::GetStreamInfoEx { is_input: true, stream_index: StreamIndex(0) }, AemAecpStatus::EntityMisbehaving);

    let handle = dispatcher.store.find(id).unwrap();
    assert!(handle.with(|e| e.compatibility.flags.contains(CompatibilityFlag::Misbehaving)));
    assert!(handle.with(|e| !e.compatibility.flags.contains(CompatibilityFlag::Ieee17221)));
    assert!(handle.with(|e| !e.compatibility.flags.contains(CompatibilityFlag::Milan)));
    assert!(handle.with(|e| e.compatibility.milan_version.is_none()));

    let mut saw_compat_changed = false;
    while let Some(event) = rx.try_recv() {
      if matches!(event, ControllerEvent::CompatibilityChanged { entity_id, .. } if entity_id == id) {
        saw_compat_changed = true;
      }
    }
    assert!(saw_compat_changed);
  }

  #[test]
  fn misbehaving_classification_before_advertisement_sets_flag_without_event() {
    let (dispatcher, rx) = make_dispatcher();
    let id = EntityID(21);
    dispatcher.store.insert(ControlledEntity::new(id, false)).unwrap();

    dispatcher.on_aecp_response(id, 1, AecpCommand::GetStreamInfoEx { is_input: true, stream_index: StreamIndex(0) }, AemAecpStatus::EntityMisbehaving);

    let handle = dispatcher.store.find(id).unwrap();
    assert!(handle.with(|e| e.compatibility.flags.contains(CompatibilityFlag::Misbehaving)));

    let mut saw_compat_changed = false;
    while let Some(event) = rx.try_recv() {
      if matches!(event, ControllerEvent::CompatibilityChanged { .. }) {
        saw_compat_changed = true;
      }
    }
    assert!(!saw_compat_changed);
  }

  #[test]
  fn pre_advertise_runs_post_enumeration_structural_validation() {
    let (dispatcher, _rx) = make_dispatcher();
    let id = EntityID(22);
    let mut entity = ControlledEntity::new(id, false);
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    dispatcher.store.insert(entity).unwrap();

    dispatcher.on_pre_advertise(id);

    let handle = dispatcher.store.find(id).unwrap();
    // No Configuration descriptor at all: the post-enumeration pass clears
    // IEEE17221 (finding `NoConfigurationDescriptor`), the same consequence
    // `compatibility_validator::validate_post_enumeration` asserts directly.
    assert!(!handle.with(|e| e.compatibility.flags.contains(CompatibilityFlag::Ieee17221)));
  }
}
