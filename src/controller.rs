//! The Controller Facade: the single type a
//! host application constructs and drives. Wires the Entity Store, the
//! Dispatcher, the Enumeration Engine and the networking executor together,
//! then exposes every client-facing operation as a thin method that either
//! issues a command through the `ProtocolInterface` or reads/mutates shared
//! state directly.
//!
//! Construction resolves a circular dependency with `Dispatcher`'s
//! `OnceLock`: the engine needs hooks that call back into the
//! dispatcher, and the dispatcher needs the engine to hand classified
//! outcomes to, so the dispatcher is built first with an empty engine slot
//! and wired up immediately after.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::access_registry::{AccessKind, AccessRegistry, ExclusiveAccessHandle};
use crate::config::ControllerConfig;
use crate::dispatcher::Dispatcher;
use crate::entity::{ControlledEntity, ControlledEntityHandle};
use crate::enumeration::{EnumerationEngine, EnumerationHooks};
use crate::error::{AccessError, SnapshotError};
use crate::executor::NetworkingExecutor;
use crate::identifiers::{
  AudioUnitIndex, ClockDomainIndex, ClockSourceIndex, ControlIndex, EntityID, MemoryObjectIndex,
  OperationID, StreamIndex, StreamPortIndex,
};
use crate::model::descriptors::{AudioMapping, SamplingRate, StreamFormatFlags};
use crate::observer::{
  event_channel, ControllerEvent, ControllerEventReceiver, ControllerEventStream, ControllerObserver,
};
use crate::protocol::interface::{
  AcmpCommand, AecpCommand, MemoryChunk, MemoryObjectOperation, MvuCommand, NameTarget, ProtocolInterface,
};
use crate::snapshot;
use crate::store::EntityStore;

/// Delegates the five `EnumerationEngine` callbacks back into the
/// `Dispatcher`'s own hook methods. A thin bridge rather
/// than having `Dispatcher` implement `EnumerationHooks` directly, so the
/// engine's dependency stays on the narrow trait instead of the concrete
/// dispatcher type.
struct ControllerHooks {
  dispatcher: Arc<Dispatcher>,
}

impl EnumerationHooks for ControllerHooks {
  fn on_entity_model_enumerated(&self, entity_id: EntityID) {
    self.dispatcher.on_entity_model_enumerated(entity_id);
  }

  fn on_pre_advertise(&self, entity_id: EntityID) {
    self.dispatcher.on_pre_advertise(entity_id);
  }

  fn on_entity_online(&self, entity_id: EntityID) {
    self.dispatcher.on_entity_online(entity_id);
  }

  fn on_post_advertise(&self, entity_id: EntityID) {
    self.dispatcher.on_post_advertise(entity_id);
  }

  fn on_enumeration_aborted(&self, entity_id: EntityID) {
    self.dispatcher.on_enumeration_aborted(entity_id);
  }
}

/// The host-facing entry point. Owns every other component and hands
/// out cheap, clonable read access (`ControlledEntityHandle`) or per-call
/// locked access to the entities it tracks.
pub struct Controller {
  config: ControllerConfig,
  store: Arc<EntityStore>,
  protocol: Arc<dyn ProtocolInterface>,
  dispatcher: Arc<Dispatcher>,
  #[allow(dead_code)]
  engine: Arc<EnumerationEngine>,
  executor: Arc<Mutex<NetworkingExecutor>>,
  access_registry: Arc<AccessRegistry>,
  events: ControllerEventReceiver,
  next_sequence: AtomicU64,
}

impl Controller {
  /// Builds every component and starts the networking executor thread.
  /// `protocol` is the host's own ADP/AECP/ACMP/MVU transport; registering
  /// the dispatcher with it is left to the caller, since the
  /// `ProtocolInterface` trait only describes the outgoing half — a real
  /// deployment passes `Arc::clone(&controller.dispatcher_sink())` into its
  /// transport's sink registration after construction.
  pub fn new(config: ControllerConfig, protocol: Arc<dyn ProtocolInterface>) -> io::Result<Self> {
    let store = Arc::new(EntityStore::new());
    let access_registry = Arc::new(AccessRegistry::new());
    let (events_tx, events_rx) = event_channel(256);

    let dispatcher = Arc::new(Dispatcher::new(
      Arc::clone(&store),
      Arc::clone(&protocol),
      events_tx,
      Arc::clone(&access_registry),
    ));

    let executor = Arc::new(Mutex::new(NetworkingExecutor::start("avdecc-controller-net")?));

    let hooks: Arc<dyn EnumerationHooks> = Arc::new(ControllerHooks { dispatcher: Arc::clone(&dispatcher) });
    let executor_for_retry = Arc::clone(&executor);
    let engine = Arc::new(EnumerationEngine::new(
      Arc::clone(&protocol),
      Arc::clone(&store),
      hooks,
      config.backoff,
      move |entity_id, delay, job| {
        executor_for_retry.lock().spawn_delayed(delay, Some(entity_id), move || job());
      },
    ));
    dispatcher.set_engine(Arc::clone(&engine));

    Ok(Self {
      config,
      store,
      protocol,
      dispatcher,
      engine,
      executor,
      access_registry,
      events: events_rx,
      next_sequence: AtomicU64::new(1),
    })
  }

  pub fn config(&self) -> &ControllerConfig {
    &self.config
  }

  /// The `ProtocolEventSink` the host's transport must be wired to so
  /// responses and unsolicited traffic reach this controller.
  pub fn dispatcher_sink(&self) -> Arc<Dispatcher> {
    Arc::clone(&self.dispatcher)
  }

  fn next_sequence(&self) -> u64 {
    self.next_sequence.fetch_add(1, Ordering::Relaxed)
  }

  // ---- Entity access ----------------------------------------

  pub fn entity_ids(&self) -> Vec<EntityID> {
    self.store.all_ids()
  }

  pub fn controlled_entity(&self, entity_id: EntityID) -> Option<ControlledEntityHandle> {
    self.store.find(entity_id)
  }

  /// Runs `f` with the entity's lock held for the closure's duration, the
  /// Rust-idiomatic replacement for a returned scoped guard: a guard
  /// tied to a temporary handle can't outlive this call, so callers get a
  /// closure instead of a `ControlledEntityRef`.
  pub fn with_entity<R>(&self, entity_id: EntityID, f: impl FnOnce(&mut ControlledEntity) -> R) -> Option<R> {
    self.store.find(entity_id).map(|handle| handle.with(f))
  }

  /// Asserts this thread holds no entity locks before running `f`. A lock
  /// held by an ancestor stack frame
  /// cannot be dropped out from under it, so callers instead structure their
  /// code so no guard is held across a blocking cross-thread wait, and this
  /// assertion catches the mistake if one slips through.
  pub fn with_all_locks_released<R>(&self, f: impl FnOnce() -> R) -> R {
    assert_eq!(
      crate::entity::guard::held_entity_lock_count(),
      0,
      "with_all_locks_released called while this thread still holds an entity lock"
    );
    f()
  }

  // ---- Observer / event surface -----------------------------------

  pub fn try_recv_event(&self) -> Option<ControllerEvent> {
    self.events.try_recv()
  }

  pub fn event_stream(&self) -> ControllerEventStream<'_> {
    self.events.as_stream()
  }

  /// Drains every currently-queued event into `observer.on_event`, returning
  /// how many were delivered. A pull-based adapter bridging the channel-based
  /// event surface to the callback-style `ControllerObserver` trait, without
  /// introducing a separate multi-subscriber broadcast mechanism.
  pub fn dispatch_to_observer(&self, observer: &dyn ControllerObserver) -> usize {
    let mut delivered = 0;
    while let Some(event) = self.try_recv_event() {
      observer.on_event(&event);
      delivered += 1;
    }
    delivered
  }

  // ---- Discovery / advertising ------------------------------------

  pub fn enable_advertising(&self, available_duration_secs: u32) {
    self.protocol.enable_entity_advertising(available_duration_secs);
  }

  pub fn disable_advertising(&self) {
    self.protocol.disable_entity_advertising();
  }

  pub fn discover_all(&self) {
    self.protocol.discover_entities(None);
  }

  pub fn discover_one(&self, entity_id: EntityID) {
    self.protocol.discover_entities(Some(entity_id));
  }

  // ---- Exclusive access -------------------------------------

  /// Issues an Acquire/PersistentAcquire/Lock command and mints the
  /// corresponding token up front. The token only becomes meaningful once
  /// the dispatcher observes the matching success response; until then
  /// `ExclusiveAccessHandle::is_valid` simply reflects "not yet invalidated"
  /// rather than "confirmed granted" — callers should wait for the
  /// corresponding `AcquireStateChanged`/`LockStateChanged` event: access
  /// state changes are always observed through the event stream, never
  /// inferred from the command return alone.
  pub fn request_exclusive_access(
    &self,
    entity_id: EntityID,
    kind: AccessKind,
    persistent: bool,
  ) -> Result<ExclusiveAccessHandle, AccessError> {
    if !self.store.contains(entity_id) {
      return Err(AccessError::UnknownEntity(entity_id.to_string()));
    }
    let command = match kind {
      AccessKind::Acquire => AecpCommand::Acquire { persistent },
      AccessKind::Lock => AecpCommand::Lock,
    };
    self.protocol.send_aecp(entity_id, self.next_sequence(), command);
    Ok(ExclusiveAccessHandle::new(Arc::clone(&self.access_registry), entity_id, kind))
  }

  pub fn release_exclusive_access(&self, handle: &ExclusiveAccessHandle) -> Result<(), AccessError> {
    let command = match handle.kind {
      AccessKind::Acquire => AecpCommand::Release,
      AccessKind::Lock => AecpCommand::Unlock,
    };
    self.protocol.send_aecp(handle.entity_id, self.next_sequence(), command);
    handle.release()
  }

  // ---- Configuration / stream format / naming ---------------------

  pub fn set_configuration(&self, entity_id: EntityID, configuration_index: u16) {
    self.send_aecp(entity_id, AecpCommand::SetConfiguration { configuration_index });
  }

  pub fn set_stream_format(&self, entity_id: EntityID, is_input: bool, stream_index: StreamIndex, format: StreamFormatFlags) {
    self.send_aecp(entity_id, AecpCommand::SetStreamFormat { is_input, stream_index, format });
  }

  pub fn set_name(&self, entity_id: EntityID, target: NameTarget, name: impl Into<String>) {
    self.send_aecp(entity_id, AecpCommand::SetName { target, name: name.into() });
  }

  pub fn set_entity_name(&self, entity_id: EntityID, name: impl Into<String>) {
    self.set_name(entity_id, NameTarget::Entity, name);
  }

  pub fn set_entity_group_name(&self, entity_id: EntityID, name: impl Into<String>) {
    self.set_name(entity_id, NameTarget::EntityGroup, name);
  }

  pub fn set_association_id(&self, entity_id: EntityID, association_id: u64) {
    self.send_aecp(entity_id, AecpCommand::SetAssociationID { association_id });
  }

  pub fn set_sampling_rate(&self, entity_id: EntityID, audio_unit_index: AudioUnitIndex, sampling_rate: SamplingRate) {
    self.send_aecp(entity_id, AecpCommand::SetSamplingRate { audio_unit_index, sampling_rate });
  }

  pub fn set_clock_source(&self, entity_id: EntityID, clock_domain_index: ClockDomainIndex, clock_source_index: ClockSourceIndex) {
    self.send_aecp(entity_id, AecpCommand::SetClockSource { clock_domain_index, clock_source_index });
  }

  pub fn set_control_values(&self, entity_id: EntityID, control_index: ControlIndex, current: i64) {
    self.send_aecp(entity_id, AecpCommand::SetControlValues { control_index, current });
  }

  // ---- Streaming --------------------------------------------------

  pub fn start_stream_input(&self, entity_id: EntityID, stream_index: StreamIndex) {
    self.send_aecp(entity_id, AecpCommand::StartStreamInput { stream_index });
  }

  pub fn stop_stream_input(&self, entity_id: EntityID, stream_index: StreamIndex) {
    self.send_aecp(entity_id, AecpCommand::StopStreamInput { stream_index });
  }

  pub fn start_stream_output(&self, entity_id: EntityID, stream_index: StreamIndex) {
    self.send_aecp(entity_id, AecpCommand::StartStreamOutput { stream_index });
  }

  pub fn stop_stream_output(&self, entity_id: EntityID, stream_index: StreamIndex) {
    self.send_aecp(entity_id, AecpCommand::StopStreamOutput { stream_index });
  }

  pub fn add_audio_mappings(&self, entity_id: EntityID, stream_port_index: StreamPortIndex, mappings: Vec<AudioMapping>) {
    self.send_aecp(entity_id, AecpCommand::AddAudioMappings { stream_port_index, mappings });
  }

  pub fn remove_audio_mappings(&self, entity_id: EntityID, stream_port_index: StreamPortIndex, mappings: Vec<AudioMapping>) {
    self.send_aecp(entity_id, AecpCommand::RemoveAudioMappings { stream_port_index, mappings });
  }

  pub fn identify(&self, entity_id: EntityID, enable: bool) {
    self.send_aecp(entity_id, AecpCommand::Identify { enable });
  }

  pub fn reboot(&self, entity_id: EntityID, to_firmware: bool) {
    self.send_aecp(entity_id, AecpCommand::Reboot { to_firmware });
  }

  // ---- Memory-object operations --

  pub fn memory_object_operation(&self, entity_id: EntityID, memory_object_index: MemoryObjectIndex, operation: MemoryObjectOperation) {
    self.send_aecp(entity_id, AecpCommand::MemoryObjectOperation { memory_object_index, operation });
  }

  pub fn abort_operation(&self, entity_id: EntityID, memory_object_index: MemoryObjectIndex, operation_id: OperationID) {
    self.send_aecp(entity_id, AecpCommand::AbortOperation { memory_object_index, operation_id });
  }

  /// Requests one chunk of device memory. Progress across a multi-chunk
  /// transfer reaches the caller through `ProtocolEventSink::on_memory_transfer_progress`,
  /// not a return value here: the transfer itself is driven by the
  /// protocol interface implementor one chunk at a time.
  pub fn read_device_memory(&self, entity_id: EntityID, address: u64, length: u32) {
    self.send_aecp(entity_id, AecpCommand::ReadDeviceMemory { address, length });
  }

  pub fn write_device_memory(&self, entity_id: EntityID, chunk: MemoryChunk) {
    self.send_aecp(entity_id, AecpCommand::WriteDeviceMemory { chunk });
  }

  // ---- ACMP --------------------------------------------------------

  pub fn connect_stream(&self, talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex) {
    self.send_acmp(AcmpCommand::ConnectStream { talker, talker_stream, listener, listener_stream });
  }

  pub fn disconnect_stream(&self, talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex) {
    self.send_acmp(AcmpCommand::DisconnectStream { talker, talker_stream, listener, listener_stream });
  }

  pub fn disconnect_talker_stream(&self, talker: EntityID, talker_stream: StreamIndex) {
    self.send_acmp(AcmpCommand::DisconnectTalkerStream { talker, talker_stream });
  }

  pub fn get_listener_stream_state(&self, listener: EntityID, listener_stream: StreamIndex) {
    self.send_acmp(AcmpCommand::GetListenerStreamState { listener, listener_stream });
  }

  // ---- Milan / MVU -------------------------------------------------

  pub fn get_milan_info(&self, entity_id: EntityID) {
    self.send_mvu(entity_id, MvuCommand::GetMilanInfo);
  }

  // ---- Snapshot convenience ----------------------------------

  pub fn save_entity_snapshot_json(&self, entity_id: EntityID) -> Option<Result<String, SnapshotError>> {
    self.controlled_entity(entity_id).map(|handle| snapshot::serialize_entity_json(&handle.lock().borrow()))
  }

  pub fn load_entity_snapshot_json(&self, data: &str) -> Result<ControlledEntityHandle, SnapshotError> {
    let entity = snapshot::deserialize_entity_json(data)?;
    self
      .store
      .insert(entity)
      .map_err(|crate::store::StoreError::AlreadyPresent(id)| SnapshotError::duplicate_entity_id(format!("{id}")))
  }

  pub fn save_fleet_snapshot_json(&self) -> Result<String, SnapshotError> {
    snapshot::serialize_fleet_json(&self.store)
  }

  pub fn load_fleet_snapshot_json(&self, data: &str, continue_on_error: bool) -> Result<usize, SnapshotError> {
    snapshot::load_fleet_json(data, &self.store, continue_on_error)
  }

  // ---- Internal send helpers ----------------------------------------------

  fn send_aecp(&self, entity_id: EntityID, command: AecpCommand) {
    self.protocol.send_aecp(entity_id, self.next_sequence(), command);
  }

  fn send_mvu(&self, entity_id: EntityID, command: MvuCommand) {
    self.protocol.send_mvu(entity_id, self.next_sequence(), command);
  }

  fn send_acmp(&self, command: AcmpCommand) {
    self.protocol.send_acmp(self.next_sequence(), command);
  }
}

impl Drop for Controller {
  fn drop(&mut self) {
    self.executor.lock().shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Mutex as StdMutex;

  use crate::protocol::interface::{AdpEntityInfo, AdpEvent, ProtocolEventSink, SequenceID};
  use crate::protocol::status::AemAecpStatus;

  #[derive(Default)]
  struct RecordingProtocol {
    aecp_sent: StdMutex<Vec<AecpCommand>>,
  }

  impl ProtocolInterface for RecordingProtocol {
    fn send_aecp(&self, _entity_id: EntityID, _sequence_id: SequenceID, command: AecpCommand) {
      self.aecp_sent.lock().unwrap().push(command);
    }
    fn send_mvu(&self, _entity_id: EntityID, _sequence_id: SequenceID, _command: MvuCommand) {}
    fn send_acmp(&self, _sequence_id: SequenceID, _command: AcmpCommand) {}
    fn enable_entity_advertising(&self, _available_duration_secs: u32) {}
    fn disable_entity_advertising(&self) {}
    fn discover_entities(&self, _entity_id: Option<EntityID>) {}
    fn is_self_locked(&self) -> bool {
      false
    }
  }

  fn minimal_adp_info(id: EntityID) -> AdpEntityInfo {
    AdpEntityInfo {
      entity_id: id,
      entity_model_id: 0,
      entity_capabilities: crate::model::descriptors::EntityCapabilities {
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
    }
  }

  #[test]
  fn new_entity_online_is_visible_through_the_facade() {
    let protocol: Arc<dyn ProtocolInterface> = Arc::new(RecordingProtocol::default());
    let controller = Controller::new(ControllerConfig::default(), protocol).unwrap();
    let id = EntityID(42);
    controller.dispatcher_sink().on_adp_event(AdpEvent::EntityOnline(minimal_adp_info(id)));
    assert!(controller.entity_ids().contains(&id));
    assert!(controller.with_entity(id, |e| e.is_advertised()).unwrap());
  }

  #[test]
  fn acquire_then_release_round_trips_through_the_registry() {
    let protocol: Arc<dyn ProtocolInterface> = Arc::new(RecordingProtocol::default());
    let controller = Controller::new(ControllerConfig::default(), Arc::clone(&protocol)).unwrap();
    let id = EntityID(7);
    controller.dispatcher_sink().on_adp_event(AdpEvent::EntityOnline(minimal_adp_info(id)));

    let handle = controller.request_exclusive_access(id, AccessKind::Acquire, false).unwrap();
    assert!(handle.is_valid());
    controller
      .dispatcher_sink()
      .on_aecp_response(id, 1, AecpCommand::Acquire { persistent: false }, AemAecpStatus::Success);
    controller.release_exclusive_access(&handle).unwrap();
    assert!(!handle.is_valid());
  }

  #[test]
  fn unknown_entity_access_request_is_rejected() {
    let protocol: Arc<dyn ProtocolInterface> = Arc::new(RecordingProtocol::default());
    let controller = Controller::new(ControllerConfig::default(), protocol).unwrap();
    let err = controller.request_exclusive_access(EntityID(99), AccessKind::Lock, false).unwrap_err();
    assert_eq!(err, AccessError::UnknownEntity(EntityID(99).to_string()));
  }

  #[test]
  fn dispatch_to_observer_drains_queued_events() {
    let protocol: Arc<dyn ProtocolInterface> = Arc::new(RecordingProtocol::default());
    let controller = Controller::new(ControllerConfig::default(), protocol).unwrap();
    let id = EntityID(5);
    controller.dispatcher_sink().on_adp_event(AdpEvent::EntityOnline(minimal_adp_info(id)));

    struct CountingObserver(StdMutex<usize>);
    impl ControllerObserver for CountingObserver {
      fn on_event(&self, _event: &ControllerEvent) {
        *self.0.lock().unwrap() += 1;
      }
    }
    let observer = CountingObserver(StdMutex::new(0));
    let delivered = controller.dispatch_to_observer(&observer);
    assert!(delivered > 0);
    assert_eq!(*observer.0.lock().unwrap(), delivered);
  }
}
