//! The external Protocol Interface. This module defines only the boundary
//! the core needs: a trait the host process implements over its real
//! ADP/AECP/ACMP/MVU socket stack, and the event/command vocabulary that
//! crosses it. Framing, transmission and timers on the wire side belong to
//! the implementor, not to this crate.
//!
//! Continuations are expressed for a language without member-function-
//! callback placeholders: every outgoing
//! command returns immediately, and its result arrives later via the
//! [`ProtocolEventSink`] the core registers with the interface. Both ends
//! run their handlers on the networking executor.

use std::collections::BTreeMap;

use crate::entity::controlled_entity::InterfaceInfo;
use crate::identifiers::{
  AudioUnitIndex, ClockDomainIndex, ClockSourceIndex, ControlIndex, DescriptorType, EntityID,
  MemoryObjectIndex, StreamIndex, StreamPortIndex,
};
use crate::model::descriptors::{
  AudioMapping, ControllerCapabilities, EntityCapabilities, ListenerCapabilities, SamplingRate,
  StaticDescriptor, StreamFormatFlags, TalkerCapabilities,
};
use crate::protocol::status::{AcmpStatus, AemAecpStatus, MvuStatus};

/// A sequence number correlating a sent command with its eventual response;
/// scoped per entity for AECP/MVU, globally for ACMP. The expectation set is
/// keyed by (class, descriptor coordinates, sub-index).
pub type SequenceID = u64;

/// The ADP-derived snapshot delivered on every advertisement.
#[derive(Debug, Clone, PartialEq)]
pub struct AdpEntityInfo {
  pub entity_id: EntityID,
  pub entity_model_id: u64,
  pub entity_capabilities: EntityCapabilities,
  pub talker_capabilities: TalkerCapabilities,
  pub listener_capabilities: ListenerCapabilities,
  pub controller_capabilities: ControllerCapabilities,
  pub association_id: Option<u64>,
  pub association_id_valid: bool,
  pub identify_control_index: Option<ControlIndex>,
  pub interfaces: BTreeMap<u16, InterfaceInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdpEvent {
  EntityOnline(AdpEntityInfo),
  EntityUpdate(AdpEntityInfo),
  EntityOffline(EntityID),
}

/// Target of a SET_NAME-family command, covering every descriptor kind
/// the facade's name setters can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameTarget {
  Entity,
  EntityGroup,
  Configuration(u16),
  AudioUnit(u16),
  StreamInput(u16),
  StreamOutput(u16),
  JackInput(u16),
  JackOutput(u16),
  AvbInterface(u16),
  ClockSource(u16),
  MemoryObject(u16),
  AudioCluster(u16),
  Control(u16),
  ClockDomain(u16),
  Timing(u16),
  PtpInstance(u16),
  PtpPort(u16),
}

/// Memory-object operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryObjectOperation {
  Store,
  StoreAndReboot,
  Read,
  Erase,
  Upload,
}

/// One page of a chunked device-memory transfer, with progress reported
/// through the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChunk {
  pub address: u64,
  pub data: Vec<u8>,
}

/// AECP/AEM commands. Parameters carry only the fields the
/// core needs to issue and match the request; the wire payload shape is the
/// protocol interface's concern.
#[derive(Debug, Clone, PartialEq)]
pub enum AecpCommand {
  ReadDescriptor { descriptor_type: DescriptorType, descriptor_index: u16 },
  GetStreamFormat { is_input: bool, stream_index: StreamIndex },
  SetStreamFormat { is_input: bool, stream_index: StreamIndex, format: StreamFormatFlags },
  GetStreamInfo { is_input: bool, stream_index: StreamIndex },
  SetStreamInfo { is_input: bool, stream_index: StreamIndex },
  GetStreamInfoEx { is_input: bool, stream_index: StreamIndex },
  GetSamplingRate { audio_unit_index: AudioUnitIndex },
  SetSamplingRate { audio_unit_index: AudioUnitIndex, sampling_rate: SamplingRate },
  GetClockSource { clock_domain_index: ClockDomainIndex },
  SetClockSource { clock_domain_index: ClockDomainIndex, clock_source_index: ClockSourceIndex },
  GetCounters { descriptor_type: DescriptorType, descriptor_index: u16 },
  GetMemoryObjectLength { memory_object_index: MemoryObjectIndex },
  SetMemoryObjectLength { memory_object_index: MemoryObjectIndex, length: u64 },
  GetMaxTransitTime { stream_index: StreamIndex },
  GetAudioMap { stream_port_index: StreamPortIndex, map_sub_index: u16 },
  AddAudioMappings { stream_port_index: StreamPortIndex, mappings: Vec<AudioMapping> },
  RemoveAudioMappings { stream_port_index: StreamPortIndex, mappings: Vec<AudioMapping> },
  GetDynamicInfoProbe,
  GetDynamicInfoPacked { packet_id: u16, requests: Vec<AecpCommand> },
  RegisterUnsolicitedNotifications,
  UnregisterUnsolicitedNotifications,
  Acquire { persistent: bool },
  Release,
  Lock,
  Unlock,
  Identify { enable: bool },
  SetName { target: NameTarget, name: String },
  SetAssociationID { association_id: u64 },
  SetConfiguration { configuration_index: u16 },
  SetControlValues { control_index: ControlIndex, current: i64 },
  StartStreamInput { stream_index: StreamIndex },
  StopStreamInput { stream_index: StreamIndex },
  StartStreamOutput { stream_index: StreamIndex },
  StopStreamOutput { stream_index: StreamIndex },
  Reboot { to_firmware: bool },
  MemoryObjectOperation { memory_object_index: MemoryObjectIndex, operation: MemoryObjectOperation },
  AbortOperation { memory_object_index: MemoryObjectIndex, operation_id: crate::identifiers::OperationID },
  ReadDeviceMemory { address: u64, length: u32 },
  WriteDeviceMemory { chunk: MemoryChunk },
}

/// MVU (vendor-unique, Milan) commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvuCommand {
  GetMilanInfo,
  GetSystemUniqueId,
  GetMediaClockReferenceInfo { clock_domain_index: ClockDomainIndex },
  GetStreamInfoMilan { is_input: bool, stream_index: StreamIndex },
}

/// ACMP commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmpCommand {
  ConnectStream { talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex },
  DisconnectStream { talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex },
  DisconnectTalkerStream { talker: EntityID, talker_stream: StreamIndex },
  GetTalkerStreamState { talker: EntityID, talker_stream: StreamIndex },
  GetListenerStreamState { listener: EntityID, listener_stream: StreamIndex },
  GetTalkerStreamConnectionByIndex { talker: EntityID, talker_stream: StreamIndex, connection_index: u16 },
}

/// Sniffed (observer-mode) ACMP traffic — connections other controllers
/// establish, relevant to stream-connection reciprocity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SniffedAcmpEvent {
  Connected { talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex },
  Disconnected { talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex },
  FastConnect { talker: EntityID, talker_stream: StreamIndex, listener: EntityID, listener_stream: StreamIndex },
}

/// Unsolicited notifications: one variant per observable AEM
/// command plus the Milan MVU extras. Order with respect to outstanding
/// commands is not guaranteed.
#[derive(Debug, Clone, PartialEq)]
pub enum UnsolicitedNotification {
  EntityNameChanged(String),
  EntityGroupNameChanged(String),
  ConfigurationChanged { configuration_index: u16 },
  StreamFormatChanged { is_input: bool, stream_index: StreamIndex, format: StreamFormatFlags },
  StreamInfoChanged { is_input: bool, stream_index: StreamIndex },
  NameChanged { target: NameTarget, name: String },
  AssociationIDChanged { association_id: Option<u64> },
  SamplingRateChanged { audio_unit_index: AudioUnitIndex, sampling_rate: SamplingRate },
  ClockSourceChanged { clock_domain_index: ClockDomainIndex, clock_source_index: ClockSourceIndex },
  ControlValuesChanged { control_index: ControlIndex, current: i64 },
  StreamPortAudioMappingsChanged { stream_port_index: StreamPortIndex, mappings: Vec<AudioMapping> },
  MemoryObjectLengthChanged { memory_object_index: MemoryObjectIndex, length: u64 },
  StreamInputStarted { stream_index: StreamIndex },
  StreamInputStopped { stream_index: StreamIndex },
  StreamOutputStarted { stream_index: StreamIndex },
  StreamOutputStopped { stream_index: StreamIndex },
  AcquiredStateChanged { acquired_by: Option<EntityID> },
  LockedStateChanged { locked_by: Option<EntityID> },
  MediaClockReferenceInfoChanged { clock_domain_index: ClockDomainIndex },
}

/// Everything the core registers to receive from the Protocol Interface.
/// Implemented by the core's dispatcher; every outgoing command above
/// completes by calling back into exactly one of these methods, always on
/// the networking executor.
pub trait ProtocolEventSink: Send + Sync {
  fn on_adp_event(&self, event: AdpEvent);
  fn on_aecp_response(
    &self,
    entity_id: EntityID,
    sequence_id: SequenceID,
    command: AecpCommand,
    status: AemAecpStatus,
  );
  /// Delivers a decoded descriptor payload for a successful `ReadDescriptor`
  /// response. The implementor decodes the wire payload and calls this
  /// instead of `on_aecp_response` whenever the status is a success, so the
  /// model can actually be populated (the plain `AemAecpStatus`-only path
  /// above still covers failures and commands with no decoded payload).
  /// Driving the breadth-first child-descriptor fetch of `GetStaticModel`
  /// (§4.C) requires this: the engine cannot issue a configuration's child
  /// descriptor queries until it has seen that configuration's descriptor
  /// counts.
  fn on_descriptor_read(
    &self,
    entity_id: EntityID,
    descriptor_type: DescriptorType,
    descriptor_index: u16,
    node: StaticDescriptor,
  );
  fn on_aecp_unsolicited(&self, entity_id: EntityID, notification: UnsolicitedNotification);
  fn on_mvu_response(
    &self,
    entity_id: EntityID,
    sequence_id: SequenceID,
    command: MvuCommand,
    status: MvuStatus,
  );
  fn on_acmp_response(&self, sequence_id: SequenceID, command: AcmpCommand, status: AcmpStatus);
  fn on_acmp_sniffed(&self, event: SniffedAcmpEvent);
  fn on_memory_transfer_progress(&self, entity_id: EntityID, bytes_done: u64, bytes_total: u64);
}

/// The external collaborator itself. A concrete implementation binds
/// to a real AVB network interface; tests use an in-memory fake (see
/// `tests/common`).
pub trait ProtocolInterface: Send + Sync {
  fn send_aecp(&self, entity_id: EntityID, sequence_id: SequenceID, command: AecpCommand);
  fn send_mvu(&self, entity_id: EntityID, sequence_id: SequenceID, command: MvuCommand);
  fn send_acmp(&self, sequence_id: SequenceID, command: AcmpCommand);

  /// Enables/disables advertising this controller's own entity.
  fn enable_entity_advertising(&self, available_duration_secs: u32);
  fn disable_entity_advertising(&self);

  /// Requests an ADP discovery message.
  fn discover_entities(&self, entity_id: Option<EntityID>);

  /// True while this thread already holds a lock the dispatcher would need
  /// to re-acquire (Design Notes: "`isSelfLocked()` accessor used in
  /// assertions").
  fn is_self_locked(&self) -> bool;
}
