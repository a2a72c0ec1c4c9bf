//! Dynamic (mutable) per-descriptor state.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::identifiers::{ClockSourceIndex, EntityID, StreamIndex};
use crate::model::descriptors::SamplingRate;

/// Connection state of a listener StreamInput.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamInputConnectionInfo {
  NotConnected,
  FastConnecting { talker: EntityID, stream: StreamIndex },
  Connected { talker: EntityID, stream: StreamIndex },
}

impl StreamInputConnectionInfo {
  pub fn connected_to(&self) -> Option<(EntityID, StreamIndex)> {
    match self {
      StreamInputConnectionInfo::Connected { talker, stream } => Some((*talker, *stream)),
      _ => None,
    }
  }
}

/// Milan GET_STREAM_INFO extended fields, present from Milan 1.0 onward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfoEx {
  pub msrp_accumulated_latency_ns: Option<u64>,
  pub presentation_time_offset_ns: Option<u64>,
  pub media_clock_reference_priority: Option<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCounters {
  pub media_locked: u32,
  pub media_unlocked: u32,
  pub stream_start: u32,
  pub stream_stop: u32,
  pub media_reset: u32,
  pub timestamp_uncertain: u32,
  pub timestamp_valid: u32,
  pub timestamp_not_valid: u32,
  pub unsupported_format: u32,
  pub late_timestamp: u32,
  pub early_timestamp: u32,
  pub frames_rx: u32,
  pub frames_tx: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvbInterfaceCounters {
  pub link_up: u32,
  pub link_down: u32,
  pub frames_rx: u32,
  pub frames_tx: u32,
  pub rx_crc_error: u32,
  pub gptp_gm_changed: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomainCounters {
  pub locked: u32,
  pub unlocked: u32,
}

/// Per-ClockDomain current active source, AVB grandmaster path and gPTP
/// linkage used by the clock-chain walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomainDynamicState {
  pub current_clock_source: Option<ClockSourceIndex>,
  pub counters: ClockDomainCounters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
  pub up: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvbInfo {
  pub gptp_grandmaster_id: Option<u64>,
  pub gptp_domain_number: u8,
  pub propagation_delay_ns: u32,
  pub msrp_mappings: Vec<u8>,
  pub as_capable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsPath {
  pub sequence: Vec<EntityID>,
}

/// Current (dynamic) control value; kept separate from the static min/max.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlValues {
  pub current: i64,
  pub out_of_bounds: bool,
}

/// Dynamic state held per-StreamInput/Output, keyed alongside its static
/// StreamDescriptor by the same index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDynamicState {
  pub name: Option<String>,
  pub current_format: Option<crate::model::descriptors::StreamFormatFlags>,
  pub connection_info: Option<StreamInputConnectionInfo>,
  pub info_ex: StreamInfoEx,
  pub counters: StreamCounters,
  pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioUnitDynamicState {
  pub name: Option<String>,
  pub current_sampling_rate: Option<SamplingRate>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvbInterfaceDynamicState {
  pub name: Option<String>,
  pub link_status: Option<LinkStatus>,
  pub avb_info: AvbInfo,
  pub as_path: AsPath,
  pub counters: AvbInterfaceCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryObjectDynamicState {
  pub name: Option<String>,
  pub length: Option<u64>,
}

/// Either a static `AudioMapDescriptor` (fixed mapping) or dynamic mappings
/// fetched via GET_DYNAMIC_INFO / ADD/REMOVE_STREAM_PORT_MAPPINGS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPortDynamicState {
  pub name: Option<String>,
  pub dynamic_mappings: Vec<crate::model::descriptors::AudioMapping>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericNamedDynamicState {
  pub name: Option<String>,
}

/// Per-entity dynamic bundle, gathering every descriptor kind's mutable
/// fields keyed by its own index map, plus the per-entity (not per-
/// descriptor) fields fetched in Phase 7 GetDynamicInfo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicModel {
  pub entity_name: Option<String>,
  pub entity_group_name: Option<String>,
  pub association_id: Option<u64>,

  pub audio_units: BTreeMap<u16, AudioUnitDynamicState>,
  pub streams: BTreeMap<(bool, u16), StreamDynamicState>,
  pub jacks: BTreeMap<(bool, u16), GenericNamedDynamicState>,
  pub avb_interfaces: BTreeMap<u16, AvbInterfaceDynamicState>,
  pub clock_sources: BTreeMap<u16, GenericNamedDynamicState>,
  pub memory_objects: BTreeMap<u16, MemoryObjectDynamicState>,
  pub stream_ports: BTreeMap<(bool, u16), StreamPortDynamicState>,
  pub audio_clusters: BTreeMap<u16, GenericNamedDynamicState>,
  pub controls: BTreeMap<u16, ControlValues>,
  pub clock_domains: BTreeMap<u16, ClockDomainDynamicState>,

  /// Acquired/locked probe and Milan-specific per-entity extras (Phase 7).
  pub system_unique_id: Option<u64>,
  pub media_clock_reference_priority: Option<u8>,
  pub max_transit_time_ns: Option<u64>,

  /// Which configuration indices have been confirmed active at least once;
  /// used by the GetDescriptorDynamicInfo cache-reuse fast path.
  pub configurations_seen_active: BTreeSet<u16>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn connection_info_extracts_talker() {
    let info = StreamInputConnectionInfo::Connected {
      talker: EntityID(1),
      stream: StreamIndex(2),
    };
    assert_eq!(info.connected_to(), Some((EntityID(1), StreamIndex(2))));
    assert_eq!(StreamInputConnectionInfo::NotConnected.connected_to(), None);
  }
}
