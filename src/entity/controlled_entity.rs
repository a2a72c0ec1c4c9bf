//! `ControlledEntity`: per-entity record.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::entity::access_state::ExclusiveAccessState;
use crate::entity::compatibility::CompatibilityState;
use crate::entity::diagnostics::Diagnostics;
use crate::entity::enumeration_state::EnumerationState;
use crate::entity::statistics::Statistics;
use crate::identifiers::{AvbInterfaceIndex, ClockDomainIndex, ClockSourceIndex, EntityID, StreamIndex};
use crate::model::descriptors::{
  ControllerCapabilities, EntityCapabilities, ListenerCapabilities, TalkerCapabilities,
};
use crate::model::dynamic::{DynamicModel, StreamDynamicState};
use crate::model::tree::EntityModel;

/// ADP-derived per-AVB-interface information.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
  pub mac_address: [u8; 6],
  pub valid_time: u8,
  pub gptp_grandmaster_id: Option<u64>,
  pub gptp_domain_number: u8,
  /// `None` encodes the "global"/no-index sentinel used by the snapshot
  /// format.
  pub link_status_up: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilanInfo {
  pub protocol_version: u32,
  pub feature_flags: u32,
  pub certification_version: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MilanDynamicState {
  pub system_unique_id: Option<u64>,
  pub media_clock_reference_priority: Option<u8>,
}

/// A full per-entity record. Lives behind the Entity Store's guard
/// types; never cloned wholesale across threads — mutation always happens
/// through the per-entity lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlledEntity {
  pub entity_id: EntityID,
  pub entity_model_id: u64,
  pub entity_capabilities: EntityCapabilities,
  pub talker_capabilities: TalkerCapabilities,
  pub listener_capabilities: ListenerCapabilities,
  pub controller_capabilities: ControllerCapabilities,
  pub association_id: Option<u64>,
  pub interfaces: BTreeMap<u16, InterfaceInfo>,
  #[serde(skip)]
  pub source_addr: Option<Ipv4Addr>,

  pub model: EntityModel,
  pub dynamic: DynamicModel,
  pub compatibility: CompatibilityState,
  pub milan_info: Option<MilanInfo>,
  pub milan_dynamic_state: MilanDynamicState,
  pub diagnostics: Diagnostics,
  pub enumeration: EnumerationState,
  pub access: ExclusiveAccessState,
  pub statistics: Statistics,

  /// Distinguishes real (protocol-tracked) entities from snapshot-loaded
  /// virtual ones.
  pub is_virtual: bool,
}

impl ControlledEntity {
  pub fn new(entity_id: EntityID, is_virtual: bool) -> Self {
    Self {
      entity_id,
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
      talker_capabilities: TalkerCapabilities {
        implemented: false,
        other_source: false,
        control_source: false,
        media_clock_source: false,
        smpte_source: false,
        midi_source: false,
        audio_source: false,
        video_source: false,
      },
      listener_capabilities: ListenerCapabilities {
        implemented: false,
        other_sink: false,
        control_sink: false,
        media_clock_sink: false,
        smpte_sink: false,
        midi_sink: false,
        audio_sink: false,
        video_sink: false,
      },
      controller_capabilities: ControllerCapabilities { implemented: false },
      association_id: None,
      interfaces: BTreeMap::new(),
      source_addr: None,
      model: EntityModel::default(),
      dynamic: DynamicModel::default(),
      compatibility: CompatibilityState::default(),
      milan_info: None,
      milan_dynamic_state: MilanDynamicState::default(),
      diagnostics: Diagnostics::default(),
      enumeration: EnumerationState::default(),
      access: ExclusiveAccessState::default(),
      statistics: Statistics::default(),
      is_virtual,
    }
  }

  pub fn is_advertised(&self) -> bool {
    self.enumeration.advertised
  }

  pub fn interface(&self, index: AvbInterfaceIndex) -> Option<&InterfaceInfo> {
    self.interfaces.get(&index.0)
  }

  /// The clock source currently active for `domain`, if the domain exists
  /// and its dynamic state has been populated.
  pub fn dynamic_clock_domain_source(&self, domain: ClockDomainIndex) -> Option<ClockSourceIndex> {
    self.dynamic.clock_domains.get(&domain.0)?.current_clock_source
  }

  pub fn dynamic_stream_input(&self, stream: StreamIndex) -> Option<&StreamDynamicState> {
    self.dynamic.streams.get(&(true, stream.0))
  }

  pub fn dynamic_stream_output(&self, stream: StreamIndex) -> Option<&StreamDynamicState> {
    self.dynamic.streams.get(&(false, stream.0))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn new_entity_starts_unadvertised_and_not_virtual() {
    let e = ControlledEntity::new(EntityID(1), false);
    assert!(!e.is_advertised());
    assert!(!e.is_virtual);
    assert_eq!(e.enumeration.remaining_phases.len(), 6);
  }
}
