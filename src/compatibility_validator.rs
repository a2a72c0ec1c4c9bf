//! Post-enumeration compatibility validations. The per-flag transition
//! algebra itself lives in
//! [`crate::entity::compatibility`]; this module is the structural pass run
//! once `GetStaticModel`/`GetDynamicInfo` complete, before `onPreAdvertise`.

use crate::entity::compatibility::CompatibilityFlag;
use crate::entity::controlled_entity::ControlledEntity;
use crate::identifiers::{ClockDomainIndex, ControlIndex, StreamIndex};
use crate::model::descriptors::ControlValueType;

/// One structural defect found by a post-enumeration pass. Carries enough
/// identity to log or surface to a client without re-walking the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostEnumerationFinding {
  NoConfigurationDescriptor,
  InvalidControlType { control_index: ControlIndex },
  ControlValueTypeMismatch { control_index: ControlIndex },
  ControlValueOutOfRange { control_index: ControlIndex },
  InvalidIdentifyControlIndex,
  StreamFormatMutualExclusionViolated { stream_index: StreamIndex },
  ClockDomainCrfRequirementViolated { clock_domain_index: ClockDomainIndex },
  RedundancyInconsistent { stream_index: StreamIndex },
  CounterIncoherent { descriptor: &'static str },
}

/// Runs every post-enumeration validation against the current configuration
/// and applies the compatibility consequence of each finding via
/// `CompatibilityState`'s existing flag-transition rules, returning the raw
/// findings for logging/diagnostics.
pub fn validate_post_enumeration(entity: &mut ControlledEntity) -> Vec<PostEnumerationFinding> {
  let mut findings = Vec::new();

  check_configuration_present(entity, &mut findings);
  check_controls(entity, &mut findings);
  check_identify_control_index(entity, &mut findings);
  if entity.compatibility.flags.contains(CompatibilityFlag::Milan) {
    check_milan_stream_formats(entity, &mut findings);
    check_milan_redundancy(entity, &mut findings);
  }
  check_counter_coherence(entity, &mut findings);

  apply_consequences(entity, &findings);
  findings
}

fn check_configuration_present(entity: &ControlledEntity, findings: &mut Vec<PostEnumerationFinding>) {
  if entity.model.current_configuration().is_none() {
    findings.push(PostEnumerationFinding::NoConfigurationDescriptor);
  }
}

/// (iii) Control descriptors: ControlType must be a valid EUI-64; static and
/// dynamic value types must match; the dynamic current value must fall
/// within the static min..max, or be flagged out-of-range.
fn check_controls(entity: &mut ControlledEntity, findings: &mut Vec<PostEnumerationFinding>) {
  let Some(config) = entity.model.current_configuration() else { return };
  let mut violations = Vec::new();
  for control in config.controls.values() {
    if !control.control_type.is_valid_eui64() {
      violations.push(PostEnumerationFinding::InvalidControlType { control_index: control.index });
      continue;
    }
    if control.static_value_type != control.dynamic_value_type {
      violations.push(PostEnumerationFinding::ControlValueTypeMismatch { control_index: control.index });
    }
    if let Some(values) = entity.dynamic.controls.get(&control.index.0) {
      let in_range = values.current >= control.minimum && values.current <= control.maximum;
      if !in_range && !values.out_of_bounds {
        violations.push(PostEnumerationFinding::ControlValueOutOfRange { control_index: control.index });
      }
    }
  }
  for v in &violations {
    if let PostEnumerationFinding::ControlValueOutOfRange { control_index } = v {
      if let Some(values) = entity.dynamic.controls.get_mut(&control_index.0) {
        values.out_of_bounds = true;
      }
    }
  }
  findings.extend(violations);
}

/// (iv) Any ADP-declared Identify control index must reference a valid
/// IDENTIFY control at Configuration or Jack scope.
fn check_identify_control_index(entity: &ControlledEntity, findings: &mut Vec<PostEnumerationFinding>) {
  let Some(entity_desc) = &entity.model.entity else { return };
  let Some(index) = entity_desc.identify_control_index else { return };
  let Some(config) = entity.model.current_configuration() else {
    findings.push(PostEnumerationFinding::InvalidIdentifyControlIndex);
    return;
  };
  let config_scope_ok = config.controls.get(&index.0).is_some_and(|c| c.is_identify);
  let jack_scope_ok = config
    .jack_inputs
    .values()
    .chain(config.jack_outputs.values())
    .any(|j| j.identify_control_index == Some(index));
  if !config_scope_ok && !jack_scope_ok {
    findings.push(PostEnumerationFinding::InvalidIdentifyControlIndex);
  }
}

/// (v) Milan-only: a stream's advertised formats must not claim both AAF
/// Base and CRF simultaneously.
fn check_milan_stream_formats(entity: &ControlledEntity, findings: &mut Vec<PostEnumerationFinding>) {
  let Some(config) = entity.model.current_configuration() else { return };
  for stream in config.stream_inputs.values().chain(config.stream_outputs.values()) {
    let claims_both = stream.formats.iter().any(|f| f.is_aaf_base && f.is_crf);
    if claims_both {
      findings.push(PostEnumerationFinding::StreamFormatMutualExclusionViolated { stream_index: stream.index });
    }
  }

  // A multi-channel (>=2) AAF talker/listener stream implies a CRF stream
  // must exist, input and output, in the same clock domain.
  for stream in config.stream_inputs.values().chain(config.stream_outputs.values()) {
    let is_multichannel_aaf = stream
      .formats
      .iter()
      .any(|f| f.is_aaf_base && !f.is_crf && f.channel_count >= 2);
    if !is_multichannel_aaf {
      continue;
    }
    let domain = stream.clock_domain_index;
    let has_crf_input = config
      .stream_inputs
      .values()
      .any(|s| s.clock_domain_index == domain && s.formats.iter().any(|f| f.is_crf));
    let has_crf_output = config
      .stream_outputs
      .values()
      .any(|s| s.clock_domain_index == domain && s.formats.iter().any(|f| f.is_crf));
    if !has_crf_input || !has_crf_output {
      findings.push(PostEnumerationFinding::ClockDomainCrfRequirementViolated { clock_domain_index: domain });
    }
  }
}

/// (v) Redundancy flag consistency: a stream marked `redundant` requires at
/// least a second AVB interface to actually carry the redundant path.
fn check_milan_redundancy(entity: &ControlledEntity, findings: &mut Vec<PostEnumerationFinding>) {
  let Some(config) = entity.model.current_configuration() else { return };
  let has_dual_interfaces = config.avb_interfaces.len() >= 2;
  for stream in config.stream_inputs.values().chain(config.stream_outputs.values()) {
    if stream.redundant && !has_dual_interfaces {
      findings.push(PostEnumerationFinding::RedundancyInconsistent { stream_index: stream.index });
    }
  }
}

/// (vi) Static/dynamic counter coherence: the "up" counter of each pair
/// (`LinkUp`, `Locked`, `MediaLocked`, `StreamStart`) must equal the "down"
/// counter (`LinkDown`, `Unlocked`, `MediaUnlocked`, `StreamStop`) or exceed
/// it by exactly one — the asymmetric relation `up ≡ down ∨ down+1` from
/// §4.E-vi, not a symmetric drift-of-one.
fn check_counter_coherence(entity: &ControlledEntity, findings: &mut Vec<PostEnumerationFinding>) {
  for iface in entity.dynamic.avb_interfaces.values() {
    if !coherent(iface.counters.link_up, iface.counters.link_down) {
      findings.push(PostEnumerationFinding::CounterIncoherent { descriptor: "AvbInterface.Link" });
    }
  }
  for domain in entity.dynamic.clock_domains.values() {
    if !coherent(domain.counters.locked, domain.counters.unlocked) {
      findings.push(PostEnumerationFinding::CounterIncoherent { descriptor: "ClockDomain.Locked" });
    }
  }
  for stream in entity.dynamic.streams.values() {
    if !coherent(stream.counters.media_locked, stream.counters.media_unlocked) {
      findings.push(PostEnumerationFinding::CounterIncoherent { descriptor: "Stream.MediaLocked" });
    }
    if !coherent(stream.counters.stream_start, stream.counters.stream_stop) {
      findings.push(PostEnumerationFinding::CounterIncoherent { descriptor: "Stream.StreamStart" });
    }
  }
}

fn coherent(up: u32, down: u32) -> bool {
  up >= down && up - down <= 1
}

/// Maps structural findings onto the existing flag-transition API:
/// a broken identity/control-type invariant or a missing configuration is
/// an IEEE17221-level defect (cascades to clear Milan too); Milan-only
/// structural violations degrade to a Milan warning rather than dropping
/// Milan outright, since the entity may still otherwise be usable.
fn apply_consequences(entity: &mut ControlledEntity, findings: &[PostEnumerationFinding]) {
  for finding in findings {
    match finding {
      PostEnumerationFinding::NoConfigurationDescriptor
      | PostEnumerationFinding::InvalidControlType { .. }
      | PostEnumerationFinding::ControlValueTypeMismatch { .. }
      | PostEnumerationFinding::InvalidIdentifyControlIndex => {
        entity.compatibility.remove_flag(CompatibilityFlag::Ieee17221, Some("4.E"));
      }
      PostEnumerationFinding::ControlValueOutOfRange { .. } => {
        entity.compatibility.add_flag(CompatibilityFlag::Ieee17221Warning, Some("4.E-iii"));
      }
      PostEnumerationFinding::StreamFormatMutualExclusionViolated { .. }
      | PostEnumerationFinding::ClockDomainCrfRequirementViolated { .. }
      | PostEnumerationFinding::RedundancyInconsistent { .. } => {
        entity.compatibility.add_flag(CompatibilityFlag::MilanWarning, Some("4.E-v"));
      }
      PostEnumerationFinding::CounterIncoherent { .. } => {
        entity.compatibility.add_flag(CompatibilityFlag::Ieee17221Warning, Some("4.E-vi"));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identifiers::{AvbInterfaceIndex, ConfigurationIndex, EntityID};
  use crate::model::descriptors::{
    AvbInterfaceDescriptor, ConfigurationDescriptor, ControlDescriptor, ControlType, EntityCapabilities,
    EntityDescriptor, ListenerCapabilities, MacAddress, StreamDescriptor, StreamDirection, StreamFormatFlags,
    TalkerCapabilities,
  };
  use crate::model::dynamic::{AvbInterfaceCounters, AvbInterfaceDynamicState, ControlValues};
  use crate::model::tree::ConfigurationTree;

  fn minimal_entity() -> ControlledEntity {
    let mut entity = ControlledEntity::new(EntityID(1), false);
    entity.model.entity = Some(EntityDescriptor {
      entity_id: EntityID(1),
      entity_model_id: 0,
      entity_capabilities: EntityCapabilities {
        aem_supported: true,
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
      controller_capabilities: crate::model::descriptors::ControllerCapabilities { implemented: false },
      association_id: None,
      configurations_count: 1,
      current_configuration: ConfigurationIndex(0),
      identify_control_index: None,
    });
    let mut tree = ConfigurationTree::default();
    tree.descriptor = Some(ConfigurationDescriptor {
      index: ConfigurationIndex(0),
      descriptor_counts: Default::default(),
      is_active: true,
    });
    entity.model.configurations.insert(0, tree);
    entity
  }

  #[test]
  fn missing_configuration_clears_ieee17221() {
    let mut entity = ControlledEntity::new(EntityID(1), false);
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    let findings = validate_post_enumeration(&mut entity);
    assert!(findings.contains(&PostEnumerationFinding::NoConfigurationDescriptor));
    assert!(!entity.compatibility.flags.contains(CompatibilityFlag::Ieee17221));
  }

  #[test]
  fn invalid_control_type_is_flagged() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    entity.model.configuration_mut(ConfigurationIndex(0)).unwrap().controls.insert(
      0,
      ControlDescriptor {
        index: ControlIndex(0),
        control_type: ControlType(0),
        static_value_type: ControlValueType::Linear,
        dynamic_value_type: ControlValueType::Linear,
        minimum: 0,
        maximum: 10,
        is_identify: false,
      },
    );
    let findings = validate_post_enumeration(&mut entity);
    assert!(findings.contains(&PostEnumerationFinding::InvalidControlType { control_index: ControlIndex(0) }));
    assert!(!entity.compatibility.flags.contains(CompatibilityFlag::Ieee17221));
  }

  #[test]
  fn out_of_range_control_value_flags_and_marks_out_of_bounds() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    entity.model.configuration_mut(ConfigurationIndex(0)).unwrap().controls.insert(
      0,
      ControlDescriptor {
        index: ControlIndex(0),
        control_type: ControlType(1),
        static_value_type: ControlValueType::Linear,
        dynamic_value_type: ControlValueType::Linear,
        minimum: 0,
        maximum: 10,
        is_identify: false,
      },
    );
    entity.dynamic.controls.insert(0, ControlValues { current: 99, out_of_bounds: false });
    let findings = validate_post_enumeration(&mut entity);
    assert!(findings.contains(&PostEnumerationFinding::ControlValueOutOfRange { control_index: ControlIndex(0) }));
    assert!(entity.dynamic.controls.get(&0).unwrap().out_of_bounds);
    assert!(entity.compatibility.flags.contains(CompatibilityFlag::Ieee17221Warning));
  }

  #[test]
  fn redundant_stream_without_dual_interfaces_warns_under_milan() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Milan, None);
    entity.model.configuration_mut(ConfigurationIndex(0)).unwrap().stream_outputs.insert(
      0,
      StreamDescriptor {
        index: StreamIndex(0),
        direction: StreamDirection::Output,
        clock_domain_index: ClockDomainIndex(0),
        formats: vec![StreamFormatFlags { is_aaf_base: true, is_crf: false, channel_count: 2 }],
        redundant: true,
      },
    );
    let findings = validate_post_enumeration(&mut entity);
    assert!(findings.contains(&PostEnumerationFinding::RedundancyInconsistent { stream_index: StreamIndex(0) }));
    assert!(entity.compatibility.flags.contains(CompatibilityFlag::MilanWarning));
  }

  #[test]
  fn dual_interfaces_clear_redundancy_finding() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Milan, None);
    let config = entity.model.configuration_mut(ConfigurationIndex(0)).unwrap();
    config.avb_interfaces.insert(
      0,
      AvbInterfaceDescriptor { index: AvbInterfaceIndex(0), mac_address: MacAddress([0; 6]) },
    );
    config.avb_interfaces.insert(
      1,
      AvbInterfaceDescriptor { index: AvbInterfaceIndex(1), mac_address: MacAddress([1; 6]) },
    );
    config.stream_outputs.insert(
      0,
      StreamDescriptor {
        index: StreamIndex(0),
        direction: StreamDirection::Output,
        clock_domain_index: ClockDomainIndex(0),
        formats: vec![],
        redundant: true,
      },
    );
    let findings = validate_post_enumeration(&mut entity);
    assert!(!findings.iter().any(|f| matches!(f, PostEnumerationFinding::RedundancyInconsistent { .. })));
  }

  #[test]
  fn link_counter_drift_beyond_one_is_incoherent() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    entity.dynamic.avb_interfaces.insert(
      0,
      AvbInterfaceDynamicState {
        counters: AvbInterfaceCounters { link_up: 5, link_down: 2, ..Default::default() },
        ..Default::default()
      },
    );
    let findings = validate_post_enumeration(&mut entity);
    assert!(findings
      .iter()
      .any(|f| matches!(f, PostEnumerationFinding::CounterIncoherent { descriptor: "AvbInterface.Link" })));
  }

  #[test]
  fn link_down_exceeding_link_up_is_incoherent() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    entity.dynamic.avb_interfaces.insert(
      0,
      AvbInterfaceDynamicState {
        counters: AvbInterfaceCounters { link_up: 2, link_down: 3, ..Default::default() },
        ..Default::default()
      },
    );
    let findings = validate_post_enumeration(&mut entity);
    assert!(findings
      .iter()
      .any(|f| matches!(f, PostEnumerationFinding::CounterIncoherent { descriptor: "AvbInterface.Link" })));
  }

  #[test]
  fn link_up_exactly_one_ahead_of_link_down_is_coherent() {
    let mut entity = minimal_entity();
    entity.compatibility.add_flag(CompatibilityFlag::Ieee17221, None);
    entity.dynamic.avb_interfaces.insert(
      0,
      AvbInterfaceDynamicState {
        counters: AvbInterfaceCounters { link_up: 3, link_down: 2, ..Default::default() },
        ..Default::default()
      },
    );
    let findings = validate_post_enumeration(&mut entity);
    assert!(!findings
      .iter()
      .any(|f| matches!(f, PostEnumerationFinding::CounterIncoherent { descriptor: "AvbInterface.Link" })));
  }
}
