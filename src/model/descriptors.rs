//! Static descriptor tree node types.
//!
//! The wire-level descriptor payload format is an external concern (§1 Non-
//! goals: "the discrete descriptor-model data definitions"); what this crate
//! needs is the subset of each descriptor's static fields referenced by the
//! enumeration engine, the compatibility validator, and the derived-graph
//! maintainer. Node kinds are tagged variants rather than a class hierarchy,
//! per the Design Notes' "dispatch by match rather than virtual call".

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identifiers::{
  AudioUnitIndex, AvbInterfaceIndex, ClockDomainIndex, ClockSourceIndex, ClusterIndex,
  ConfigurationIndex, ControlIndex, DescriptorType, EntityID, JackIndex, LocaleIndex, MapIndex,
  MemoryObjectIndex, PtpInstanceIndex, PtpPortIndex, StreamIndex, StreamPortIndex, StringsIndex,
  TimingIndex,
};

/// ADP-advertised per-entity capability bits relevant to enumeration choices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCapabilities {
  pub aem_supported: bool,
  pub vendor_unique_supported: bool,
  pub class_a_supported: bool,
  pub class_b_supported: bool,
  pub gptp_supported: bool,
  pub association_id_supported: bool,
  pub association_id_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TalkerCapabilities {
  pub implemented: bool,
  pub other_source: bool,
  pub control_source: bool,
  pub media_clock_source: bool,
  pub smpte_source: bool,
  pub midi_source: bool,
  pub audio_source: bool,
  pub video_source: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerCapabilities {
  pub implemented: bool,
  pub other_sink: bool,
  pub control_sink: bool,
  pub media_clock_sink: bool,
  pub smpte_sink: bool,
  pub midi_sink: bool,
  pub audio_sink: bool,
  pub video_sink: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerCapabilities {
  pub implemented: bool,
}

/// The EntityDescriptor: root of the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
  pub entity_id: EntityID,
  pub entity_model_id: u64,
  pub entity_capabilities: EntityCapabilities,
  pub talker_capabilities: TalkerCapabilities,
  pub listener_capabilities: ListenerCapabilities,
  pub controller_capabilities: ControllerCapabilities,
  pub association_id: Option<u64>,
  pub configurations_count: u16,
  pub current_configuration: ConfigurationIndex,
  /// Configuration-scope IDENTIFY control referenced from ADP, if any.
  pub identify_control_index: Option<ControlIndex>,
}

/// Top-level descriptor-count table.
pub type DescriptorCounts = BTreeMap<DescriptorType, u16>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationDescriptor {
  pub index: ConfigurationIndex,
  pub descriptor_counts: DescriptorCounts,
  pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingRate(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioUnitDescriptor {
  pub index: AudioUnitIndex,
  pub sampling_rates: Vec<SamplingRate>,
}

/// Stream-format flags relevant to Milan constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormatFlags {
  pub is_aaf_base: bool,
  pub is_crf: bool,
  pub channel_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamDirection {
  Input,
  Output,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
  pub index: StreamIndex,
  pub direction: StreamDirection,
  pub clock_domain_index: ClockDomainIndex,
  pub formats: Vec<StreamFormatFlags>,
  pub redundant: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JackType {
  Speaker,
  Headphone,
  AnalogMicrophone,
  Spdif,
  Adat,
  Tdif,
  Madi,
  UnbalancedAnalog,
  BalancedAnalog,
  Digital,
  Midi,
  AesEbu,
  CompositeVideo,
  SVhsVideo,
  ComponentVideo,
  Dvi,
  Hdmi,
  Udi,
  DisplayPort,
  Antenna,
  AnalogTuner,
  Ethernet,
  Wifi,
  Usb,
  Pci,
  PciE,
  Scsi,
  Ata,
  Imager,
  Ir,
  Thunderbolt,
  Sata,
  SmpteLtc,
  DigitalMicrophone,
  AudioMediaClock,
  VideoMediaClock,
  GnssClock,
  Pcie,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JackDescriptor {
  pub index: JackIndex,
  pub jack_type: JackType,
  pub identify_control_index: Option<ControlIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacAddress(pub [u8; 6]);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvbInterfaceDescriptor {
  pub index: AvbInterfaceIndex,
  pub mac_address: MacAddress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSourceType {
  Internal,
  External,
  InputStream,
  Expansion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSourceDescriptor {
  pub index: ClockSourceIndex,
  pub source_type: ClockSourceType,
  /// Meaningful only when `source_type == InputStream`.
  pub source_location: Option<StreamIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryObjectDescriptor {
  pub index: MemoryObjectIndex,
  pub maximum_length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocaleDescriptor {
  pub index: LocaleIndex,
  pub locale_id: String,
  pub strings_indices: Vec<StringsIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringsDescriptor {
  pub index: StringsIndex,
  pub strings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPortDescriptor {
  pub index: StreamPortIndex,
  pub direction: StreamDirection,
  pub clusters_count: u16,
  pub maps_count: u16,
  pub has_dynamic_mapping: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioClusterDescriptor {
  pub index: ClusterIndex,
  pub channel_count: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMapping {
  pub stream_index: StreamIndex,
  pub stream_channel: u16,
  pub cluster_offset: ClusterIndex,
  pub cluster_channel: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMapDescriptor {
  pub index: MapIndex,
  pub mappings: Vec<AudioMapping>,
}

/// ControlType is a 64-bit EUI-64; `0` is never a valid value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlType(pub u64);

impl ControlType {
  pub fn is_valid_eui64(self) -> bool {
    self.0 != 0
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlValueType {
  Linear,
  Selector,
  Array,
  Utf8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlDescriptor {
  pub index: ControlIndex,
  pub control_type: ControlType,
  pub static_value_type: ControlValueType,
  pub dynamic_value_type: ControlValueType,
  pub minimum: i64,
  pub maximum: i64,
  pub is_identify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomainDescriptor {
  pub index: ClockDomainIndex,
  pub clock_sources: Vec<ClockSourceIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingDescriptor {
  pub index: TimingIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtpInstanceDescriptor {
  pub index: PtpInstanceIndex,
  pub ports: Vec<PtpPortIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtpPortDescriptor {
  pub index: PtpPortIndex,
}

/// Tagged variant over every descriptor kind (Design Notes:
/// "Represent nodes as tagged variants per descriptor type rather than a
/// single inheritance hierarchy").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StaticDescriptor {
  Entity(EntityDescriptor),
  Configuration(ConfigurationDescriptor),
  AudioUnit(AudioUnitDescriptor),
  Stream(StreamDescriptor),
  Jack(JackDescriptor),
  AvbInterface(AvbInterfaceDescriptor),
  ClockSource(ClockSourceDescriptor),
  MemoryObject(MemoryObjectDescriptor),
  Locale(LocaleDescriptor),
  Strings(StringsDescriptor),
  StreamPort(StreamPortDescriptor),
  AudioCluster(AudioClusterDescriptor),
  AudioMap(AudioMapDescriptor),
  Control(ControlDescriptor),
  ClockDomain(ClockDomainDescriptor),
  Timing(TimingDescriptor),
  PtpInstance(PtpInstanceDescriptor),
  PtpPort(PtpPortDescriptor),
}

impl StaticDescriptor {
  pub fn descriptor_type(&self) -> DescriptorType {
    match self {
      StaticDescriptor::Entity(_) => DescriptorType::Entity,
      StaticDescriptor::Configuration(_) => DescriptorType::Configuration,
      StaticDescriptor::AudioUnit(_) => DescriptorType::AudioUnit,
      StaticDescriptor::Stream(s) => match s.direction {
        StreamDirection::Input => DescriptorType::StreamInput,
        StreamDirection::Output => DescriptorType::StreamOutput,
      },
      StaticDescriptor::Jack(_) => DescriptorType::JackInput,
      StaticDescriptor::AvbInterface(_) => DescriptorType::AvbInterface,
      StaticDescriptor::ClockSource(_) => DescriptorType::ClockSource,
      StaticDescriptor::MemoryObject(_) => DescriptorType::MemoryObject,
      StaticDescriptor::Locale(_) => DescriptorType::Locale,
      StaticDescriptor::Strings(_) => DescriptorType::Strings,
      StaticDescriptor::StreamPort(s) => match s.direction {
        StreamDirection::Input => DescriptorType::StreamPortInput,
        StreamDirection::Output => DescriptorType::StreamPortOutput,
      },
      StaticDescriptor::AudioCluster(_) => DescriptorType::AudioCluster,
      StaticDescriptor::AudioMap(_) => DescriptorType::AudioMap,
      StaticDescriptor::Control(_) => DescriptorType::Control,
      StaticDescriptor::ClockDomain(_) => DescriptorType::ClockDomain,
      StaticDescriptor::Timing(_) => DescriptorType::Timing,
      StaticDescriptor::PtpInstance(_) => DescriptorType::PtpInstance,
      StaticDescriptor::PtpPort(_) => DescriptorType::PtpPort,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn control_type_zero_is_invalid() {
    assert!(!ControlType(0).is_valid_eui64());
    assert!(ControlType(1).is_valid_eui64());
  }

  #[test]
  fn descriptor_type_matches_stream_direction() {
    let s = StaticDescriptor::Stream(StreamDescriptor {
      index: StreamIndex(0),
      direction: StreamDirection::Output,
      clock_domain_index: ClockDomainIndex(0),
      formats: vec![],
      redundant: false,
    });
    assert_eq!(s.descriptor_type(), DescriptorType::StreamOutput);
  }
}
