//! The descriptor tree container and its two traversal styles (Design Notes
//! "Visitors": a defaulted traversal where unhandled nodes do nothing, and an
//! exhaustive one where the compiler ensures every variant is handled).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::identifiers::ConfigurationIndex;
use crate::model::descriptors::{
  AudioClusterDescriptor, AudioMapDescriptor, AudioUnitDescriptor, AvbInterfaceDescriptor,
  ClockDomainDescriptor, ClockSourceDescriptor, ConfigurationDescriptor, ControlDescriptor,
  EntityDescriptor, JackDescriptor, LocaleDescriptor, MemoryObjectDescriptor,
  PtpInstanceDescriptor, PtpPortDescriptor, StaticDescriptor, StreamDescriptor, StreamPortDescriptor,
  StringsDescriptor, TimingDescriptor,
};

/// One Configuration's full static subtree. Keyed by each descriptor's raw
/// index so lookups don't require a linear scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationTree {
  pub descriptor: Option<ConfigurationDescriptor>,
  pub audio_units: BTreeMap<u16, AudioUnitDescriptor>,
  pub stream_inputs: BTreeMap<u16, StreamDescriptor>,
  pub stream_outputs: BTreeMap<u16, StreamDescriptor>,
  pub jack_inputs: BTreeMap<u16, JackDescriptor>,
  pub jack_outputs: BTreeMap<u16, JackDescriptor>,
  pub avb_interfaces: BTreeMap<u16, AvbInterfaceDescriptor>,
  pub clock_sources: BTreeMap<u16, ClockSourceDescriptor>,
  pub memory_objects: BTreeMap<u16, MemoryObjectDescriptor>,
  pub locales: BTreeMap<u16, LocaleDescriptor>,
  pub strings: BTreeMap<u16, StringsDescriptor>,
  pub stream_ports_input: BTreeMap<u16, StreamPortDescriptor>,
  pub stream_ports_output: BTreeMap<u16, StreamPortDescriptor>,
  pub audio_clusters: BTreeMap<u16, AudioClusterDescriptor>,
  pub audio_maps: BTreeMap<u16, AudioMapDescriptor>,
  pub controls: BTreeMap<u16, ControlDescriptor>,
  pub clock_domains: BTreeMap<u16, ClockDomainDescriptor>,
  pub timing: BTreeMap<u16, TimingDescriptor>,
  pub ptp_instances: BTreeMap<u16, PtpInstanceDescriptor>,
  pub ptp_ports: BTreeMap<u16, PtpPortDescriptor>,
}

impl ConfigurationTree {
  /// Every node in this configuration as a tagged variant, for the
  /// exhaustive traversal style.
  pub fn all_nodes(&self) -> Vec<StaticDescriptor> {
    let mut out = Vec::new();
    if let Some(c) = &self.descriptor {
      out.push(StaticDescriptor::Configuration(c.clone()));
    }
    out.extend(self.audio_units.values().cloned().map(StaticDescriptor::AudioUnit));
    out.extend(self.stream_inputs.values().cloned().map(StaticDescriptor::Stream));
    out.extend(self.stream_outputs.values().cloned().map(StaticDescriptor::Stream));
    out.extend(self.jack_inputs.values().cloned().map(StaticDescriptor::Jack));
    out.extend(self.jack_outputs.values().cloned().map(StaticDescriptor::Jack));
    out.extend(self.avb_interfaces.values().cloned().map(StaticDescriptor::AvbInterface));
    out.extend(self.clock_sources.values().cloned().map(StaticDescriptor::ClockSource));
    out.extend(self.memory_objects.values().cloned().map(StaticDescriptor::MemoryObject));
    out.extend(self.locales.values().cloned().map(StaticDescriptor::Locale));
    out.extend(self.strings.values().cloned().map(StaticDescriptor::Strings));
    out.extend(self.stream_ports_input.values().cloned().map(StaticDescriptor::StreamPort));
    out.extend(self.stream_ports_output.values().cloned().map(StaticDescriptor::StreamPort));
    out.extend(self.audio_clusters.values().cloned().map(StaticDescriptor::AudioCluster));
    out.extend(self.audio_maps.values().cloned().map(StaticDescriptor::AudioMap));
    out.extend(self.controls.values().cloned().map(StaticDescriptor::Control));
    out.extend(self.clock_domains.values().cloned().map(StaticDescriptor::ClockDomain));
    out.extend(self.timing.values().cloned().map(StaticDescriptor::Timing));
    out.extend(self.ptp_instances.values().cloned().map(StaticDescriptor::PtpInstance));
    out.extend(self.ptp_ports.values().cloned().map(StaticDescriptor::PtpPort));
    out
  }
}

/// Full static model: the entity descriptor plus every configuration's
/// subtree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityModel {
  pub entity: Option<EntityDescriptor>,
  pub configurations: BTreeMap<u16, ConfigurationTree>,
}

impl EntityModel {
  pub fn configuration(&self, index: ConfigurationIndex) -> Option<&ConfigurationTree> {
    self.configurations.get(&index.0)
  }

  pub fn configuration_mut(&mut self, index: ConfigurationIndex) -> Option<&mut ConfigurationTree> {
    self.configurations.get_mut(&index.0)
  }

  pub fn current_configuration(&self) -> Option<&ConfigurationTree> {
    let idx = self.entity.as_ref()?.current_configuration;
    self.configuration(idx)
  }
}

/// Defaulted traversal visitor: every method has a no-op default, so adding a
/// new descriptor kind doesn't break existing visitors (unlike the exhaustive
/// style below).
#[allow(unused_variables)]
pub trait DefaultedVisitor {
  fn visit_entity(&mut self, d: &EntityDescriptor) {}
  fn visit_configuration(&mut self, d: &ConfigurationDescriptor) {}
  fn visit_audio_unit(&mut self, d: &AudioUnitDescriptor) {}
  fn visit_stream(&mut self, d: &StreamDescriptor) {}
  fn visit_jack(&mut self, d: &JackDescriptor) {}
  fn visit_avb_interface(&mut self, d: &AvbInterfaceDescriptor) {}
  fn visit_clock_source(&mut self, d: &ClockSourceDescriptor) {}
  fn visit_memory_object(&mut self, d: &MemoryObjectDescriptor) {}
  fn visit_locale(&mut self, d: &LocaleDescriptor) {}
  fn visit_strings(&mut self, d: &StringsDescriptor) {}
  fn visit_stream_port(&mut self, d: &StreamPortDescriptor) {}
  fn visit_audio_cluster(&mut self, d: &AudioClusterDescriptor) {}
  fn visit_audio_map(&mut self, d: &AudioMapDescriptor) {}
  fn visit_control(&mut self, d: &ControlDescriptor) {}
  fn visit_clock_domain(&mut self, d: &ClockDomainDescriptor) {}
  fn visit_timing(&mut self, d: &TimingDescriptor) {}
  fn visit_ptp_instance(&mut self, d: &PtpInstanceDescriptor) {}
  fn visit_ptp_port(&mut self, d: &PtpPortDescriptor) {}
}

/// Walks the whole model, calling every applicable `visit_*` method. Unlike
/// `ConfigurationTree::all_nodes` (exhaustive, tagged-variant form), this is
/// the "every node visitable, unhandled nodes do nothing" traversal.
pub fn walk_defaulted(model: &EntityModel, visitor: &mut dyn DefaultedVisitor) {
  if let Some(e) = &model.entity {
    visitor.visit_entity(e);
  }
  for config in model.configurations.values() {
    if let Some(c) = &config.descriptor {
      visitor.visit_configuration(c);
    }
    for d in config.audio_units.values() {
      visitor.visit_audio_unit(d);
    }
    for d in config.stream_inputs.values().chain(config.stream_outputs.values()) {
      visitor.visit_stream(d);
    }
    for d in config.jack_inputs.values().chain(config.jack_outputs.values()) {
      visitor.visit_jack(d);
    }
    for d in config.avb_interfaces.values() {
      visitor.visit_avb_interface(d);
    }
    for d in config.clock_sources.values() {
      visitor.visit_clock_source(d);
    }
    for d in config.memory_objects.values() {
      visitor.visit_memory_object(d);
    }
    for d in config.locales.values() {
      visitor.visit_locale(d);
    }
    for d in config.strings.values() {
      visitor.visit_strings(d);
    }
    for d in config.stream_ports_input.values().chain(config.stream_ports_output.values()) {
      visitor.visit_stream_port(d);
    }
    for d in config.audio_clusters.values() {
      visitor.visit_audio_cluster(d);
    }
    for d in config.audio_maps.values() {
      visitor.visit_audio_map(d);
    }
    for d in config.controls.values() {
      visitor.visit_control(d);
    }
    for d in config.clock_domains.values() {
      visitor.visit_clock_domain(d);
    }
    for d in config.timing.values() {
      visitor.visit_timing(d);
    }
    for d in config.ptp_instances.values() {
      visitor.visit_ptp_instance(d);
    }
    for d in config.ptp_ports.values() {
      visitor.visit_ptp_port(d);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identifiers::{ClockDomainIndex, StreamIndex};
  use crate::model::descriptors::{StreamDirection, StreamFormatFlags};

  #[derive(Default)]
  struct CountingVisitor {
    streams: usize,
  }

  impl DefaultedVisitor for CountingVisitor {
    fn visit_stream(&mut self, _d: &StreamDescriptor) {
      self.streams += 1;
    }
  }

  fn sample_stream(index: u16) -> StreamDescriptor {
    StreamDescriptor {
      index: StreamIndex(index),
      direction: StreamDirection::Output,
      clock_domain_index: ClockDomainIndex(0),
      formats: vec![StreamFormatFlags {
        is_aaf_base: true,
        is_crf: false,
        channel_count: 2,
      }],
      redundant: false,
    }
  }

  #[test]
  fn defaulted_visitor_only_sees_implemented_kinds() {
    let mut tree = ConfigurationTree::default();
    tree.stream_outputs.insert(0, sample_stream(0));
    tree.stream_inputs.insert(1, sample_stream(1));
    let mut model = EntityModel::default();
    model.configurations.insert(0, tree);

    let mut visitor = CountingVisitor::default();
    walk_defaulted(&model, &mut visitor);
    assert_eq!(visitor.streams, 2);
  }

  #[test]
  fn all_nodes_includes_every_descriptor_once() {
    let mut tree = ConfigurationTree::default();
    tree.stream_outputs.insert(0, sample_stream(0));
    assert_eq!(tree.all_nodes().len(), 1);
  }
}
