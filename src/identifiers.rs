//! Opaque identifiers used throughout the descriptor tree and wire protocol.
//!
//! These are typed wrappers rather than raw integers, per the Design Notes'
//! preference for "typed bitset wrappers over raw integers" extended to all
//! index types: a `StreamIndex` and a `ClockDomainIndex` must never be
//! interchangeable by accident.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A 64-bit opaque unique identifier for an AVDECC entity.
///
/// A value may be *null* (all zero), *uninitialized* (all ones), or a *group*
/// identifier (multicast bit set in its MSB); only the remainder are valid
/// entity identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityID(pub u64);

impl EntityID {
  pub const NULL: EntityID = EntityID(0);
  pub const UNINITIALIZED: EntityID = EntityID(u64::MAX);

  const MULTICAST_BIT: u64 = 1 << 63;

  pub fn new(value: u64) -> Self {
    EntityID(value)
  }

  pub fn is_null(self) -> bool {
    self == Self::NULL
  }

  pub fn is_uninitialized(self) -> bool {
    self == Self::UNINITIALIZED
  }

  /// True if the MSB group/multicast bit is set.
  pub fn is_group(self) -> bool {
    self.0 & Self::MULTICAST_BIT != 0
  }

  /// True for an identifier usable as an individual entity's identity:
  /// neither null, uninitialized, nor a group id.
  pub fn is_valid_entity_id(self) -> bool {
    !self.is_null() && !self.is_uninitialized() && !self.is_group()
  }
}

impl fmt::Display for EntityID {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:#018x}", self.0)
  }
}

impl From<u64> for EntityID {
  fn from(v: u64) -> Self {
    EntityID(v)
  }
}

macro_rules! index_newtype {
  ($name:ident, $doc:expr) => {
    #[doc = $doc]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
    pub struct $name(pub u16);

    impl $name {
      /// Reserved index meaning "no such descriptor".
      pub const INVALID: $name = $name(u16::MAX);

      pub fn is_valid(self) -> bool {
        self != Self::INVALID
      }
    }

    impl From<u16> for $name {
      fn from(v: u16) -> Self {
        $name(v)
      }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }
  };
}

index_newtype!(ConfigurationIndex, "Selects a Configuration within an Entity.");
index_newtype!(AudioUnitIndex, "Selects an AudioUnit within a Configuration.");
index_newtype!(StreamIndex, "Selects a StreamInput or StreamOutput within a Configuration.");
index_newtype!(JackIndex, "Selects a JackInput or JackOutput within a Configuration.");
index_newtype!(AvbInterfaceIndex, "Selects an AvbInterface within a Configuration.");
index_newtype!(ClockSourceIndex, "Selects a ClockSource within a Configuration.");
index_newtype!(MemoryObjectIndex, "Selects a MemoryObject within a Configuration.");
index_newtype!(LocaleIndex, "Selects a Locale within a Configuration.");
index_newtype!(StringsIndex, "Selects a Strings block within a Locale.");
index_newtype!(StreamPortIndex, "Selects a StreamPortInput or StreamPortOutput.");
index_newtype!(ClusterIndex, "Selects an AudioCluster within a StreamPort.");
index_newtype!(MapIndex, "Selects an AudioMap within a StreamPort.");
index_newtype!(ControlIndex, "Selects a Control descriptor.");
index_newtype!(ClockDomainIndex, "Selects a ClockDomain within a Configuration.");
index_newtype!(TimingIndex, "Selects a Timing descriptor.");
index_newtype!(PtpInstanceIndex, "Selects a PtpInstance descriptor.");
index_newtype!(PtpPortIndex, "Selects a PtpPort within a PtpInstance.");
index_newtype!(OperationID, "Identifies an in-progress memory-object operation.");

/// A (type, index) pair selecting a single node in the descriptor tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DescriptorType {
  Entity,
  Configuration,
  AudioUnit,
  StreamInput,
  StreamOutput,
  JackInput,
  JackOutput,
  AvbInterface,
  ClockSource,
  MemoryObject,
  Locale,
  Strings,
  StreamPortInput,
  StreamPortOutput,
  AudioCluster,
  AudioMap,
  Control,
  ClockDomain,
  Timing,
  PtpInstance,
  PtpPort,
}

/// Addresses a talker or listener stream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StreamIdentification {
  pub entity_id: EntityID,
  pub stream_index: StreamIndex,
}

impl StreamIdentification {
  pub fn new(entity_id: EntityID, stream_index: StreamIndex) -> Self {
    Self {
      entity_id,
      stream_index,
    }
  }
}

impl fmt::Display for StreamIdentification {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.entity_id, self.stream_index)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn entity_id_classification() {
    assert!(EntityID::NULL.is_null());
    assert!(EntityID::UNINITIALIZED.is_uninitialized());
    assert!(EntityID(0x8000_0000_0000_0001).is_group());
    assert!(!EntityID(0x8000_0000_0000_0001).is_valid_entity_id());
    assert!(EntityID(0x0011_2233_4455_6677).is_valid_entity_id());
  }

  #[test]
  fn index_invalid_sentinel() {
    assert!(!StreamIndex::INVALID.is_valid());
    assert!(StreamIndex(0).is_valid());
  }

  #[test]
  fn stream_identification_display() {
    let s = StreamIdentification::new(EntityID(1), StreamIndex(2));
    assert_eq!(format!("{s}"), format!("{}:{}", EntityID(1), 2));
  }
}
