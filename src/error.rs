//! Typed error taxonomies.
//!
//! Protocol-layer failures never reach clients as `Err` values — they are
//! classified into [`crate::retry::FailureAction`] and handled locally. The
//! error enums here cover the two places the spec actually wants typed
//! failures: snapshot (de)serialization and descriptor-tree model access.

use thiserror::Error;

/// `ControlledEntity::Exception`: typed tree/model access failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
  NotSupported,
  InvalidDescriptor,
  InvalidModel,
  Internal,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind:?}: {detail}")]
pub struct ModelError {
  pub kind: ModelErrorKind,
  pub detail: String,
}

impl ModelError {
  pub fn new(kind: ModelErrorKind, detail: impl Into<String>) -> Self {
    Self {
      kind,
      detail: detail.into(),
    }
  }

  pub fn not_supported(detail: impl Into<String>) -> Self {
    Self::new(ModelErrorKind::NotSupported, detail)
  }

  pub fn invalid_descriptor(detail: impl Into<String>) -> Self {
    Self::new(ModelErrorKind::InvalidDescriptor, detail)
  }

  pub fn invalid_model(detail: impl Into<String>) -> Self {
    Self::new(ModelErrorKind::InvalidModel, detail)
  }

  pub fn internal(detail: impl Into<String>) -> Self {
    Self::new(ModelErrorKind::Internal, detail)
  }
}

/// Snapshot load/save failure shape, exactly the `kind` set named
/// there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotErrorKind {
  AccessDenied,
  ParseError,
  MissingKey,
  InvalidKey,
  InvalidValue,
  IncompatibleDumpVersion,
  DuplicateEntityID,
  OtherError,
  Incomplete,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{kind:?}: {detail}")]
pub struct SnapshotError {
  pub kind: SnapshotErrorKind,
  pub detail: String,
}

impl SnapshotError {
  pub fn new(kind: SnapshotErrorKind, detail: impl Into<String>) -> Self {
    Self {
      kind,
      detail: detail.into(),
    }
  }

  pub fn duplicate_entity_id(detail: impl Into<String>) -> Self {
    Self::new(SnapshotErrorKind::DuplicateEntityID, detail)
  }

  pub fn incomplete(detail: impl Into<String>) -> Self {
    Self::new(SnapshotErrorKind::Incomplete, detail)
  }
}

impl From<serde_json::Error> for SnapshotError {
  fn from(e: serde_json::Error) -> Self {
    let kind = if e.is_data() {
      SnapshotErrorKind::InvalidValue
    } else if e.is_syntax() || e.is_eof() {
      SnapshotErrorKind::ParseError
    } else {
      SnapshotErrorKind::OtherError
    };
    SnapshotError::new(kind, e.to_string())
  }
}

#[cfg(feature = "snapshot-msgpack")]
impl From<rmp_serde::decode::Error> for SnapshotError {
  fn from(e: rmp_serde::decode::Error) -> Self {
    SnapshotError::new(SnapshotErrorKind::ParseError, e.to_string())
  }
}

#[cfg(feature = "snapshot-msgpack")]
impl From<rmp_serde::encode::Error> for SnapshotError {
  fn from(e: rmp_serde::encode::Error) -> Self {
    SnapshotError::new(SnapshotErrorKind::OtherError, e.to_string())
  }
}

/// Exclusive-access registry failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AccessError {
  #[error("entity {0} is not known to the controller")]
  UnknownEntity(String),
  #[error("access token has already been invalidated")]
  TokenInvalidated,
  #[error("entity does not support this exclusive access type")]
  NotSupported,
}

/// Resolution failures for the network-interface helper trait.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkInterfaceError {
  #[error("no such network interface: {0}")]
  NotFound(String),
  #[error("interface {0} has no usable MAC address")]
  NoMacAddress(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn model_error_constructors_set_kind() {
    let e = ModelError::invalid_descriptor("bad index");
    assert_eq!(e.kind, ModelErrorKind::InvalidDescriptor);
    assert_eq!(e.detail, "bad index");
  }

  #[test]
  fn json_syntax_error_maps_to_parse_error() {
    let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
    let snap: SnapshotError = err.into();
    assert_eq!(snap.kind, SnapshotErrorKind::ParseError);
  }
}
