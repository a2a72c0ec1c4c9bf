//! Snapshot (De)serializer.
//!
//! Reads and writes a versioned document per entity and per fleet, in either
//! JSON (`serde_json`) or MessagePack (`rmp-serde`, feature
//! `snapshot-msgpack`) — one `serde`-derived document model, two codecs,
//! rather than two parallel implementations. Entities loaded this way are
//! marked virtual and registered with the Entity Store so they behave
//! like any other `ControlledEntity` for graph computations and snapshotting
//! back out.

use serde::{Deserialize, Serialize};

use crate::entity::access_state::{AcquireState, LockState};
use crate::entity::compatibility::{CompatibilityChangedEvent, CompatibilityFlags, MilanVersion};
use crate::entity::controlled_entity::{ControlledEntity, InterfaceInfo, MilanDynamicState, MilanInfo};
use crate::entity::diagnostics::Diagnostics;
use crate::entity::statistics::Statistics;
use crate::error::{SnapshotError, SnapshotErrorKind};
use crate::identifiers::EntityID;
use crate::model::descriptors::{
  ControllerCapabilities, EntityCapabilities, ListenerCapabilities, TalkerCapabilities,
};
use crate::model::dynamic::DynamicModel;
use crate::model::tree::EntityModel;
use crate::store::{EntityStore, StoreError};

/// Bumped only if the document shape changes in a way old readers can't
/// tolerate; `IncompatibleDumpVersion` is returned for anything newer than
/// this crate understands.
pub const CURRENT_DUMP_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdpInterfaceSnapshot {
  /// `None` encodes "no index"; this crate always has a concrete
  /// per-interface index, so loaded documents with `null` here are accepted
  /// but treated as interface 0 if there is no other information to key on.
  #[serde(default)]
  pub index: Option<u16>,
  pub mac_address: [u8; 6],
  pub valid_time: u8,
  pub gptp_grandmaster_id: Option<u64>,
  pub gptp_domain_number: u8,
  pub link_status_up: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdpSnapshot {
  pub entity_model_id: u64,
  pub entity_capabilities: EntityCapabilities,
  pub talker_capabilities: TalkerCapabilities,
  pub listener_capabilities: ListenerCapabilities,
  pub controller_capabilities: ControllerCapabilities,
  pub association_id: Option<u64>,
  pub interfaces: Vec<AdpInterfaceSnapshot>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilitySnapshot {
  pub flags: CompatibilityFlags,
  /// Textual `major.minor` form of the Milan compatibility version.
  pub milan_compatibility_version: String,
  pub events: Vec<CompatibilityChangedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityStateSnapshot {
  pub acquire_state: AcquireState,
  pub acquiring_controller: Option<EntityID>,
  pub lock_state: LockState,
  pub locking_controller: Option<EntityID>,
  pub current_configuration: Option<u16>,
  pub subscribed_to_unsolicited: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
  pub entity_id: EntityID,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub adp: Option<AdpSnapshot>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub compatibility: Option<CompatibilitySnapshot>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub milan_info: Option<MilanInfo>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub milan_dynamic_state: Option<MilanDynamicState>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub entity_model: Option<EntityModel>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub dynamic_model: Option<DynamicModel>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub entity_state: Option<EntityStateSnapshot>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub statistics: Option<Statistics>,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub diagnostics: Option<Diagnostics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetSnapshot {
  pub dump_version: u32,
  pub entities: Vec<EntitySnapshot>,
}

fn check_dump_version(version: u32) -> Result<(), SnapshotError> {
  if version > CURRENT_DUMP_VERSION {
    return Err(SnapshotError::new(
      SnapshotErrorKind::IncompatibleDumpVersion,
      format!("document dump version {version} is newer than {CURRENT_DUMP_VERSION}"),
    ));
  }
  Ok(())
}

pub fn entity_to_snapshot(entity: &ControlledEntity) -> EntitySnapshot {
  EntitySnapshot {
    entity_id: entity.entity_id,
    adp: Some(AdpSnapshot {
      entity_model_id: entity.entity_model_id,
      entity_capabilities: entity.entity_capabilities,
      talker_capabilities: entity.talker_capabilities,
      listener_capabilities: entity.listener_capabilities,
      controller_capabilities: entity.controller_capabilities,
      association_id: entity.association_id,
      interfaces: entity
        .interfaces
        .iter()
        .map(|(&index, info)| AdpInterfaceSnapshot {
          index: Some(index),
          mac_address: info.mac_address,
          valid_time: info.valid_time,
          gptp_grandmaster_id: info.gptp_grandmaster_id,
          gptp_domain_number: info.gptp_domain_number,
          link_status_up: info.link_status_up,
        })
        .collect(),
    }),
    compatibility: Some(CompatibilitySnapshot {
      flags: entity.compatibility.flags,
      milan_compatibility_version: entity.compatibility.milan_version.to_string(),
      events: entity.compatibility.audit_log.clone(),
    }),
    milan_info: entity.milan_info.clone(),
    milan_dynamic_state: Some(entity.milan_dynamic_state.clone()),
    entity_model: Some(entity.model.clone()),
    dynamic_model: Some(entity.dynamic.clone()),
    entity_state: Some(EntityStateSnapshot {
      acquire_state: entity.access.acquire_state,
      acquiring_controller: entity.access.acquiring_controller,
      lock_state: entity.access.lock_state,
      locking_controller: entity.access.locking_controller,
      current_configuration: entity.model.entity.as_ref().map(|e| e.current_configuration.0),
      subscribed_to_unsolicited: entity.access.subscribed_to_unsolicited,
    }),
    statistics: Some(entity.statistics),
    diagnostics: Some(entity.diagnostics.clone()),
  }
}

fn parse_milan_version(text: &str) -> MilanVersion {
  let mut parts = text.splitn(2, '.');
  let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
  let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
  MilanVersion::new(major, minor)
}

/// Rebuilds a virtual `ControlledEntity` from a loaded document. Always
/// marks `advertised = true` and
/// `is_virtual = true`: a loaded entity has no enumeration phases left to
/// run and is visible to observers and graph computations immediately.
pub fn snapshot_to_entity(snapshot: EntitySnapshot) -> ControlledEntity {
  let mut entity = ControlledEntity::new(snapshot.entity_id, true);
  entity.enumeration.advertised = true;

  if let Some(adp) = snapshot.adp {
    entity.entity_model_id = adp.entity_model_id;
    entity.entity_capabilities = adp.entity_capabilities;
    entity.talker_capabilities = adp.talker_capabilities;
    entity.listener_capabilities = adp.listener_capabilities;
    entity.controller_capabilities = adp.controller_capabilities;
    entity.association_id = adp.association_id;
    for (i, iface) in adp.interfaces.into_iter().enumerate() {
      let index = iface.index.unwrap_or(i as u16);
      entity.interfaces.insert(
        index,
        InterfaceInfo {
          mac_address: iface.mac_address,
          valid_time: iface.valid_time,
          gptp_grandmaster_id: iface.gptp_grandmaster_id,
          gptp_domain_number: iface.gptp_domain_number,
          link_status_up: iface.link_status_up,
        },
      );
    }
  }
  if let Some(compat) = snapshot.compatibility {
    entity.compatibility.flags = compat.flags;
    entity.compatibility.milan_version = parse_milan_version(&compat.milan_compatibility_version);
    entity.compatibility.audit_log = compat.events;
  }
  entity.milan_info = snapshot.milan_info;
  if let Some(state) = snapshot.milan_dynamic_state {
    entity.milan_dynamic_state = state;
  }
  if let Some(model) = snapshot.entity_model {
    entity.model = model;
  }
  if let Some(dynamic) = snapshot.dynamic_model {
    entity.dynamic = dynamic;
  }
  if let Some(state) = snapshot.entity_state {
    entity.access.acquire_state = state.acquire_state;
    entity.access.acquiring_controller = state.acquiring_controller;
    entity.access.lock_state = state.lock_state;
    entity.access.locking_controller = state.locking_controller;
    entity.access.subscribed_to_unsolicited = state.subscribed_to_unsolicited;
    if let (Some(configuration), Some(e)) = (state.current_configuration, entity.model.entity.as_mut()) {
      e.current_configuration = crate::identifiers::ConfigurationIndex(configuration);
    }
  }
  if let Some(statistics) = snapshot.statistics {
    entity.statistics = statistics;
  }
  if let Some(diagnostics) = snapshot.diagnostics {
    entity.diagnostics = diagnostics;
  }
  entity
}

pub fn serialize_entity_json(entity: &ControlledEntity) -> Result<String, SnapshotError> {
  let doc = FleetSnapshot {
    dump_version: CURRENT_DUMP_VERSION,
    entities: vec![entity_to_snapshot(entity)],
  };
  Ok(serde_json::to_string_pretty(&doc)?)
}

pub fn deserialize_entity_json(data: &str) -> Result<ControlledEntity, SnapshotError> {
  let doc: FleetSnapshot = serde_json::from_str(data)?;
  check_dump_version(doc.dump_version)?;
  let snapshot = doc
    .entities
    .into_iter()
    .next()
    .ok_or_else(|| SnapshotError::new(SnapshotErrorKind::MissingKey, "entities"))?;
  Ok(snapshot_to_entity(snapshot))
}

#[cfg(feature = "snapshot-msgpack")]
pub fn serialize_entity_msgpack(entity: &ControlledEntity) -> Result<Vec<u8>, SnapshotError> {
  let doc = FleetSnapshot {
    dump_version: CURRENT_DUMP_VERSION,
    entities: vec![entity_to_snapshot(entity)],
  };
  Ok(rmp_serde::to_vec_named(&doc)?)
}

#[cfg(feature = "snapshot-msgpack")]
pub fn deserialize_entity_msgpack(data: &[u8]) -> Result<ControlledEntity, SnapshotError> {
  let doc: FleetSnapshot = rmp_serde::from_slice(data)?;
  check_dump_version(doc.dump_version)?;
  let snapshot = doc
    .entities
    .into_iter()
    .next()
    .ok_or_else(|| SnapshotError::new(SnapshotErrorKind::MissingKey, "entities"))?;
  Ok(snapshot_to_entity(snapshot))
}

pub fn serialize_fleet_json(store: &EntityStore) -> Result<String, SnapshotError> {
  let mut entities = Vec::new();
  store.iterate(|_, handle| entities.push(entity_to_snapshot(&handle.lock().borrow())));
  let doc = FleetSnapshot {
    dump_version: CURRENT_DUMP_VERSION,
    entities,
  };
  Ok(serde_json::to_string_pretty(&doc)?)
}

/// Loads every entity in a fleet document into `store`. Entities that
/// already exist in the store are rejected as duplicates; with
/// `continue_on_error` set, such failures are skipped and the overall
/// result reports how many entities actually loaded rather than aborting
/// the whole load.
pub fn load_fleet_json(
  data: &str,
  store: &EntityStore,
  continue_on_error: bool,
) -> Result<usize, SnapshotError> {
  let doc: FleetSnapshot = serde_json::from_str(data)?;
  check_dump_version(doc.dump_version)?;

  let mut loaded = 0;
  let mut failures = Vec::new();
  for snapshot in doc.entities {
    let entity_id = snapshot.entity_id;
    let entity = snapshot_to_entity(snapshot);
    match store.insert(entity) {
      Ok(_) => loaded += 1,
      Err(StoreError::AlreadyPresent(id)) => {
        let err = SnapshotError::duplicate_entity_id(format!("{id}"));
        if continue_on_error {
          failures.push(err);
        } else {
          return Err(err);
        }
      }
    }
    let _ = entity_id;
  }

  if !failures.is_empty() {
    return Err(SnapshotError::incomplete(format!(
      "{} of {} entities failed to load: {}",
      failures.len(),
      loaded + failures.len(),
      failures
        .iter()
        .map(|e| e.detail.clone())
        .collect::<Vec<_>>()
        .join(", ")
    )));
  }
  Ok(loaded)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::identifiers::EntityID;

  fn sample_entity(id: u64) -> ControlledEntity {
    let mut e = ControlledEntity::new(EntityID(id), false);
    e.entity_model_id = 0xAABB;
    e.enumeration.advertised = true;
    e.compatibility.milan_version = MilanVersion::new(1, 3);
    e.interfaces.insert(
      0,
      InterfaceInfo {
        mac_address: [1, 2, 3, 4, 5, 6],
        valid_time: 10,
        gptp_grandmaster_id: Some(0xdead),
        gptp_domain_number: 0,
        link_status_up: Some(true),
      },
    );
    e
  }

  #[test]
  fn json_round_trip_preserves_observable_fields() {
    let entity = sample_entity(1);
    let json = serialize_entity_json(&entity).unwrap();
    let back = deserialize_entity_json(&json).unwrap();
    assert_eq!(back.entity_id, entity.entity_id);
    assert_eq!(back.entity_model_id, entity.entity_model_id);
    assert_eq!(back.compatibility.milan_version, entity.compatibility.milan_version);
    assert!(back.is_virtual);
    assert!(back.is_advertised());
    assert_eq!(back.interfaces.get(&0).unwrap().mac_address, [1, 2, 3, 4, 5, 6]);
  }

  #[test]
  fn newer_dump_version_is_rejected() {
    let mut doc_value: serde_json::Value =
      serde_json::from_str(&serialize_entity_json(&sample_entity(1)).unwrap()).unwrap();
    doc_value["dump_version"] = serde_json::json!(CURRENT_DUMP_VERSION + 1);
    let err = deserialize_entity_json(&doc_value.to_string()).unwrap_err();
    assert_eq!(err.kind, SnapshotErrorKind::IncompatibleDumpVersion);
  }

  #[test]
  fn duplicate_entity_id_in_fleet_document_is_rejected_with_hex_detail() {
    let store = EntityStore::new();
    let doc = FleetSnapshot {
      dump_version: CURRENT_DUMP_VERSION,
      entities: vec![entity_to_snapshot(&sample_entity(1)), entity_to_snapshot(&sample_entity(1))],
    };
    let json = serde_json::to_string(&doc).unwrap();
    let err = load_fleet_json(&json, &store, false).unwrap_err();
    assert_eq!(err.kind, SnapshotErrorKind::DuplicateEntityID);
    assert_eq!(err.detail, "0x0000000000000001");
    assert_eq!(store.len(), 1);
  }

  #[test]
  fn continue_on_error_loads_the_rest_and_reports_incomplete() {
    let store = EntityStore::new();
    let doc = FleetSnapshot {
      dump_version: CURRENT_DUMP_VERSION,
      entities: vec![
        entity_to_snapshot(&sample_entity(1)),
        entity_to_snapshot(&sample_entity(1)),
        entity_to_snapshot(&sample_entity(2)),
      ],
    };
    let json = serde_json::to_string(&doc).unwrap();
    let err = load_fleet_json(&json, &store, true).unwrap_err();
    assert_eq!(err.kind, SnapshotErrorKind::Incomplete);
    assert_eq!(store.len(), 2);
  }

  #[test]
  fn legacy_diagnostics_shape_is_accepted_inside_a_full_entity_document() {
    let mut value: serde_json::Value =
      serde_json::from_str(&serialize_entity_json(&sample_entity(1)).unwrap()).unwrap();
    value["entities"][0]["diagnostics"]["stream_input_over_latency"] =
      serde_json::json!([[3, true], [7, false]]);
    let entity = deserialize_entity_json(&value.to_string()).unwrap();
    let expected: std::collections::BTreeSet<crate::identifiers::StreamIndex> =
      [crate::identifiers::StreamIndex(3)].into_iter().collect();
    assert_eq!(entity.diagnostics.stream_input_over_latency, expected);
  }
}
