//! Media-clock chain computation.

use std::collections::BTreeSet;

use crate::entity::ControlledEntityHandle;
use crate::identifiers::{ClockDomainIndex, EntityID};
use crate::model::descriptors::ClockSourceType;
use crate::model::dynamic::StreamInputConnectionInfo;
use crate::store::EntityStore;

/// One node visited while walking a clock domain's active source chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockChainNode {
  pub entity_id: EntityID,
  pub clock_domain: ClockDomainIndex,
}

/// Terminal classification for a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockChainTermination {
  Internal,
  External,
  StreamNotConnected,
  EntityOffline,
  UnsupportedClockSource,
  AemError,
  Recursive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaClockChain {
  pub nodes: Vec<ClockChainNode>,
  pub termination: ClockChainTermination,
}

fn entity_reachable(store: &EntityStore, id: EntityID) -> Option<ControlledEntityHandle> {
  let handle = store.find(id)?;
  let advertised = handle.lock().borrow().is_advertised();
  advertised.then_some(handle)
}

/// Walks the chain starting at `(entity_id, domain)`, following the clock
/// source reference rule set. Finite by construction: a `visited` set keyed
/// by `(EntityID, ClockDomainIndex)` detects recursion.
pub fn compute_chain(
  store: &EntityStore,
  start_entity: EntityID,
  start_domain: ClockDomainIndex,
) -> MediaClockChain {
  let mut nodes = Vec::new();
  let mut visited = BTreeSet::new();
  let mut current_entity = start_entity;
  let mut current_domain = start_domain;

  loop {
    if !visited.insert((current_entity, current_domain)) {
      return MediaClockChain {
        nodes,
        termination: ClockChainTermination::Recursive,
      };
    }
    nodes.push(ClockChainNode {
      entity_id: current_entity,
      clock_domain: current_domain,
    });

    let Some(handle) = entity_reachable(store, current_entity) else {
      return MediaClockChain {
        nodes,
        termination: ClockChainTermination::EntityOffline,
      };
    };
    let guard = handle.lock();
    let entity = guard.borrow();
    let Some(config) = entity.model.current_configuration() else {
      return MediaClockChain {
        nodes,
        termination: ClockChainTermination::AemError,
      };
    };
    if !config.clock_domains.contains_key(&current_domain.0) {
      return MediaClockChain {
        nodes,
        termination: ClockChainTermination::AemError,
      };
    }
    let Some(active_source_index) = entity.dynamic_clock_domain_source(current_domain) else {
      return MediaClockChain {
        nodes,
        termination: ClockChainTermination::AemError,
      };
    };
    let Some(source_desc) = config.clock_sources.get(&active_source_index.0) else {
      return MediaClockChain {
        nodes,
        termination: ClockChainTermination::AemError,
      };
    };

    match source_desc.source_type {
      ClockSourceType::Internal => {
        return MediaClockChain {
          nodes,
          termination: ClockChainTermination::Internal,
        }
      }
      ClockSourceType::External => {
        return MediaClockChain {
          nodes,
          termination: ClockChainTermination::External,
        }
      }
      ClockSourceType::Expansion => {
        return MediaClockChain {
          nodes,
          termination: ClockChainTermination::UnsupportedClockSource,
        }
      }
      ClockSourceType::InputStream => {
        let Some(stream_index) = source_desc.source_location else {
          return MediaClockChain {
            nodes,
            termination: ClockChainTermination::AemError,
          };
        };
        let Some(stream_dynamic) = entity.dynamic_stream_input(stream_index) else {
          return MediaClockChain {
            nodes,
            termination: ClockChainTermination::AemError,
          };
        };
        let Some((talker, talker_stream)) = stream_dynamic
          .connection_info
          .as_ref()
          .and_then(StreamInputConnectionInfo::connected_to)
        else {
          return MediaClockChain {
            nodes,
            termination: ClockChainTermination::StreamNotConnected,
          };
        };
        drop(guard);
        let Some(talker_handle) = entity_reachable(store, talker) else {
          return MediaClockChain {
            nodes,
            termination: ClockChainTermination::EntityOffline,
          };
        };
        let talker_guard = talker_handle.lock();
        let talker_entity = talker_guard.borrow();
        let Some(talker_config) = talker_entity.model.current_configuration() else {
          return MediaClockChain {
            nodes,
            termination: ClockChainTermination::AemError,
          };
        };
        let Some(talker_stream_desc) = talker_config.stream_outputs.get(&talker_stream.0) else {
          return MediaClockChain {
            nodes,
            termination: ClockChainTermination::AemError,
          };
        };
        current_domain = talker_stream_desc.clock_domain_index;
        current_entity = talker;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_store_terminates_offline() {
    let store = EntityStore::new();
    let chain = compute_chain(&store, EntityID(99), ClockDomainIndex(0));
    assert_eq!(chain.termination, ClockChainTermination::EntityOffline);
    assert_eq!(chain.nodes.len(), 1);
  }
}
