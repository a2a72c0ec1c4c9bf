//! Channel connections: per `StreamPortInput`, an
//! audio-mapping table resolves each (local cluster, channel) to a (stream,
//! streamChannel) pair and, across the talker hop, to the talker cluster.
//!
//! `StreamPortDynamicState::dynamic_mappings` already holds the effective
//! mapping list for a stream port regardless of whether it came from a fixed
//! `AudioMapDescriptor` or `ADD/REMOVE_STREAM_PORT_MAPPINGS`, so this module
//! never touches the static `audio_maps` table directly — it only crosses
//! the stream-connection hop.

use std::collections::BTreeMap;

use crate::identifiers::{ClusterIndex, EntityID, StreamIndex, StreamPortIndex};
use crate::model::dynamic::StreamInputConnectionInfo;
use crate::store::EntityStore;

/// One listener-side mapping, resolved across the stream connection (if any)
/// to the talker's cluster/channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConnection {
  pub listener_cluster: ClusterIndex,
  pub listener_channel: u16,
  pub stream: StreamIndex,
  pub stream_channel: u16,
  pub talker: Option<ResolvedTalkerChannel>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedTalkerChannel {
  pub entity_id: EntityID,
  pub stream_port: StreamPortIndex,
  pub cluster: ClusterIndex,
  pub channel: u16,
}

/// Tracks the resolved channel-connection list for every `(entity,
/// StreamPortInput)` seen so far. Recomputed incrementally: a mapping
/// add/remove or a stream connect/disconnect transition recomputes just the
/// affected stream port: updates occur on mapping add/remove (local and
/// remote) and on stream connect/disconnect transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelConnectionsGraph {
  entries: BTreeMap<(EntityID, StreamPortIndex), Vec<ChannelConnection>>,
}

impl ChannelConnectionsGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn channel_connections(
    &self,
    entity_id: EntityID,
    stream_port: StreamPortIndex,
  ) -> &[ChannelConnection] {
    self
      .entries
      .get(&(entity_id, stream_port))
      .map(Vec::as_slice)
      .unwrap_or(&[])
  }

  /// Recomputes the resolved mapping list for one listener-side stream port.
  /// A (Not->Conn), (Conn->Not), or (Conn->Conn') transition (the latter
  /// treated as disconnect-then-reconnect) is handled by simply
  /// recomputing from current state; legacy FastConnect never changes
  /// `connection_info` so it is naturally a no-op here.
  pub fn recompute_stream_port(
    &mut self,
    store: &EntityStore,
    entity_id: EntityID,
    stream_port: StreamPortIndex,
  ) {
    let Some(handle) = store.find(entity_id) else {
      self.entries.remove(&(entity_id, stream_port));
      return;
    };
    let guard = handle.lock();
    let entity = guard.borrow();
    let Some(port_state) = entity.dynamic.stream_ports.get(&(true, stream_port.0)) else {
      drop(guard);
      self.entries.remove(&(entity_id, stream_port));
      return;
    };
    let mappings = port_state.dynamic_mappings.clone();
    drop(guard);

    let mut connections = Vec::with_capacity(mappings.len());
    for mapping in mappings {
      let talker = resolve_talker_channel(store, entity_id, mapping.stream_index, mapping.stream_channel);
      connections.push(ChannelConnection {
        listener_cluster: mapping.cluster_offset,
        listener_channel: mapping.cluster_channel,
        stream: mapping.stream_index,
        stream_channel: mapping.stream_channel,
        talker,
      });
    }

    if connections.is_empty() {
      self.entries.remove(&(entity_id, stream_port));
    } else {
      self.entries.insert((entity_id, stream_port), connections);
    }
  }

  pub fn forget_entity(&mut self, entity_id: EntityID) {
    self.entries.retain(|(id, _), _| *id != entity_id);
    for connections in self.entries.values_mut() {
      for connection in connections.iter_mut() {
        if connection.talker.is_some_and(|t| t.entity_id == entity_id) {
          connection.talker = None;
        }
      }
    }
  }
}

fn resolve_talker_channel(
  store: &EntityStore,
  listener_id: EntityID,
  listener_stream: StreamIndex,
  stream_channel: u16,
) -> Option<ResolvedTalkerChannel> {
  let listener_handle = store.find(listener_id)?;
  let listener_guard = listener_handle.lock();
  let listener = listener_guard.borrow();
  let connection_info = listener.dynamic_stream_input(listener_stream)?.connection_info.as_ref()?;
  let (talker_id, talker_stream) = connection_info.connected_to()?;
  drop(listener_guard);

  let talker_handle = store.find(talker_id)?;
  let talker_guard = talker_handle.lock();
  let talker = talker_guard.borrow();
  for (&(is_input, port_index), port_state) in &talker.dynamic.stream_ports {
    if is_input {
      continue;
    }
    for mapping in &port_state.dynamic_mappings {
      if mapping.stream_index == talker_stream && mapping.stream_channel == stream_channel {
        return Some(ResolvedTalkerChannel {
          entity_id: talker_id,
          stream_port: StreamPortIndex(port_index),
          cluster: mapping.cluster_offset,
          channel: mapping.cluster_channel,
        });
      }
    }
  }
  None
}
