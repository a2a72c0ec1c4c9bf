//! Talker → listener stream-connection sets.

use std::collections::{BTreeMap, BTreeSet};

use crate::identifiers::{EntityID, StreamIndex};

/// Every StreamOutput owns a set of listeners currently connected to it.
#[derive(Debug, Clone, Default)]
pub struct StreamConnectionsGraph {
  talkers: BTreeMap<(EntityID, StreamIndex), BTreeSet<(EntityID, StreamIndex)>>,
}

impl StreamConnectionsGraph {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn connect(
    &mut self,
    talker: EntityID,
    talker_stream: StreamIndex,
    listener: EntityID,
    listener_stream: StreamIndex,
  ) {
    self
      .talkers
      .entry((talker, talker_stream))
      .or_default()
      .insert((listener, listener_stream));
  }

  pub fn disconnect(
    &mut self,
    talker: EntityID,
    talker_stream: StreamIndex,
    listener: EntityID,
    listener_stream: StreamIndex,
  ) {
    if let Some(set) = self.talkers.get_mut(&(talker, talker_stream)) {
      set.remove(&(listener, listener_stream));
    }
  }

  /// Removes every listener entry for a talker stream, e.g. when the talker
  /// itself goes offline.
  pub fn clear_talker_stream(&mut self, talker: EntityID, talker_stream: StreamIndex) {
    self.talkers.remove(&(talker, talker_stream));
  }

  /// Drops every connection referencing `entity`, whichever side it plays.
  pub fn forget_entity(&mut self, entity: EntityID) {
    self.talkers.retain(|(talker, _), _| *talker != entity);
    for set in self.talkers.values_mut() {
      set.retain(|(listener, _)| *listener != entity);
    }
  }

  pub fn listeners_of(&self, talker: EntityID, talker_stream: StreamIndex) -> BTreeSet<(EntityID, StreamIndex)> {
    self.talkers.get(&(talker, talker_stream)).cloned().unwrap_or_default()
  }

  pub fn is_connected(
    &self,
    talker: EntityID,
    talker_stream: StreamIndex,
    listener: EntityID,
    listener_stream: StreamIndex,
  ) -> bool {
    self
      .talkers
      .get(&(talker, talker_stream))
      .map(|set| set.contains(&(listener, listener_stream)))
      .unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn connect_then_disconnect_round_trips() {
    let mut g = StreamConnectionsGraph::new();
    let t = EntityID(1);
    let l = EntityID(2);
    g.connect(t, StreamIndex(0), l, StreamIndex(0));
    assert!(g.is_connected(t, StreamIndex(0), l, StreamIndex(0)));
    g.disconnect(t, StreamIndex(0), l, StreamIndex(0));
    assert!(!g.is_connected(t, StreamIndex(0), l, StreamIndex(0)));
  }

  #[test]
  fn forget_entity_drops_both_sides() {
    let mut g = StreamConnectionsGraph::new();
    let t = EntityID(1);
    let l = EntityID(2);
    g.connect(t, StreamIndex(0), l, StreamIndex(0));
    g.forget_entity(l);
    assert!(g.listeners_of(t, StreamIndex(0)).is_empty());
  }
}
