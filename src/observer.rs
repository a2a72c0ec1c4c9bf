//! Observer interface and the event-fanout channel.
//!
//! `ControllerObserver` is a defaulted-traversal analog applied to events
//! rather than tree nodes: every method has a no-op default, so adding a new
//! event kind doesn't break existing observers. `ControllerEventStream`
//! gives `futures`-based consumers a `Stream` front end over a plain bounded
//! channel, since this layer never touches a socket directly.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use futures::stream::Stream;
use log::trace;

use crate::entity::access_state::{AcquireState, LockState};
use crate::entity::compatibility::{CompatibilityFlags, MilanVersion};
use crate::graphs::clock_chain::MediaClockChain;
use crate::identifiers::{
  AudioUnitIndex, ClockDomainIndex, ClockSourceIndex, ClusterIndex, ControlIndex, EntityID,
  StreamIndex,
};
use crate::model::dynamic::StreamInputConnectionInfo;

/// Every event a `Controller` can fan out to observers. Carries just
/// enough identity for the observer to re-query the entity through the
/// Controller/EntityStore rather than embedding the whole record.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
  EntityOnline { entity_id: EntityID },
  EntityOffline { entity_id: EntityID },
  EntityUpdate { entity_id: EntityID },
  EntityModelEnumerated { entity_id: EntityID },
  CompatibilityChanged { entity_id: EntityID, flags: CompatibilityFlags, milan_version: MilanVersion },
  AcquireStateChanged { entity_id: EntityID, state: AcquireState, owner: Option<EntityID> },
  LockStateChanged { entity_id: EntityID, state: LockState, owner: Option<EntityID> },
  StreamInputConnectionChanged { entity_id: EntityID, stream_index: StreamIndex, info: StreamInputConnectionInfo, changed_by_other: bool },
  StreamOutputConnectionsChanged { entity_id: EntityID, stream_index: StreamIndex, listeners: BTreeSet<(EntityID, StreamIndex)> },
  StreamInputStarted { entity_id: EntityID, stream_index: StreamIndex },
  StreamInputStopped { entity_id: EntityID, stream_index: StreamIndex },
  StreamOutputStarted { entity_id: EntityID, stream_index: StreamIndex },
  StreamOutputStopped { entity_id: EntityID, stream_index: StreamIndex },
  EntityNameChanged { entity_id: EntityID, name: String },
  EntityGroupNameChanged { entity_id: EntityID, name: String },
  SamplingRateChanged { entity_id: EntityID, audio_unit_index: AudioUnitIndex },
  ClockSourceChanged { entity_id: EntityID, clock_domain_index: ClockDomainIndex, clock_source_index: ClockSourceIndex },
  ControlValuesChanged { entity_id: EntityID, control_index: ControlIndex },
  CountersChanged { entity_id: EntityID, descriptor_index: u16 },
  MediaClockChainChanged { entity_id: EntityID, clock_domain_index: ClockDomainIndex, chain: MediaClockChain },
  ChannelInputConnectionChanged { entity_id: EntityID, stream_port_index: crate::identifiers::StreamPortIndex, cluster_index: ClusterIndex },
  DiagnosticsChanged { entity_id: EntityID },
  IdentificationStarted { entity_id: EntityID },
  IdentificationStopped { entity_id: EntityID },
  UnsolicitedRegistrationChanged { entity_id: EntityID, registered: bool },
}

/// The observer trait. Every method defaults to a no-op so observers
/// only implement what they care about — the same defaulted-traversal
/// pattern used for tree visitors, applied here to events instead of
/// tree nodes.
#[allow(unused_variables)]
pub trait ControllerObserver: Send + Sync {
  fn on_event(&self, event: &ControllerEvent) {}
}

/// A `ControllerObserver` that forwards every event into a channel, used by
/// `Controller` to bridge synchronous observer dispatch into the
/// `ControllerEventStream` / `try_recv` front ends below.
pub(crate) struct ChannelObserver {
  sender: ControllerEventSender,
}

impl ChannelObserver {
  pub(crate) fn new(sender: ControllerEventSender) -> Self {
    Self { sender }
  }
}

impl ControllerObserver for ChannelObserver {
  fn on_event(&self, event: &ControllerEvent) {
    self.sender.send(event.clone());
  }
}

/// Creates a bound sender/receiver pair for `ControllerEvent`s: a synchronous
/// `try_recv` front end plus an async `Stream`, sharing one waker so an
/// async consumer is woken the moment an event lands without requiring a
/// dedicated OS-level readiness source — the networking executor pushes
/// directly, no socket is involved.
pub fn event_channel(capacity: usize) -> (ControllerEventSender, ControllerEventReceiver) {
  let (tx, rx) = mpsc::sync_channel(capacity.max(1));
  let waker = Arc::new(Mutex::new(None::<Waker>));
  (
    ControllerEventSender { tx, waker: Arc::clone(&waker) },
    ControllerEventReceiver { rx: Mutex::new(rx), waker },
  )
}

#[derive(Clone)]
pub struct ControllerEventSender {
  tx: mpsc::SyncSender<ControllerEvent>,
  waker: Arc<Mutex<Option<Waker>>>,
}

impl ControllerEventSender {
  /// Best-effort send: a full channel (no one draining it) is not an error —
  /// no one is required to be listening for controller events.
  pub fn send(&self, event: ControllerEvent) {
    match self.tx.try_send(event) {
      Ok(()) => {}
      Err(mpsc::TrySendError::Full(_)) => trace!("controller event channel full, dropping event"),
      Err(mpsc::TrySendError::Disconnected(_)) => trace!("controller event channel has no receiver"),
    }
    if let Some(w) = self.waker.lock().unwrap().take() {
      w.wake();
    }
  }
}

pub struct ControllerEventReceiver {
  rx: Mutex<mpsc::Receiver<ControllerEvent>>,
  waker: Arc<Mutex<Option<Waker>>>,
}

impl ControllerEventReceiver {
  pub fn try_recv(&self) -> Option<ControllerEvent> {
    self.rx.lock().unwrap().try_recv().ok()
  }

  pub fn as_stream(&self) -> ControllerEventStream<'_> {
    ControllerEventStream { receiver: self }
  }
}

/// The async front end for clients that prefer polling/async consumption
/// over callback registration.
pub struct ControllerEventStream<'a> {
  receiver: &'a ControllerEventReceiver,
}

impl Stream for ControllerEventStream<'_> {
  type Item = ControllerEvent;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    if let Some(event) = self.receiver.try_recv() {
      return Poll::Ready(Some(event));
    }
    *self.receiver.waker.lock().unwrap() = Some(cx.waker().clone());
    // Re-check after registering the waker to avoid a lost wakeup race
    // against a `send` that happened between the first `try_recv` and the
    // waker store above.
    if let Some(event) = self.receiver.try_recv() {
      return Poll::Ready(Some(event));
    }
    Poll::Pending
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn send_then_try_recv_round_trips() {
    let (tx, rx) = event_channel(4);
    tx.send(ControllerEvent::EntityOnline { entity_id: EntityID(1) });
    assert_eq!(rx.try_recv(), Some(ControllerEvent::EntityOnline { entity_id: EntityID(1) }));
    assert_eq!(rx.try_recv(), None);
  }

  #[test]
  fn full_channel_does_not_panic() {
    let (tx, _rx) = event_channel(1);
    tx.send(ControllerEvent::EntityOnline { entity_id: EntityID(1) });
    tx.send(ControllerEvent::EntityOffline { entity_id: EntityID(1) });
  }

  #[test]
  fn channel_observer_forwards_to_receiver() {
    let (tx, rx) = event_channel(4);
    let observer = ChannelObserver::new(tx);
    observer.on_event(&ControllerEvent::EntityUpdate { entity_id: EntityID(7) });
    assert_eq!(rx.try_recv(), Some(ControllerEvent::EntityUpdate { entity_id: EntityID(7) }));
  }
}
