//! The networking executor: a single
//! background thread that runs every protocol-callback continuation and
//! owns the delayed (retry) query queue.
//!
//! Built on `mio_06` + `mio-extras`: a `mio_extras::channel` carries jobs
//! in, and `mio_06::Poll` wakes the thread either when a job arrives or
//! when the next delayed entry's deadline elapses, whichever is sooner. Raw
//! socket I/O is out of scope — this executor only ever
//! polls the job channel, never a network socket.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::io;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use log::{debug, error, trace};
use mio_06::{Events, Poll, PollOpt, Ready, Token};
use mio_extras::channel as mio_channel;

use crate::identifiers::EntityID;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

const JOB_TOKEN: Token = Token(0);

enum ExecutorMessage {
  Run(Job),
  Delay { fire_at: Instant, entity_id: Option<EntityID>, thunk: Job },
  Shutdown,
}

struct DelayedEntry {
  fire_at: Instant,
  seq: u64,
  entity_id: Option<EntityID>,
  thunk: Job,
}

impl PartialEq for DelayedEntry {
  fn eq(&self, other: &Self) -> bool {
    self.fire_at == other.fire_at && self.seq == other.seq
  }
}
impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// Reversed so `BinaryHeap` (a max-heap) pops the *earliest* deadline first.
impl Ord for DelayedEntry {
  fn cmp(&self, other: &Self) -> Ordering {
    other
      .fire_at
      .cmp(&self.fire_at)
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

/// Handle to the background thread plus its job sender. Dropping/`shutdown`
/// drains the delayed-query queue and joins the thread, releasing sockets.
pub struct NetworkingExecutor {
  job_sender: mio_channel::Sender<ExecutorMessage>,
  handle: Option<JoinHandle<()>>,
}

impl NetworkingExecutor {
  pub fn start(name: impl Into<String>) -> io::Result<Self> {
    let (sender, receiver) = mio_channel::channel::<ExecutorMessage>();
    let poll = Poll::new()?;
    poll.register(&receiver, JOB_TOKEN, Ready::readable(), PollOpt::edge())?;

    let handle = std::thread::Builder::new()
      .name(name.into())
      .spawn(move || Self::run(poll, receiver))?;

    Ok(Self { job_sender: sender, handle: Some(handle) })
  }

  /// Schedules `job` to run on the executor as soon as it's next polled.
  pub fn spawn(&self, job: impl FnOnce() + Send + 'static) {
    if self.job_sender.send(ExecutorMessage::Run(Box::new(job))).is_err() {
      error!("networking executor is shut down; dropping job");
    }
  }

  /// Schedules `job` to run no earlier than `delay` from now, by inserting a
  /// (fireAt, entityID, thunk) tuple into a time-ordered queue.
  pub fn spawn_delayed(
    &self,
    delay: Duration,
    entity_id: Option<EntityID>,
    job: impl FnOnce() + Send + 'static,
  ) {
    let message = ExecutorMessage::Delay {
      fire_at: Instant::now() + delay,
      entity_id,
      thunk: Box::new(job),
    };
    if self.job_sender.send(message).is_err() {
      error!("networking executor is shut down; dropping delayed job");
    }
  }

  /// Drains the delayed queue and joins the thread.
  pub fn shutdown(&mut self) {
    let _ = self.job_sender.send(ExecutorMessage::Shutdown);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }

  fn run(poll: Poll, receiver: mio_channel::Receiver<ExecutorMessage>) {
    let mut events = Events::with_capacity(64);
    let mut delayed: BinaryHeap<DelayedEntry> = BinaryHeap::new();
    let mut seq_counter: u64 = 0;

    'outer: loop {
      let timeout = delayed
        .peek()
        .map(|entry| entry.fire_at.saturating_duration_since(Instant::now()));

      if let Err(e) = poll.poll(&mut events, timeout) {
        error!("networking executor poll failed: {e}");
        break;
      }

      for event in &events {
        if event.token() == JOB_TOKEN {
          loop {
            match receiver.try_recv() {
              Ok(ExecutorMessage::Run(thunk)) => thunk(),
              Ok(ExecutorMessage::Delay { fire_at, entity_id, thunk }) => {
                seq_counter += 1;
                trace!("scheduled delayed job for {entity_id:?} at {fire_at:?}");
                delayed.push(DelayedEntry { fire_at, seq: seq_counter, entity_id, thunk });
              }
              Ok(ExecutorMessage::Shutdown) => break 'outer,
              Err(_) => break,
            }
          }
        }
      }

      let now = Instant::now();
      while let Some(entry) = delayed.peek() {
        if entry.fire_at > now {
          break;
        }
        let entry = delayed.pop().expect("peeked Some above");
        (entry.thunk)();
      }
    }
    debug!("networking executor thread exiting");
  }
}

impl Drop for NetworkingExecutor {
  fn drop(&mut self) {
    self.shutdown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::mpsc;
  use std::time::Duration;

  #[test]
  fn immediate_job_runs() {
    let executor = NetworkingExecutor::start("test-exec-immediate").unwrap();
    let (tx, rx) = mpsc::channel();
    executor.spawn(move || tx.send(42).unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
  }

  #[test]
  fn delayed_job_runs_after_earlier_immediate_jobs() {
    let executor = NetworkingExecutor::start("test-exec-delayed").unwrap();
    let (tx, rx) = mpsc::channel();
    let tx2 = tx.clone();
    executor.spawn_delayed(Duration::from_millis(10), Some(EntityID(1)), move || {
      tx2.send("delayed").unwrap()
    });
    executor.spawn(move || tx.send("immediate").unwrap());
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "immediate");
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "delayed");
  }
}
