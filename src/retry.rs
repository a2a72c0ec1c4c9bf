//! Failure Classifier & Retry Controller: maps protocol status codes
//! to a `FailureAction`, and tracks per-query-class retry budgets with
//! backoff.

use std::time::Duration;

use log::{debug, warn};
use rand::Rng;

/// A fixed outcome set. Protocol-layer status codes (AEM AECP, ACMP,
/// MVU — three parallel enums owned by the external Protocol Interface) are
/// classified into one of these by phase-specific handlers in
/// `crate::enumeration::classify`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
  NotAuthenticated,
  TimedOut,
  Busy,
  NotSupported,
  BadArguments,
  WarningContinue,
  ErrorContinue,
  MisbehaveContinue,
  ErrorFatal,
}

impl FailureAction {
  /// Whether this classification should be retried (subject to budget) as
  /// opposed to resolved immediately one way or the other.
  pub fn is_retriable(self) -> bool {
    matches!(self, FailureAction::TimedOut | FailureAction::Busy)
  }

  pub fn is_fatal(self) -> bool {
    matches!(self, FailureAction::ErrorFatal)
  }
}

/// Partitions retry counters by query class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum QueryClass {
  MilanInfo,
  Descriptor,
  DynamicInfo,
  DescriptorDynamicInfo,
  RegisterUnsolicited,
  CheckPackedDynamicInfo,
  GetPackedDynamicInfo,
}

impl QueryClass {
  /// Per-class attempt budget before a `TimedOut`/`Busy` classification is
  /// escalated instead of retried.
  pub fn budget(self) -> u32 {
    match self {
      QueryClass::MilanInfo => 2,
      QueryClass::Descriptor => 5,
      QueryClass::DynamicInfo => 5,
      QueryClass::DescriptorDynamicInfo => 3,
      QueryClass::RegisterUnsolicited => 2,
      QueryClass::CheckPackedDynamicInfo => 1,
      QueryClass::GetPackedDynamicInfo => 3,
    }
  }
}

/// Backoff policy: delay doubles per attempt up to a ceiling, with jitter.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
  pub base: Duration,
  pub ceiling: Duration,
}

impl Default for BackoffPolicy {
  fn default() -> Self {
    Self {
      base: Duration::from_millis(250),
      ceiling: Duration::from_secs(8),
    }
  }
}

impl BackoffPolicy {
  pub fn delay_for_attempt(self, attempt: u32) -> Duration {
    let exp = self.base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    let capped = exp.min(self.ceiling);
    let jitter_ms = rand::rng().random_range(0..=capped.as_millis().min(50) as u64);
    capped + Duration::from_millis(jitter_ms)
  }
}

/// One query class's outstanding attempt count against its budget.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCounter {
  attempts: u32,
}

impl RetryCounter {
  /// Records an attempt and decides whether to retry, per `class`'s budget
  /// and `policy`'s backoff. Returns `None` once the budget is exhausted
  /// (caller should escalate, typically to `ErrorFatal` or skip-and-continue
  /// depending on phase).
  pub fn record_and_decide(
    &mut self,
    class: QueryClass,
    policy: BackoffPolicy,
  ) -> Option<Duration> {
    self.attempts += 1;
    if self.attempts > class.budget() {
      warn!("{class:?} exhausted retry budget ({} attempts)", self.attempts);
      return None;
    }
    let delay = policy.delay_for_attempt(self.attempts - 1);
    debug!("{class:?} attempt {} scheduled in {delay:?}", self.attempts);
    Some(delay)
  }

  pub fn attempts(&self) -> u32 {
    self.attempts
  }
}

/// Per-entity retry state, one counter per query class.
#[derive(Debug, Clone, Default)]
pub struct RetryCounters {
  milan_info: RetryCounter,
  descriptor: RetryCounter,
  dynamic_info: RetryCounter,
  descriptor_dynamic_info: RetryCounter,
  register_unsolicited: RetryCounter,
  check_packed_dynamic_info: RetryCounter,
  get_packed_dynamic_info: RetryCounter,
}

impl RetryCounters {
  pub fn counter_mut(&mut self, class: QueryClass) -> &mut RetryCounter {
    match class {
      QueryClass::MilanInfo => &mut self.milan_info,
      QueryClass::Descriptor => &mut self.descriptor,
      QueryClass::DynamicInfo => &mut self.dynamic_info,
      QueryClass::DescriptorDynamicInfo => &mut self.descriptor_dynamic_info,
      QueryClass::RegisterUnsolicited => &mut self.register_unsolicited,
      QueryClass::CheckPackedDynamicInfo => &mut self.check_packed_dynamic_info,
      QueryClass::GetPackedDynamicInfo => &mut self.get_packed_dynamic_info,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn retry_counter_respects_budget() {
    let mut counter = RetryCounter::default();
    let policy = BackoffPolicy::default();
    let class = QueryClass::CheckPackedDynamicInfo;
    assert!(counter.record_and_decide(class, policy).is_some());
    assert!(counter.record_and_decide(class, policy).is_none());
  }

  #[test]
  fn backoff_grows_and_is_capped() {
    let policy = BackoffPolicy {
      base: Duration::from_millis(100),
      ceiling: Duration::from_millis(500),
    };
    let d0 = policy.delay_for_attempt(0);
    let d5 = policy.delay_for_attempt(5);
    assert!(d0 >= Duration::from_millis(100));
    assert!(d5 <= Duration::from_millis(550));
  }

  #[test]
  fn failure_action_classification() {
    assert!(FailureAction::TimedOut.is_retriable());
    assert!(FailureAction::Busy.is_retriable());
    assert!(!FailureAction::NotSupported.is_retriable());
    assert!(FailureAction::ErrorFatal.is_fatal());
  }
}
