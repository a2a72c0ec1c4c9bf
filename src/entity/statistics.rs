//! Per-entity AECP/unsolicited statistics: retry counts, average response
//! time, and total enumeration time, surfaced through snapshots and used by
//! the retry controller to size backoff decisions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
  pub aecp_retry_count: u64,
  pub aecp_timeout_count: u64,
  pub aecp_unexpected_response_count: u64,
  /// Running average, in nanoseconds, of AECP round-trip time.
  pub aecp_average_response_time_ns: f64,
  pub aem_unsolicited_count: u64,
  pub aem_unsolicited_loss_count: u64,
  pub mvu_unsolicited_count: u64,
  pub mvu_unsolicited_loss_count: u64,
  pub enumeration_time_ns: u64,
}

impl Statistics {
  pub fn record_retry(&mut self) {
    self.aecp_retry_count += 1;
  }

  pub fn record_timeout(&mut self) {
    self.aecp_timeout_count += 1;
  }

  pub fn record_unexpected_response(&mut self) {
    self.aecp_unexpected_response_count += 1;
  }

  /// Incorporates a new response-time sample into the running average
  /// using a simple cumulative-average update (n-th sample weighting).
  pub fn record_response_time(&mut self, sample: Duration, sample_count: u64) {
    let sample_ns = sample.as_nanos() as f64;
    if sample_count == 0 {
      self.aecp_average_response_time_ns = sample_ns;
    } else {
      let n = sample_count as f64;
      self.aecp_average_response_time_ns =
        (self.aecp_average_response_time_ns * n + sample_ns) / (n + 1.0);
    }
  }

  pub fn record_enumeration_time(&mut self, elapsed: Duration) {
    self.enumeration_time_ns = elapsed.as_nanos() as u64;
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn running_average_converges_toward_samples() {
    let mut s = Statistics::default();
    s.record_response_time(Duration::from_millis(10), 0);
    s.record_response_time(Duration::from_millis(20), 1);
    assert!((s.aecp_average_response_time_ns - 15_000_000.0).abs() < 1.0);
  }
}
