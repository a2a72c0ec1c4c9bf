//! Compatibility flags, Milan version tracking, and the flag-transition
//! rules enforced by the Compatibility Validator.

use chrono::{DateTime, Utc};
use enumflags2::{bitflags, BitFlags};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Subset of `{ IEEE17221, IEEE17221Warning, Milan, MilanWarning,
/// Misbehaving }`. Milan implies IEEE17221; Misbehaving implies
/// neither.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompatibilityFlag {
  Ieee17221 = 1 << 0,
  Ieee17221Warning = 1 << 1,
  Milan = 1 << 2,
  MilanWarning = 1 << 3,
  Misbehaving = 1 << 4,
}

pub type CompatibilityFlags = BitFlags<CompatibilityFlag>;

/// `major.minor` Milan revision (1.0 through 1.3 at time of writing). `0.0`
/// means "no Milan compatibility claimed".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MilanVersion {
  pub major: u8,
  pub minor: u8,
}

impl MilanVersion {
  pub const NONE: MilanVersion = MilanVersion { major: 0, minor: 0 };

  pub fn new(major: u8, minor: u8) -> Self {
    Self { major, minor }
  }

  pub fn is_none(self) -> bool {
    self == Self::NONE
  }
}

impl std::fmt::Display for MilanVersion {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}.{}", self.major, self.minor)
  }
}

/// One audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompatibilityChangedEvent {
  pub timestamp: DateTime<Utc>,
  pub clause: Option<String>,
  pub message: String,
}

/// A single entry in the per-Milan-version mandatory-command rule list
///. Rules are sorted ascending by
/// `required_since` and must not overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MilanRequirementRule {
  pub required_since: MilanVersion,
  pub required_until: Option<MilanVersion>,
  pub downgrade_to: Option<MilanVersion>,
}

impl MilanRequirementRule {
  fn contains(&self, version: MilanVersion) -> bool {
    version >= self.required_since && self.required_until.is_none_or(|until| version <= until)
  }
}

/// Per-entity compatibility posture plus its audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatibilityState {
  pub flags: CompatibilityFlags,
  pub milan_version: MilanVersion,
  pub audit_log: Vec<CompatibilityChangedEvent>,
}

impl CompatibilityState {
  fn record(&mut self, clause: Option<&str>, message: impl Into<String>) {
    let message = message.into();
    debug!("compatibility change: {message}");
    self.audit_log.push(CompatibilityChangedEvent {
      timestamp: Utc::now(),
      clause: clause.map(str::to_string),
      message,
    });
  }

  /// Adds a flag, enforcing the add-flag transition rules. Returns
  /// whether the flag set actually changed.
  pub fn add_flag(&mut self, flag: CompatibilityFlag, clause: Option<&str>) -> bool {
    match flag {
      CompatibilityFlag::Ieee17221 => {
        if self.flags.contains(CompatibilityFlag::Misbehaving) {
          warn!("refusing to add IEEE17221 to a Misbehaving entity");
          return false;
        }
      }
      CompatibilityFlag::Milan => {
        if self.flags.contains(CompatibilityFlag::Misbehaving) {
          warn!("refusing to add Milan to a Misbehaving entity");
          return false;
        }
        self.flags.insert(CompatibilityFlag::Ieee17221);
      }
      CompatibilityFlag::Ieee17221Warning => {
        if !self.flags.contains(CompatibilityFlag::Ieee17221) {
          warn!("refusing to add IEEE17221Warning without IEEE17221 present");
          return false;
        }
      }
      CompatibilityFlag::MilanWarning => {
        if !self.flags.contains(CompatibilityFlag::Milan) {
          warn!("refusing to add MilanWarning without Milan present");
          return false;
        }
      }
      CompatibilityFlag::Misbehaving => {
        // §3 invariant 3: Misbehaving implies neither IEEE17221 nor Milan.
        if self.flags.contains(CompatibilityFlag::Ieee17221) {
          self.flags.remove(CompatibilityFlag::Ieee17221);
          self.flags.remove(CompatibilityFlag::Milan);
          self.record(clause, "cascaded: cleared IEEE17221 and Milan due to Misbehaving");
        } else if self.flags.contains(CompatibilityFlag::Milan) {
          self.flags.remove(CompatibilityFlag::Milan);
          self.record(clause, "cascaded: cleared Milan due to Misbehaving");
        }
        self.milan_version = MilanVersion::NONE;
      }
    }
    if self.flags.contains(flag) {
      return false;
    }
    self.flags.insert(flag);
    self.record(clause, format!("added {flag:?}"));
    true
  }

  /// Removes a flag, enforcing the remove-flag transition rules.
  /// Warning and Misbehaving flags cannot be removed.
  pub fn remove_flag(&mut self, flag: CompatibilityFlag, clause: Option<&str>) -> bool {
    match flag {
      CompatibilityFlag::Ieee17221Warning
      | CompatibilityFlag::MilanWarning
      | CompatibilityFlag::Misbehaving => {
        warn!("{flag:?} cannot be removed once set");
        return false;
      }
      CompatibilityFlag::Ieee17221 => {
        if !self.flags.contains(flag) {
          return false;
        }
        self.flags.remove(CompatibilityFlag::Ieee17221);
        self.flags.remove(CompatibilityFlag::Milan);
        self.milan_version = MilanVersion::NONE;
        self.record(clause, "removed IEEE17221 (cascaded: cleared Milan)");
        return true;
      }
      CompatibilityFlag::Milan => {}
    }
    if !self.flags.contains(flag) {
      return false;
    }
    self.flags.remove(flag);
    self.record(clause, format!("removed {flag:?}"));
    true
  }

  /// Downgrades the Milan version, monotonic-only-downward. A target of
  /// `0.0` removes Milan entirely. No-op if
  /// `new_version >= self.milan_version`.
  pub fn downgrade_milan_version(&mut self, new_version: MilanVersion, clause: Option<&str>) {
    if new_version >= self.milan_version {
      return;
    }
    let previous = self.milan_version;
    self.milan_version = new_version;
    if new_version.is_none() {
      self.remove_flag(CompatibilityFlag::Milan, clause);
    } else {
      self.record(
        clause,
        format!("downgraded Milan version {previous} -> {new_version}"),
      );
    }
  }

  /// Evaluates a sorted, non-overlapping Milan requirement rule list
  /// against the current version and applies the first matching
  /// downgrade, if any.
  pub fn apply_milan_requirement_rules(
    &mut self,
    rules: &[MilanRequirementRule],
    clause: Option<&str>,
  ) {
    if self.milan_version.is_none() {
      return;
    }
    for (i, rule) in rules.iter().enumerate() {
      if rule.contains(self.milan_version) {
        let target = rule.downgrade_to.unwrap_or_else(|| {
          i.checked_sub(1)
            .and_then(|prev| rules.get(prev))
            .map(|prev| prev.required_until.unwrap_or(prev.required_since))
            .unwrap_or(MilanVersion::NONE)
        });
        self.downgrade_milan_version(target, clause);
        return;
      }
    }
  }
}
