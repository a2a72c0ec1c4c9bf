//! The three parallel wire-protocol status enums consumed by the Failure
//! Classifier: "three parallel enums" for AEM AECP, ACMP, and MVU.
//!
//! These mirror the status codes a real IEEE 1722.1 stack would report;
//! framing and transmission are out of scope, so only the
//! status vocabulary the classifier switches on is modeled here.

/// AECP status codes for AEM (`AEM_COMMAND`/`AEM_RESPONSE`) exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AemAecpStatus {
  Success,
  NotImplemented,
  NoSuchDescriptor,
  EntityLocked,
  EntityAcquired,
  NotAuthenticated,
  AuthenticationDisabled,
  BadArguments,
  NoResources,
  InProgress,
  EntityMisbehaving,
  NotSupported,
  StreamIsRunning,
}

/// ACMP status codes for CONNECT_TX/RX, DISCONNECT_TX/RX, GET_TX/RX_STATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcmpStatus {
  Success,
  ListenerUnknownID,
  TalkerUnknownID,
  TalkerDestMacFail,
  TalkerNoStreamIndex,
  TalkerNoBandwidth,
  TalkerExclusive,
  ListenerTalkerTimeout,
  ListenerExclusive,
  StateUnavailable,
  NotConnected,
  NoSuchConnection,
  CouldNotSendMessage,
  TalkerMisbehaving,
  ListenerMisbehaving,
  NotSupported,
}

/// MVU (vendor-unique, Milan) status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MvuStatus {
  Success,
  NotImplemented,
  NotSupported,
  BadArguments,
  InProgress,
  EntityMisbehaving,
}

/// The `FailureAction` mapping is split per protocol since each status
/// enum's membership differs. `Success` classifications never reach the
/// classifier — only failures are mapped.
pub trait ClassifiableStatus {
  fn is_success(self) -> bool;
  fn classify(self) -> crate::retry::FailureAction;
}

impl ClassifiableStatus for AemAecpStatus {
  fn is_success(self) -> bool {
    matches!(self, AemAecpStatus::Success)
  }

  fn classify(self) -> crate::retry::FailureAction {
    use crate::retry::FailureAction as FA;
    match self {
      AemAecpStatus::Success => unreachable!("classify() is only called on failures"),
      AemAecpStatus::NotAuthenticated | AemAecpStatus::AuthenticationDisabled => FA::NotAuthenticated,
      AemAecpStatus::InProgress => FA::TimedOut,
      AemAecpStatus::EntityLocked | AemAecpStatus::EntityAcquired | AemAecpStatus::NoResources => FA::Busy,
      AemAecpStatus::NotImplemented | AemAecpStatus::NotSupported | AemAecpStatus::NoSuchDescriptor => {
        FA::NotSupported
      }
      AemAecpStatus::BadArguments => FA::BadArguments,
      AemAecpStatus::StreamIsRunning => FA::WarningContinue,
      AemAecpStatus::EntityMisbehaving => FA::MisbehaveContinue,
    }
  }
}

impl ClassifiableStatus for AcmpStatus {
  fn is_success(self) -> bool {
    matches!(self, AcmpStatus::Success)
  }

  fn classify(self) -> crate::retry::FailureAction {
    use crate::retry::FailureAction as FA;
    match self {
      AcmpStatus::Success => unreachable!("classify() is only called on failures"),
      AcmpStatus::ListenerTalkerTimeout => FA::TimedOut,
      AcmpStatus::TalkerExclusive | AcmpStatus::ListenerExclusive | AcmpStatus::StateUnavailable => FA::Busy,
      AcmpStatus::NotSupported => FA::NotSupported,
      AcmpStatus::ListenerUnknownID
      | AcmpStatus::TalkerUnknownID
      | AcmpStatus::TalkerDestMacFail
      | AcmpStatus::TalkerNoStreamIndex
      | AcmpStatus::TalkerNoBandwidth
      | AcmpStatus::NotConnected
      | AcmpStatus::NoSuchConnection
      | AcmpStatus::CouldNotSendMessage => FA::BadArguments,
      AcmpStatus::TalkerMisbehaving | AcmpStatus::ListenerMisbehaving => FA::MisbehaveContinue,
    }
  }
}

impl ClassifiableStatus for MvuStatus {
  fn is_success(self) -> bool {
    matches!(self, MvuStatus::Success)
  }

  fn classify(self) -> crate::retry::FailureAction {
    use crate::retry::FailureAction as FA;
    match self {
      MvuStatus::Success => unreachable!("classify() is only called on failures"),
      MvuStatus::InProgress => FA::TimedOut,
      MvuStatus::NotImplemented | MvuStatus::NotSupported => FA::NotSupported,
      MvuStatus::BadArguments => FA::BadArguments,
      MvuStatus::EntityMisbehaving => FA::MisbehaveContinue,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn aem_busy_statuses_classify_as_busy() {
    assert_eq!(AemAecpStatus::EntityLocked.classify(), crate::retry::FailureAction::Busy);
    assert_eq!(AemAecpStatus::EntityAcquired.classify(), crate::retry::FailureAction::Busy);
  }

  #[test]
  fn acmp_timeout_is_retriable() {
    assert_eq!(AcmpStatus::ListenerTalkerTimeout.classify(), crate::retry::FailureAction::TimedOut);
  }

  #[test]
  fn mvu_misbehaving_sets_misbehave_continue() {
    assert_eq!(MvuStatus::EntityMisbehaving.classify(), crate::retry::FailureAction::MisbehaveContinue);
  }
}
