//! Phase-specific failure handlers. Separate handlers exist for each
//! enumeration phase because each encodes distinct recovery logic.
//!
//! [`crate::retry::FailureAction`] already captures the protocol-status ->
//! action mapping; this module adds the second axis, phase-specific
//! *consequences* of a terminal (non-retried, or retry-budget-exhausted)
//! classification.

use crate::entity::enumeration_state::EnumerationPhase;
use crate::retry::FailureAction;

/// What the engine should do once a query's classification is final (either
/// immediately non-retriable, or a retriable action that exhausted its
/// budget).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseOutcome {
  /// Record as unsupported/skipped and continue enumeration normally.
  Continue,
  /// As `Continue`, but the phase handler additionally requires a Milan
  /// compatibility downgrade (engine applies via the compatibility state).
  ContinueAndDowngradeMilan,
  /// Abort enumeration entirely; the entity will not advertise.
  Fatal,
  /// Cached-static-model fallback: substitute a full descriptor fetch for
  /// the failing cached-dynamic-info query.
  FallbackToFullDescriptor,
  /// Cached-static-model fallback: abandon the cache and restart from the
  /// static-model phase.
  RestartFromStaticModel,
  /// Disable the packed fast path and restart `GetDynamicInfo` using
  /// individual commands.
  DisablePackedFastPath,
}

/// Budget-exhausted escalation for a retriable action, per phase. A
/// `TimedOut`/`Busy` classification that has used up its class budget
/// escalates differently depending on which phase it occurred in: the
/// mandatory early phases (Milan info, packed-info probe, unsolicited
/// registration) simply give up on that one query and continue, while a
/// timeout deep in static-model or dynamic-info fetches is fatal (the
/// entity cannot be usefully enumerated without it).
fn escalate_exhausted_retry(phase: EnumerationPhase) -> PhaseOutcome {
  match phase {
    EnumerationPhase::GetMilanInfo
    | EnumerationPhase::CheckPackedDynamicInfoSupported
    | EnumerationPhase::RegisterUnsolicited => PhaseOutcome::Continue,
    EnumerationPhase::GetStaticModel => PhaseOutcome::Fatal,
    EnumerationPhase::GetDescriptorDynamicInfo => PhaseOutcome::FallbackToFullDescriptor,
    EnumerationPhase::GetDynamicInfo => PhaseOutcome::Fatal,
  }
}

/// Resolves a terminal `FailureAction` for `phase` into a `PhaseOutcome`.
/// Callers must have already exhausted (or bypassed) the retry budget for
/// `TimedOut`/`Busy` — this function never itself schedules a retry.
pub fn classify_phase_failure(phase: EnumerationPhase, action: FailureAction) -> PhaseOutcome {
  match action {
    FailureAction::TimedOut | FailureAction::Busy => escalate_exhausted_retry(phase),
    FailureAction::NotAuthenticated => PhaseOutcome::Continue,
    FailureAction::NotSupported => match phase {
      // A Milan 1.3+ device is required to support the packed fast path;
      // absence downgrades Milan compatibility.
      EnumerationPhase::CheckPackedDynamicInfoSupported => PhaseOutcome::ContinueAndDowngradeMilan,
      // A Milan device rejecting unsolicited registration also downgrades.
      EnumerationPhase::RegisterUnsolicited => PhaseOutcome::ContinueAndDowngradeMilan,
      _ => PhaseOutcome::Continue,
    },
    FailureAction::BadArguments => PhaseOutcome::Continue,
    FailureAction::WarningContinue => PhaseOutcome::Continue,
    FailureAction::ErrorContinue => PhaseOutcome::Continue,
    FailureAction::MisbehaveContinue => match phase {
      EnumerationPhase::GetDynamicInfo => PhaseOutcome::DisablePackedFastPath,
      _ => PhaseOutcome::Continue,
    },
    FailureAction::ErrorFatal => PhaseOutcome::Fatal,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn packed_probe_not_supported_downgrades_milan() {
    let outcome = classify_phase_failure(
      EnumerationPhase::CheckPackedDynamicInfoSupported,
      FailureAction::NotSupported,
    );
    assert_eq!(outcome, PhaseOutcome::ContinueAndDowngradeMilan);
  }

  #[test]
  fn static_model_exhausted_timeout_is_fatal() {
    let outcome = classify_phase_failure(EnumerationPhase::GetStaticModel, FailureAction::TimedOut);
    assert_eq!(outcome, PhaseOutcome::Fatal);
  }

  #[test]
  fn descriptor_dynamic_info_exhausted_timeout_falls_back() {
    let outcome =
      classify_phase_failure(EnumerationPhase::GetDescriptorDynamicInfo, FailureAction::TimedOut);
    assert_eq!(outcome, PhaseOutcome::FallbackToFullDescriptor);
  }

  #[test]
  fn misbehaving_during_dynamic_info_disables_packed_path() {
    let outcome =
      classify_phase_failure(EnumerationPhase::GetDynamicInfo, FailureAction::MisbehaveContinue);
    assert_eq!(outcome, PhaseOutcome::DisablePackedFastPath);
  }

  #[test]
  fn error_fatal_is_always_fatal() {
    for phase in EnumerationPhase::ALL_IN_ORDER {
      assert_eq!(classify_phase_failure(phase, FailureAction::ErrorFatal), PhaseOutcome::Fatal);
    }
  }
}
