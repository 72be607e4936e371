//! Initial-checks state machine (§4.G).
//!
//! The original nested-if chain for "does this display actually speak
//! DDC/CI, and how does it spell unsupported-feature" is re-expressed
//! here as an explicit probe → classify → set-flags pipeline, per the
//! redesign note in §9: each state function takes the relevant part of
//! the display's accumulated evidence and returns the next state.
//!
//! The probes themselves go through [`crate::retry::retry_loop`] (see
//! `lib.rs::probe_feature`), not a single one-shot exchange: only a
//! retried, aggregated result can distinguish DDC-busy and
//! heterogeneous-retry-failure from a plain communication failure, and
//! `Start` needs exactly that distinction.

use log::debug;

use crate::error::{DdcStatus, ErrorInfo};
use crate::registry::DisplayFlags;

/// Feature 0x00, probed first (§4.G `Start`): every MCCS display either
/// answers it, flags it unsupported, or goes quiet, and how it does so
/// is itself the first piece of evidence.
pub(crate) const PROBE_INITIAL_FEATURE: u8 = 0x00;
/// Brightness, a feature essentially every display implements, probed
/// in `ProbeKnownFeature` once feature 0x00 went quiet — a known-good
/// feature should never also go quiet unless the display uses
/// null-response as its unsupported marker.
pub(crate) const PROBE_EXPECTED_FEATURE: u8 = 0x10;
/// A well-known feature absent from every MCCS display, probed in
/// `ProbeZeroPattern` to learn whether this display answers
/// "unsupported" with an all-zero reply instead of the DDC-level flag.
pub(crate) const PROBE_UNSUPPORTED_FEATURE: u8 = 0x41;
/// MCCS version code (§4.G "queried after the machine terminates").
pub(crate) const MCCS_VERSION_FEATURE: u8 = 0xdf;

/// Outcome of probing one VCP feature through a retried exchange,
/// already collapsed from whatever [`DdcStatus`] the retry classifier
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// A valid reply whose VCP value was exactly zero.
    ZeroValue,
    /// A valid reply with a non-zero VCP value.
    NonZeroValue,
    /// The display answered with its DDC-level "unsupported" flag.
    ReportedUnsupported,
    /// Every attempt (after retry) came back a null response.
    AllResponsesNull,
    /// The bus reported DDC-busy.
    Busy,
    /// Retries were exhausted with no single dominant cause.
    RetriesExhaustedHeterogeneous,
    /// Some other, non-retry-classified failure (bad checksum, I/O, ...).
    CommunicationFailed,
}

/// The explicit state machine driving initial checks. `Start` runs once
/// per newly discovered display; each subsequent state corresponds to
/// one phase named in §4.G.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitialCheckState {
    Start,
    ProbeKnownFeature,
    ProbeZeroPattern,
    QueryMccsVersion,
    Done,
}

/// Accumulated evidence threaded through the state machine; becomes the
/// [`DisplayFlags`] written back onto the `DisplayRef` once `Done`.
#[derive(Debug, Clone, Default)]
pub struct InitialCheckEvidence {
    pub communication_working: bool,
    pub uses_ddc_flag: bool,
    pub uses_null_response: bool,
    pub uses_zero_pattern: bool,
    pub does_not_indicate_unsupported: bool,
    pub ddc_busy: bool,
}

impl InitialCheckEvidence {
    pub fn into_flags(self) -> DisplayFlags {
        let mut flags = DisplayFlags::DDC_COMMUNICATION_CHECKED;
        if self.communication_working {
            flags.insert(DisplayFlags::COMMUNICATION_WORKING);
        }
        if self.uses_ddc_flag {
            flags.insert(DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED);
        }
        if self.uses_null_response {
            flags.insert(DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED);
        }
        if self.uses_zero_pattern {
            flags.insert(DisplayFlags::USES_MH_ML_SH_SL_ZERO_FOR_UNSUPPORTED);
        }
        if self.does_not_indicate_unsupported {
            flags.insert(DisplayFlags::DOES_NOT_INDICATE_UNSUPPORTED);
        }
        if self.ddc_busy {
            flags.insert(DisplayFlags::DDC_BUSY);
        }
        flags
    }
}

/// Classify a retry-loop-aggregated probe result into a [`ProbeOutcome`],
/// the "probe" half of the probe/classify/set-flags split.
pub fn classify_probe(result: &Result<u32, ErrorInfo>) -> ProbeOutcome {
    match result {
        Ok(0) => ProbeOutcome::ZeroValue,
        Ok(_) => ProbeOutcome::NonZeroValue,
        Err(err) => match err.status {
            DdcStatus::ReportedUnsupported => ProbeOutcome::ReportedUnsupported,
            DdcStatus::AllResponsesNull | DdcStatus::NullResponse => ProbeOutcome::AllResponsesNull,
            DdcStatus::Busy => ProbeOutcome::Busy,
            DdcStatus::RetriesExhausted => ProbeOutcome::RetriesExhaustedHeterogeneous,
            _ => ProbeOutcome::CommunicationFailed,
        },
    }
}

/// Advance the state machine given the outcome of the current state's
/// probe. Driven by `lib.rs::run_initial_checks_one`, which owns the
/// actual DDC exchange.
pub fn advance(
    state: InitialCheckState,
    outcome: ProbeOutcome,
    evidence: &mut InitialCheckEvidence,
) -> InitialCheckState {
    match state {
        InitialCheckState::Start => match outcome {
            ProbeOutcome::ZeroValue => InitialCheckState::ProbeZeroPattern,
            ProbeOutcome::NonZeroValue => {
                evidence.does_not_indicate_unsupported = true;
                evidence.communication_working = true;
                InitialCheckState::QueryMccsVersion
            }
            ProbeOutcome::ReportedUnsupported => {
                evidence.uses_ddc_flag = true;
                evidence.communication_working = true;
                InitialCheckState::QueryMccsVersion
            }
            ProbeOutcome::AllResponsesNull => InitialCheckState::ProbeKnownFeature,
            ProbeOutcome::Busy => {
                evidence.ddc_busy = true;
                InitialCheckState::Done
            }
            ProbeOutcome::RetriesExhaustedHeterogeneous | ProbeOutcome::CommunicationFailed => {
                InitialCheckState::Done
            }
        },
        InitialCheckState::ProbeKnownFeature => {
            debug!("initial_checks: probing known-supported feature 0x{PROBE_EXPECTED_FEATURE:02x}");
            match outcome {
                ProbeOutcome::ZeroValue | ProbeOutcome::NonZeroValue => {
                    evidence.uses_null_response = true;
                    evidence.communication_working = true;
                    InitialCheckState::QueryMccsVersion
                }
                _ => InitialCheckState::Done,
            }
        }
        InitialCheckState::ProbeZeroPattern => {
            debug!("initial_checks: probing known-unsupported feature 0x{PROBE_UNSUPPORTED_FEATURE:02x}");
            match outcome {
                ProbeOutcome::ZeroValue => {
                    evidence.uses_zero_pattern = true;
                    evidence.communication_working = true;
                    InitialCheckState::QueryMccsVersion
                }
                ProbeOutcome::ReportedUnsupported => {
                    evidence.uses_ddc_flag = true;
                    evidence.communication_working = true;
                    InitialCheckState::QueryMccsVersion
                }
                ProbeOutcome::AllResponsesNull => InitialCheckState::Done,
                other => {
                    debug!("initial_checks: feature 0x41 answered with {other:?}, falling back to null-response marker");
                    evidence.uses_null_response = true;
                    evidence.communication_working = true;
                    InitialCheckState::QueryMccsVersion
                }
            }
        }
        InitialCheckState::QueryMccsVersion => InitialCheckState::Done,
        InitialCheckState::Done => InitialCheckState::Done,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn ok(value: u32) -> Result<u32, ErrorInfo> {
        Ok(value)
    }

    fn err(status: DdcStatus) -> Result<u32, ErrorInfo> {
        Err(ErrorInfo::new(status, "test", "synthetic"))
    }

    #[test]
    fn start_with_nonzero_reply_marks_does_not_indicate_unsupported() {
        let mut evidence = InitialCheckEvidence::default();
        let outcome = classify_probe(&ok(7));
        assert_eq!(outcome, ProbeOutcome::NonZeroValue);
        let state = advance(InitialCheckState::Start, outcome, &mut evidence);
        assert_eq!(state, InitialCheckState::QueryMccsVersion);
        assert!(evidence.does_not_indicate_unsupported);
        assert!(evidence.communication_working);
    }

    #[test]
    fn start_with_reported_unsupported_sets_ddc_flag() {
        let mut evidence = InitialCheckEvidence::default();
        let outcome = classify_probe(&err(DdcStatus::ReportedUnsupported));
        let state = advance(InitialCheckState::Start, outcome, &mut evidence);
        assert_eq!(state, InitialCheckState::QueryMccsVersion);
        assert!(evidence.uses_ddc_flag);
        assert!(evidence.communication_working);
    }

    #[test]
    fn start_with_busy_terminates_without_communication_working() {
        let mut evidence = InitialCheckEvidence::default();
        let outcome = classify_probe(&err(DdcStatus::Busy));
        assert_eq!(outcome, ProbeOutcome::Busy);
        let state = advance(InitialCheckState::Start, outcome, &mut evidence);
        assert_eq!(state, InitialCheckState::Done);
        assert!(evidence.ddc_busy);
        assert!(!evidence.communication_working);
    }

    #[test]
    fn start_with_heterogeneous_retries_terminates_unworking() {
        let mut evidence = InitialCheckEvidence::default();
        let outcome = classify_probe(&err(DdcStatus::RetriesExhausted));
        let state = advance(InitialCheckState::Start, outcome, &mut evidence);
        assert_eq!(state, InitialCheckState::Done);
        assert!(!evidence.communication_working);
    }

    #[test]
    fn all_null_falls_through_to_known_feature_then_zero_pattern_path() {
        let mut evidence = InitialCheckEvidence::default();
        let state = advance(InitialCheckState::Start, classify_probe(&err(DdcStatus::NullResponse)), &mut evidence);
        assert_eq!(state, InitialCheckState::ProbeKnownFeature);

        let state = advance(state, classify_probe(&ok(50)), &mut evidence);
        assert_eq!(state, InitialCheckState::QueryMccsVersion);
        assert!(evidence.uses_null_response);
        assert!(evidence.communication_working);
    }

    #[test]
    fn known_feature_also_null_terminates_broken() {
        let mut evidence = InitialCheckEvidence::default();
        let state = advance(
            InitialCheckState::ProbeKnownFeature,
            classify_probe(&err(DdcStatus::AllResponsesNull)),
            &mut evidence,
        );
        assert_eq!(state, InitialCheckState::Done);
        assert!(!evidence.communication_working);
    }

    #[test]
    fn zero_pattern_all_zero_sets_zero_pattern_flag() {
        let mut evidence = InitialCheckEvidence::default();
        let state = advance(InitialCheckState::ProbeZeroPattern, classify_probe(&ok(0)), &mut evidence);
        assert_eq!(state, InitialCheckState::QueryMccsVersion);
        assert!(evidence.uses_zero_pattern);
        assert!(evidence.communication_working);
    }

    #[test]
    fn zero_pattern_null_response_terminates_broken() {
        let mut evidence = InitialCheckEvidence::default();
        let state = advance(
            InitialCheckState::ProbeZeroPattern,
            classify_probe(&err(DdcStatus::AllResponsesNull)),
            &mut evidence,
        );
        assert_eq!(state, InitialCheckState::Done);
        assert!(!evidence.communication_working);
    }

    #[test]
    fn zero_pattern_unexpected_reply_falls_back_to_null_response_marker() {
        let mut evidence = InitialCheckEvidence::default();
        let state = advance(InitialCheckState::ProbeZeroPattern, classify_probe(&ok(9)), &mut evidence);
        assert_eq!(state, InitialCheckState::QueryMccsVersion);
        assert!(evidence.uses_null_response);
        assert!(evidence.communication_working);
    }
}
