//! End-to-end walk of the initial-checks state machine (§4.G / §8),
//! combining `classify_probe` with `advance` the way `run_initial_checks_one`
//! drives a freshly discovered display.

use ddcutil_core::error::{DdcStatus, ErrorInfo};
use ddcutil_core::initial_checks::{advance, classify_probe, InitialCheckEvidence, InitialCheckState, ProbeOutcome};
use ddcutil_core::registry::DisplayFlags;

fn ok(value: u32) -> Result<u32, ErrorInfo> {
    Ok(value)
}

fn err(status: DdcStatus) -> Result<u32, ErrorInfo> {
    Err(ErrorInfo::new(status, "test", "synthetic"))
}

#[test]
fn ddc_flag_path_sets_communication_working_and_ddc_flag() {
    let mut state = InitialCheckState::Start;
    let mut evidence = InitialCheckEvidence::default();

    let outcome = classify_probe(&err(DdcStatus::ReportedUnsupported));
    assert_eq!(outcome, ProbeOutcome::ReportedUnsupported);
    state = advance(state, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::QueryMccsVersion);

    state = advance(state, classify_probe(&ok(0x0201)), &mut evidence);
    assert_eq!(state, InitialCheckState::Done);

    let flags = evidence.into_flags();
    assert!(flags.contains(DisplayFlags::DDC_COMMUNICATION_CHECKED));
    assert!(flags.contains(DisplayFlags::COMMUNICATION_WORKING));
    assert!(flags.contains(DisplayFlags::USES_DDC_FLAG_FOR_UNSUPPORTED));
}

#[test]
fn busy_on_the_first_probe_terminates_without_communication_working() {
    let mut evidence = InitialCheckEvidence::default();
    let outcome = classify_probe(&err(DdcStatus::Busy));
    assert_eq!(outcome, ProbeOutcome::Busy);

    let state = advance(InitialCheckState::Start, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::Done);

    let flags = evidence.into_flags();
    assert!(flags.contains(DisplayFlags::DDC_BUSY));
    assert!(!flags.contains(DisplayFlags::COMMUNICATION_WORKING));
}

#[test]
fn heterogeneous_retry_exhaustion_terminates_without_flags() {
    let mut evidence = InitialCheckEvidence::default();
    let outcome = classify_probe(&err(DdcStatus::RetriesExhausted));
    assert_eq!(outcome, ProbeOutcome::RetriesExhaustedHeterogeneous);

    let state = advance(InitialCheckState::Start, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::Done);
    let flags = evidence.into_flags();
    assert!(flags.contains(DisplayFlags::DDC_COMMUNICATION_CHECKED));
    assert!(!flags.contains(DisplayFlags::COMMUNICATION_WORKING));
}

#[test]
fn all_null_falls_through_known_feature_then_zero_pattern() {
    let mut evidence = InitialCheckEvidence::default();

    // Start probes feature 0x00, every attempt comes back null.
    let outcome = classify_probe(&err(DdcStatus::AllResponsesNull));
    assert_eq!(outcome, ProbeOutcome::AllResponsesNull);
    let state = advance(InitialCheckState::Start, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::ProbeKnownFeature);

    // Feature 0x10 replies cleanly.
    let state = advance(state, classify_probe(&ok(50)), &mut evidence);
    assert_eq!(state, InitialCheckState::QueryMccsVersion);

    let flags = evidence.into_flags();
    assert!(flags.contains(DisplayFlags::COMMUNICATION_WORKING));
    assert!(flags.contains(DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED));
}

#[test]
fn known_feature_also_null_terminates_broken() {
    let mut evidence = InitialCheckEvidence::default();
    let state = advance(InitialCheckState::Start, ProbeOutcome::AllResponsesNull, &mut evidence);
    assert_eq!(state, InitialCheckState::ProbeKnownFeature);

    let outcome = classify_probe(&err(DdcStatus::NullResponse));
    assert_eq!(outcome, ProbeOutcome::AllResponsesNull);
    let state = advance(state, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::Done);
    assert!(!evidence.communication_working);
}

#[test]
fn zero_pattern_all_zero_sets_zero_pattern_flag() {
    let mut evidence = InitialCheckEvidence::default();
    let state = advance(InitialCheckState::Start, ProbeOutcome::ZeroValue, &mut evidence);
    assert_eq!(state, InitialCheckState::ProbeZeroPattern);

    let outcome = classify_probe(&ok(0));
    assert_eq!(outcome, ProbeOutcome::ZeroValue);
    let state = advance(state, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::QueryMccsVersion);

    let flags = evidence.into_flags();
    assert!(flags.contains(DisplayFlags::COMMUNICATION_WORKING));
    assert!(flags.contains(DisplayFlags::USES_MH_ML_SH_SL_ZERO_FOR_UNSUPPORTED));
}

#[test]
fn zero_pattern_unexpected_reply_falls_back_to_null_response_marker() {
    let mut evidence = InitialCheckEvidence::default();
    let state = advance(InitialCheckState::Start, ProbeOutcome::ZeroValue, &mut evidence);
    assert_eq!(state, InitialCheckState::ProbeZeroPattern);

    let outcome = classify_probe(&ok(7));
    assert_eq!(outcome, ProbeOutcome::NonZeroValue);
    let state = advance(state, outcome, &mut evidence);
    assert_eq!(state, InitialCheckState::QueryMccsVersion);

    let flags = evidence.into_flags();
    assert!(flags.contains(DisplayFlags::COMMUNICATION_WORKING));
    assert!(flags.contains(DisplayFlags::USES_NULL_RESPONSE_FOR_UNSUPPORTED));
}
