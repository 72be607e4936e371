//! Retry classification from outside the crate (§4.D / §8): the inline
//! unit tests in `retry.rs` exercise the loop mechanics directly; this
//! checks the public `ErrorInfo` shape a caller actually sees.

use ddcutil_core::config::OpClass;
use ddcutil_core::ddc::ci::DdcCiProtocolError;
use ddcutil_core::error::{DdcOpError, DdcStatus};
use ddcutil_core::retry::{retry_loop, TryStats};
use ddcutil_core::sleep::{PerDisplaySleepData, SleepClass};

#[test]
fn busy_like_errors_are_homogeneous_after_exhaustion() {
    let mut sleep_data = PerDisplaySleepData::new();
    let mut stats = TryStats::new(3);
    let result: Result<(), _> = retry_loop(
        OpClass::WriteRead,
        3,
        "test::busy",
        &mut sleep_data,
        SleepClass::AfterRead,
        &mut stats,
        |_| Err(DdcOpError::Protocol(DdcCiProtocolError::InvalidChecksum)),
    );
    let err = result.unwrap_err();
    assert_eq!(err.status, DdcStatus::BadChecksum);
    assert_eq!(err.causes.len(), 3);
    assert_eq!(stats.failed(), 1);
}

#[test]
fn invalid_operation_never_retries() {
    let mut sleep_data = PerDisplaySleepData::new();
    let mut stats = TryStats::new(5);
    let mut calls = 0u8;
    let result: Result<(), _> = retry_loop(
        OpClass::WriteOnly,
        5,
        "test::invalid_operation",
        &mut sleep_data,
        SleepClass::AfterWrite,
        &mut stats,
        |_| {
            calls += 1;
            Err(DdcOpError::InvalidOperation("close of closed handle".into()))
        },
    );
    assert_eq!(result.unwrap_err().status, DdcStatus::InvalidOperation);
    assert_eq!(calls, 1);
}

#[test]
fn max_tries_is_clamped_to_the_hard_ceiling() {
    let mut sleep_data = PerDisplaySleepData::new();
    let mut stats = TryStats::new(ddcutil_core::config::MAX_MAX_TRIES);
    let mut calls = 0u8;
    let result: Result<(), _> = retry_loop(
        OpClass::MultiPart,
        255,
        "test::clamped",
        &mut sleep_data,
        SleepClass::AfterRead,
        &mut stats,
        |_| {
            calls += 1;
            Err(DdcOpError::NullResponse)
        },
    );
    assert!(result.is_err());
    assert_eq!(calls, ddcutil_core::config::MAX_MAX_TRIES);
}
