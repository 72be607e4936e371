//! Retry & error classifier (§4.D): wraps a single logical DDC operation
//! in a bounded retry loop, collects per-attempt causes, and produces a
//! composite [`ErrorInfo`] on final failure.

use log::{debug, warn};

use crate::config::OpClass;
use crate::error::{DdcOpError, DdcStatus, ErrorInfo};
use crate::sleep::{PerDisplaySleepData, SleepClass};

/// Per-display, per-operation-class counters (§3 `TryStats`).
///
/// Invariant: `total_calls() == sum(succeeded_at_try) + failed`.
#[derive(Debug, Clone)]
pub struct TryStats {
    /// `succeeded_at_try[n-1]` counts successes on attempt number `n`.
    succeeded_at_try: Vec<u64>,
    failed: u64,
}

impl TryStats {
    pub fn new(max_tries: u8) -> Self {
        Self {
            succeeded_at_try: vec![0; max_tries as usize],
            failed: 0,
        }
    }

    pub fn record_success(&mut self, try_number: u8) {
        let idx = try_number.saturating_sub(1) as usize;
        if idx >= self.succeeded_at_try.len() {
            self.succeeded_at_try.resize(idx + 1, 0);
        }
        self.succeeded_at_try[idx] += 1;
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub fn succeeded_at_try(&self, try_number: u8) -> u64 {
        self.succeeded_at_try
            .get(try_number.saturating_sub(1) as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    pub fn total_calls(&self) -> u64 {
        self.succeeded_at_try.iter().sum::<u64>() + self.failed
    }
}

/// Run `attempt` up to `max_tries` times, pacing between attempts with
/// the DSA and informing it of each outcome.
///
/// `attempt` receives the 1-based try number. Non-retryable errors
/// (permission-denied, not-found, programmer errors) short-circuit the
/// loop per §4.D / §7.
pub fn retry_loop<T>(
    op_class: OpClass,
    max_tries: u8,
    call_site: &'static str,
    sleep_data: &mut PerDisplaySleepData,
    sleep_class: SleepClass,
    stats: &mut TryStats,
    mut attempt: impl FnMut(u8) -> Result<T, DdcOpError>,
) -> Result<T, ErrorInfo> {
    let max_tries = max_tries.max(1).min(crate::config::MAX_MAX_TRIES);
    let mut causes = Vec::new();

    for try_number in 1..=max_tries {
        match attempt(try_number) {
            Ok(value) => {
                sleep_data.record_outcome(false);
                stats.record_success(try_number);
                return Ok(value);
            }
            Err(err) => {
                if !err.is_retryable() {
                    debug!("{call_site}: non-retryable error on try {try_number}: {err}");
                    return Err(ErrorInfo::leaf(call_site, &err));
                }
                std::thread::sleep(sleep_data.sleep_duration(sleep_class));
                sleep_data.record_outcome(true);
                causes.push(ErrorInfo::leaf(call_site, &err));
            }
        }
        let _ = op_class;
    }

    stats.record_failure();
    warn!("{call_site}: retries exhausted after {max_tries} tries");
    Err(classify_exhausted(call_site, causes))
}

/// Aggregate the causes of an exhausted retry loop into one status,
/// per the classification rule in §4.D.
fn classify_exhausted(call_site: &'static str, causes: Vec<ErrorInfo>) -> ErrorInfo {
    let all_null = !causes.is_empty()
        && causes
            .iter()
            .all(|c| c.status == DdcStatus::NullResponse);
    if all_null {
        return ErrorInfo::with_causes(
            DdcStatus::AllResponsesNull,
            call_site,
            "every attempt returned a null response",
            causes,
        );
    }

    let first_status = causes.first().map(|c| c.status);
    let homogeneous = first_status
        .map(|status| causes.iter().all(|c| c.status == status))
        .unwrap_or(false);
    if homogeneous {
        let status = first_status.unwrap();
        return ErrorInfo::with_causes(
            status,
            call_site,
            format!("all {} attempts failed with {status}", causes.len()),
            causes,
        );
    }

    ErrorInfo::with_causes(
        DdcStatus::RetriesExhausted,
        call_site,
        "retries exhausted with heterogeneous causes",
        causes,
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn total_calls_invariant_holds() {
        let mut stats = TryStats::new(10);
        stats.record_success(1);
        stats.record_success(4);
        stats.record_success(4);
        stats.record_failure();
        assert_eq!(stats.total_calls(), 4);
        assert_eq!(stats.succeeded_at_try(4), 2);
        assert_eq!(stats.failed(), 1);
    }

    #[test]
    fn succeeds_within_retry_budget() {
        let mut sleep_data = PerDisplaySleepData::new();
        let mut stats = TryStats::new(10);
        let mut attempts = 0u8;
        let result = retry_loop(
            OpClass::WriteRead,
            10,
            "test::succeeds_within_retry_budget",
            &mut sleep_data,
            SleepClass::AfterRead,
            &mut stats,
            |try_number| {
                attempts = try_number;
                if try_number < 4 {
                    Err(DdcOpError::Protocol(
                        crate::ddc::ci::DdcCiProtocolError::InvalidChecksum,
                    ))
                } else {
                    Ok(42)
                }
            },
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 4);
        assert_eq!(stats.succeeded_at_try(4), 1);
    }

    #[test]
    fn all_null_responses_classify_as_all_responses_null() {
        let mut sleep_data = PerDisplaySleepData::new();
        let mut stats = TryStats::new(3);
        let result: Result<(), ErrorInfo> = retry_loop(
            OpClass::WriteRead,
            3,
            "test::all_null",
            &mut sleep_data,
            SleepClass::AfterRead,
            &mut stats,
            |_| Err(DdcOpError::NullResponse),
        );
        let err = result.unwrap_err();
        assert_eq!(err.status, DdcStatus::AllResponsesNull);
        assert_eq!(err.causes.len(), 3);
    }

    #[test]
    fn heterogeneous_causes_classify_as_retries_exhausted() {
        let mut sleep_data = PerDisplaySleepData::new();
        let mut stats = TryStats::new(2);
        let mut toggle = false;
        let result: Result<(), ErrorInfo> = retry_loop(
            OpClass::WriteRead,
            2,
            "test::heterogeneous",
            &mut sleep_data,
            SleepClass::AfterRead,
            &mut stats,
            |_| {
                toggle = !toggle;
                if toggle {
                    Err(DdcOpError::NullResponse)
                } else {
                    Err(DdcOpError::Protocol(
                        crate::ddc::ci::DdcCiProtocolError::InvalidChecksum,
                    ))
                }
            },
        );
        assert_eq!(result.unwrap_err().status, DdcStatus::RetriesExhausted);
    }

    #[test]
    fn non_retryable_error_short_circuits() {
        let mut sleep_data = PerDisplaySleepData::new();
        let mut stats = TryStats::new(10);
        let mut calls = 0;
        let result: Result<(), ErrorInfo> = retry_loop(
            OpClass::WriteRead,
            10,
            "test::short_circuit",
            &mut sleep_data,
            SleepClass::AfterRead,
            &mut stats,
            |_| {
                calls += 1;
                Err(DdcOpError::PermissionDenied("/dev/i2c-3".into()))
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 1);
        assert_eq!(stats.total_calls(), 0);
    }
}
