//! Maps pipeline results onto the response schema.
//!
//! A snippet that ran, whatever its exit code or even if it hit the deadline, produced data
//! and answers 200. Refusals at the credential or code checks are service-level and answer
//! 401/400. Failures of the service itself answer 500.

use axum::http::StatusCode;
use std::time::Duration;

use crate::{
    error::Error,
    types::{
        ExecutionOutcome, ExecutionResponse, ExecutionStatus, INTERNAL_EXIT_CODE,
        MISSING_CODE_EXIT_CODE, TIMEOUT_EXIT_CODE, UNAUTHORIZED_EXIT_CODE,
    },
    Result,
};

pub fn classify(
    result: &Result<ExecutionOutcome>,
    timeout: Duration,
) -> (ExecutionResponse, StatusCode) {
    match result {
        Ok(outcome) => classify_outcome(outcome, timeout),
        Err(e) => classify_error(e),
    }
}

pub fn classify_outcome(
    outcome: &ExecutionOutcome,
    timeout: Duration,
) -> (ExecutionResponse, StatusCode) {
    match &outcome.status {
        ExecutionStatus::Completed => (
            ExecutionResponse {
                output: String::from_utf8_lossy(&outcome.stdout).into_owned(),
                error: String::from_utf8_lossy(&outcome.stderr).into_owned(),
                exit_code: outcome.exit_code,
            },
            StatusCode::OK,
        ),
        ExecutionStatus::TimedOut => (
            ExecutionResponse {
                output: String::new(),
                error: format!("execution timed out after {}s", timeout.as_secs()),
                exit_code: TIMEOUT_EXIT_CODE,
            },
            StatusCode::OK,
        ),
        ExecutionStatus::SpawnFailed(reason) => internal_error(reason.clone()),
    }
}

pub fn classify_error(error: &Error) -> (ExecutionResponse, StatusCode) {
    match error {
        Error::Unauthorized => (
            refusal(error, UNAUTHORIZED_EXIT_CODE),
            StatusCode::UNAUTHORIZED,
        ),
        Error::MissingCode => (
            refusal(error, MISSING_CODE_EXIT_CODE),
            StatusCode::BAD_REQUEST,
        ),
        other => internal_error(other.to_string()),
    }
}

/// Response for faults of the service itself.
pub fn internal_error(description: impl Into<String>) -> (ExecutionResponse, StatusCode) {
    (
        ExecutionResponse {
            output: String::new(),
            error: description.into(),
            exit_code: INTERNAL_EXIT_CODE,
        },
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

fn refusal(error: &Error, exit_code: i32) -> ExecutionResponse {
    ExecutionResponse {
        output: String::new(),
        error: error.to_string(),
        exit_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn outcome(status: ExecutionStatus, exit_code: i32) -> ExecutionOutcome {
        ExecutionOutcome {
            stdout: b"out".to_vec(),
            stderr: b"err".to_vec(),
            exit_code,
            status,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_auth_error() {
        let (response, status) = classify(&Err(Error::Unauthorized), TIMEOUT);
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(response.output, "");
        assert_eq!(response.error, "Unauthorised Access");
        assert_eq!(response.exit_code, 2);
    }

    #[test]
    fn test_validation_error() {
        let (response, status) = classify(&Err(Error::MissingCode), TIMEOUT);
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.output, "");
        assert_eq!(response.error, "Missing code");
        assert_eq!(response.exit_code, 1);
    }

    #[test]
    fn test_timed_out_discards_output() {
        let (response, status) =
            classify(&Ok(outcome(ExecutionStatus::TimedOut, 124)), TIMEOUT);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.output, "");
        assert_eq!(response.error, "execution timed out after 10s");
        assert_eq!(response.exit_code, 124);
    }

    #[test]
    fn test_completed_nonzero_is_still_ok() {
        let (response, status) =
            classify(&Ok(outcome(ExecutionStatus::Completed, 255)), TIMEOUT);
        assert_eq!(status, StatusCode::OK);
        assert_eq!(response.output, "out");
        assert_eq!(response.error, "err");
        assert_eq!(response.exit_code, 255);
    }

    #[test]
    fn test_spawn_failed_is_internal() {
        let (response, status) = classify(
            &Ok(ExecutionOutcome::spawn_failed("interpreter php not found")),
            TIMEOUT,
        );
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.output, "");
        assert_eq!(response.error, "interpreter php not found");
        assert_eq!(response.exit_code, INTERNAL_EXIT_CODE);
    }

    #[test]
    fn test_internal_sentinel_is_reserved() {
        for reserved in [0, 1, 2, 124] {
            assert_ne!(INTERNAL_EXIT_CODE, reserved);
        }
        let (response, status) = classify(&Err(Error::Process("wait failed".into())), TIMEOUT);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.exit_code, INTERNAL_EXIT_CODE);
        assert!(response.error.contains("wait failed"));
    }

    #[test]
    fn test_non_utf8_output_is_lossy() {
        let mut raw = outcome(ExecutionStatus::Completed, 0);
        raw.stdout = vec![b'a', 0xff, b'b'];
        let (response, _) = classify_outcome(&raw, TIMEOUT);
        assert_eq!(response.output, "a\u{fffd}b");
    }
}
