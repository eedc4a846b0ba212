//! Readiness probe capability and HTTP response classification.

use async_trait::async_trait;
use reqwest::StatusCode;

/// Result of a single readiness probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Service is ready.
    Available,
    /// Service answered but is not ready yet (e.g. model not loaded).
    NotAvailable,
    /// Probe could not complete for a recoverable reason (gateway timeout, overload).
    TransientFailure,
    /// Probe failed for a reason retrying will not fix.
    FatalFailure(String),
}

/// A single asynchronous readiness check.
///
/// Implementations own their timeout: the poller waits for every call to
/// settle and never imposes one of its own.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check_availability(&self) -> ProbeOutcome;
}

/// Classify a readiness response.
///
/// 2xx with a truthy JSON body is ready, 2xx with a falsy or empty body is not
/// ready yet, 503/504 are transient, anything else is fatal.
pub fn classify_response(status: StatusCode, body: &[u8]) -> ProbeOutcome {
    if status.is_success() {
        if body.iter().all(u8::is_ascii_whitespace) {
            return ProbeOutcome::NotAvailable;
        }
        return match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(value) if is_truthy(&value) => ProbeOutcome::Available,
            Ok(_) => ProbeOutcome::NotAvailable,
            Err(e) => ProbeOutcome::FatalFailure(format!("invalid readiness response: {e}")),
        };
    }

    match status {
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            ProbeOutcome::TransientFailure
        }
        other => ProbeOutcome::FatalFailure(format!("HTTP {other}")),
    }
}

/// Classify a transport-level failure. These are never retried.
pub fn classify_error(err: &reqwest::Error) -> ProbeOutcome {
    ProbeOutcome::FatalFailure(err.to_string())
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_true_is_available() {
        assert_eq!(
            classify_response(StatusCode::OK, b"true"),
            ProbeOutcome::Available
        );
    }

    #[test]
    fn ok_false_is_not_available() {
        assert_eq!(
            classify_response(StatusCode::OK, b"false"),
            ProbeOutcome::NotAvailable
        );
    }

    #[test]
    fn ok_falsy_bodies_are_not_available() {
        for body in [&b"null"[..], b"0", b"\"\"", b"", b"  \n"] {
            assert_eq!(
                classify_response(StatusCode::OK, body),
                ProbeOutcome::NotAvailable,
                "body {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn ok_truthy_bodies_are_available() {
        for body in [&b"{}"[..], b"[]", b"1", b"\"yes\""] {
            assert_eq!(
                classify_response(StatusCode::OK, body),
                ProbeOutcome::Available,
                "body {:?}",
                String::from_utf8_lossy(body)
            );
        }
    }

    #[test]
    fn ok_garbage_is_fatal() {
        let outcome = classify_response(StatusCode::OK, b"<html>");
        assert!(matches!(outcome, ProbeOutcome::FatalFailure(ref d) if d.starts_with("invalid readiness response")));
    }

    #[test]
    fn gateway_statuses_are_transient() {
        assert_eq!(
            classify_response(StatusCode::SERVICE_UNAVAILABLE, b""),
            ProbeOutcome::TransientFailure
        );
        assert_eq!(
            classify_response(StatusCode::GATEWAY_TIMEOUT, b"upstream timed out"),
            ProbeOutcome::TransientFailure
        );
    }

    #[test]
    fn other_errors_are_fatal() {
        assert_eq!(
            classify_response(StatusCode::BAD_REQUEST, b""),
            ProbeOutcome::FatalFailure("HTTP 400 Bad Request".to_string())
        );
        assert_eq!(
            classify_response(StatusCode::INTERNAL_SERVER_ERROR, b"{}"),
            ProbeOutcome::FatalFailure("HTTP 500 Internal Server Error".to_string())
        );
        assert!(matches!(
            classify_response(StatusCode::UNAUTHORIZED, b""),
            ProbeOutcome::FatalFailure(_)
        ));
    }
}
