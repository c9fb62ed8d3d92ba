use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::RequestError;
use crate::models::dsl_model::Checks;

pub const STATUS_CHECK_PREFIX: &str = "is status";
pub const LATENCY_CHECK: &str = "transaction time OK";

/// Result of one request/check cycle of one virtual user.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub vu: u64,
    pub iteration: u64,
    /// `None` when the request never produced a response.
    pub status: Option<u16>,
    pub duration: Duration,
    pub checks: BTreeMap<String, bool>,
    pub error: Option<RequestError>,
}

impl RequestOutcome {
    /// Evaluates the configured checks against a completed request.
    pub fn evaluate(
        vu: u64,
        iteration: u64,
        result: Result<u16, RequestError>,
        duration: Duration,
        checks: &Checks,
    ) -> Self {
        let (status, error) = match result {
            Ok(status) => (Some(status), None),
            Err(e) => (None, Some(e)),
        };

        let status_ok = status == Some(checks.expected_status);
        // A request that never completed cannot satisfy the latency check.
        let latency_ok =
            error.is_none() && duration < Duration::from_millis(checks.max_duration_ms);

        let mut results = BTreeMap::new();
        results.insert(status_check_name(checks), status_ok);
        results.insert(LATENCY_CHECK.to_string(), latency_ok);

        Self {
            vu,
            iteration,
            status,
            duration,
            checks: results,
            error,
        }
    }

    pub fn passed(&self) -> bool {
        self.checks.values().all(|ok| *ok)
    }

    /// Key under which this outcome is counted in the status breakdown.
    pub fn status_key(&self) -> String {
        match (self.status, &self.error) {
            (Some(code), _) => code.to_string(),
            (None, Some(e)) => e.status_key().to_string(),
            (None, None) => "REQUEST_ERROR".to_string(),
        }
    }
}

pub fn status_check_name(checks: &Checks) -> String {
    format!("{} {}", STATUS_CHECK_PREFIX, checks.expected_status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checks() -> Checks {
        Checks::default()
    }

    #[test]
    fn fast_200_passes_both_checks() {
        let outcome =
            RequestOutcome::evaluate(0, 0, Ok(200), Duration::from_millis(50), &checks());
        assert!(outcome.passed());
        assert!(outcome.checks["is status 200"]);
        assert!(outcome.checks["transaction time OK"]);
        assert_eq!(outcome.status_key(), "200");
    }

    #[test]
    fn server_error_fails_status_check_only() {
        let outcome =
            RequestOutcome::evaluate(0, 0, Ok(500), Duration::from_millis(20), &checks());
        assert!(!outcome.passed());
        assert!(!outcome.checks["is status 200"]);
        assert!(outcome.checks["transaction time OK"]);
        assert_eq!(outcome.status_key(), "500");
    }

    #[test]
    fn latency_bound_is_strict() {
        let at_bound =
            RequestOutcome::evaluate(0, 0, Ok(200), Duration::from_millis(500), &checks());
        assert!(!at_bound.checks["transaction time OK"]);

        let below =
            RequestOutcome::evaluate(0, 0, Ok(200), Duration::from_micros(499_999), &checks());
        assert!(below.checks["transaction time OK"]);
    }

    #[test]
    fn network_error_fails_every_check() {
        let outcome = RequestOutcome::evaluate(
            3,
            7,
            Err(RequestError::Connect),
            Duration::from_millis(1),
            &checks(),
        );
        assert_eq!(outcome.status, None);
        assert!(outcome.checks.values().all(|ok| !ok));
        assert_eq!(outcome.status_key(), "REQUEST_ERROR");
        assert!(outcome.error.is_some());
    }

    #[test]
    fn timeout_is_keyed_separately() {
        let outcome = RequestOutcome::evaluate(
            0,
            0,
            Err(RequestError::Timeout),
            Duration::from_secs(60),
            &checks(),
        );
        assert_eq!(outcome.status_key(), "TIMEOUT");
    }

    #[test]
    fn check_name_follows_expected_status() {
        let custom = Checks {
            expected_status: 201,
            max_duration_ms: 500,
        };
        let outcome = RequestOutcome::evaluate(0, 0, Ok(201), Duration::from_millis(5), &custom);
        assert!(outcome.passed());
        assert!(outcome.checks.contains_key("is status 201"));
    }
}
