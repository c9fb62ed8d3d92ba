//! Shared sink for request outcomes.
//!
//! Every virtual user reports into one [`Aggregator`]. All state lives behind
//! a single mutex, so an outcome is either fully counted or rejected; there is
//! no partial update to race on. After [`Aggregator::finalize`] every further
//! submission is refused and the summary stays frozen.

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::AggregateError;
use crate::models::metrics::{CheckCount, LatencySummary, Rate, Summary};
use crate::models::outcome::RequestOutcome;

/// Name of the rate fed with `true` for every outcome that failed a check.
pub const ERRORS: &str = "errors";

/// 1 µs .. 1 h
const HISTOGRAM_LOW_US: u64 = 1;
const HISTOGRAM_HIGH_US: u64 = 3_600_000_000;
const HISTOGRAM_SIGFIG: u8 = 3;

pub struct Aggregator {
    state: Mutex<State>,
}

struct State {
    finalized: bool,
    outcomes: Rate,
    latency: Histogram<u64>,
    checks: BTreeMap<String, CheckCount>,
    status_counts: BTreeMap<String, u64>,
    rates: BTreeMap<String, Rate>,
    active_vus: u64,
}

impl Aggregator {
    /// Creates an aggregator with the given named rates. Names cannot be added
    /// later.
    pub fn new(rates: &[&str]) -> Result<Self, AggregateError> {
        let latency =
            Histogram::new_with_bounds(HISTOGRAM_LOW_US, HISTOGRAM_HIGH_US, HISTOGRAM_SIGFIG)
                .map_err(|e| AggregateError::Histogram(e.to_string()))?;

        let rates = rates
            .iter()
            .map(|name| (name.to_string(), Rate::default()))
            .collect();

        Ok(Self {
            state: Mutex::new(State {
                finalized: false,
                outcomes: Rate::default(),
                latency,
                checks: BTreeMap::new(),
                status_counts: BTreeMap::new(),
                rates,
                active_vus: 0,
            }),
        })
    }

    /// Aggregator with the `errors` rate registered.
    pub fn with_error_rate() -> Result<Self, AggregateError> {
        Self::new(&[ERRORS])
    }

    pub fn record(&self, outcome: RequestOutcome) -> Result<(), AggregateError> {
        self.record_with_rates(outcome, &[])
    }

    /// Records an outcome together with samples for named rates, all under one
    /// lock. Nothing is recorded if any rate name is unknown.
    pub fn record_with_rates(
        &self,
        outcome: RequestOutcome,
        samples: &[(&str, bool)],
    ) -> Result<(), AggregateError> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(AggregateError::Finalized);
        }
        if let Some((name, _)) = samples.iter().find(|(n, _)| !state.rates.contains_key(*n)) {
            return Err(AggregateError::UnknownMetric(name.to_string()));
        }

        state.outcomes.add(!outcome.passed());

        let micros = u64::try_from(outcome.duration.as_micros()).unwrap_or(u64::MAX);
        state.latency.saturating_record(micros.max(HISTOGRAM_LOW_US));

        *state.status_counts.entry(outcome.status_key()).or_insert(0) += 1;

        for (name, ok) in outcome.checks {
            let count = state.checks.entry(name).or_default();
            if ok {
                count.passes += 1;
            } else {
                count.fails += 1;
            }
        }

        for (name, hit) in samples {
            if let Some(rate) = state.rates.get_mut(*name) {
                rate.add(*hit);
            }
        }
        Ok(())
    }

    /// Adds one sample to a rate registered at construction.
    pub fn add_rate(&self, name: &str, hit: bool) -> Result<(), AggregateError> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(AggregateError::Finalized);
        }
        state
            .rates
            .get_mut(name)
            .ok_or_else(|| AggregateError::UnknownMetric(name.to_string()))?
            .add(hit);
        Ok(())
    }

    pub fn set_active_vus(&self, n: u64) {
        self.state.lock().active_vus = n;
    }

    pub fn snapshot(&self) -> Summary {
        self.state.lock().summary()
    }

    /// Closes the aggregator and returns the final summary. Calling it again
    /// returns the same summary.
    pub fn finalize(&self) -> Summary {
        let mut state = self.state.lock();
        if !state.finalized {
            state.finalized = true;
            state.active_vus = 0;
        }
        state.summary()
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }
}

impl State {
    fn summary(&self) -> Summary {
        Summary {
            total_requests: self.outcomes.total,
            successful_requests: self.outcomes.total - self.outcomes.hits,
            failed_requests: self.outcomes.hits,
            error_rate: self.outcomes.ratio(),
            active_vus: self.active_vus,
            latency: self.latency_summary(),
            checks: self.checks.clone(),
            status_counts: self.status_counts.clone(),
            rates: self.rates.clone(),
            finalized: self.finalized,
        }
    }

    fn latency_summary(&self) -> LatencySummary {
        let hist = &self.latency;
        if hist.len() == 0 {
            return LatencySummary::default();
        }
        let ms = |us: u64| us as f64 / 1000.0;
        LatencySummary {
            fastest_response: ms(hist.min()),
            slowest_response: ms(hist.max()),
            mean_response_time: hist.mean() / 1000.0,
            median_response_time: ms(hist.value_at_quantile(0.50)),
            p90: ms(hist.value_at_quantile(0.90)),
            p95: ms(hist.value_at_quantile(0.95)),
            p99: ms(hist.value_at_quantile(0.99)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RequestError;
    use crate::models::dsl_model::Checks;
    use std::sync::Arc;
    use std::time::Duration;

    fn outcome(status: Result<u16, RequestError>, ms: u64) -> RequestOutcome {
        RequestOutcome::evaluate(0, 0, status, Duration::from_millis(ms), &Checks::default())
    }

    #[test]
    fn empty_summary_has_zero_error_rate() {
        let agg = Aggregator::with_error_rate().unwrap();
        let summary = agg.snapshot();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.error_rate, 0.0);
        assert_eq!(summary.latency, LatencySummary::default());
        assert_eq!(summary.rates[ERRORS].ratio(), 0.0);
    }

    #[test]
    fn error_rate_is_failures_over_total() {
        let agg = Aggregator::with_error_rate().unwrap();
        for _ in 0..4 {
            agg.record(outcome(Ok(200), 10)).unwrap();
        }
        agg.record(outcome(Ok(500), 10)).unwrap();
        agg.record(outcome(Ok(200), 900)).unwrap();
        agg.record(outcome(Err(RequestError::Connect), 1)).unwrap();

        let summary = agg.snapshot();
        assert_eq!(summary.total_requests, 7);
        assert_eq!(summary.failed_requests, 3);
        assert_eq!(summary.successful_requests, 4);
        assert_eq!(summary.error_rate, 3.0 / 7.0);
        assert_eq!(summary.status_counts["200"], 5);
        assert_eq!(summary.status_counts["500"], 1);
        assert_eq!(summary.status_counts["REQUEST_ERROR"], 1);
        assert_eq!(
            summary.checks["is status 200"],
            CheckCount { passes: 5, fails: 2 }
        );
        assert_eq!(
            summary.checks["transaction time OK"],
            CheckCount { passes: 5, fails: 2 }
        );
    }

    #[test]
    fn latency_percentiles_in_milliseconds() {
        let agg = Aggregator::with_error_rate().unwrap();
        for ms in 1..=100 {
            agg.record(outcome(Ok(200), ms)).unwrap();
        }
        let latency = agg.snapshot().latency;
        assert!((latency.fastest_response - 1.0).abs() < 0.01);
        assert!((latency.slowest_response - 100.0).abs() < 0.1);
        assert!((latency.median_response_time - 50.0).abs() < 0.1);
        assert!((latency.p99 - 99.0).abs() < 0.1);
        assert!((latency.mean_response_time - 50.5).abs() < 0.1);
    }

    #[test]
    fn named_rates_are_fixed_at_construction() {
        let agg = Aggregator::with_error_rate().unwrap();
        agg.add_rate(ERRORS, true).unwrap();
        agg.add_rate(ERRORS, false).unwrap();
        assert_eq!(
            agg.add_rate("checks", true),
            Err(AggregateError::UnknownMetric("checks".into()))
        );
        let rate = agg.snapshot().rates[ERRORS];
        assert_eq!(rate, Rate { hits: 1, total: 2 });
    }

    #[test]
    fn unknown_rate_rejects_whole_record() {
        let agg = Aggregator::with_error_rate().unwrap();
        let result = agg.record_with_rates(outcome(Ok(200), 10), &[("latency", true)]);
        assert_eq!(result, Err(AggregateError::UnknownMetric("latency".into())));
        assert_eq!(agg.snapshot().total_requests, 0);

        agg.record_with_rates(outcome(Ok(500), 10), &[(ERRORS, true)])
            .unwrap();
        let summary = agg.snapshot();
        assert_eq!(summary.total_requests, 1);
        assert_eq!(summary.rates[ERRORS], Rate { hits: 1, total: 1 });
    }

    #[test]
    fn finalize_rejects_later_outcomes() {
        let agg = Aggregator::with_error_rate().unwrap();
        agg.set_active_vus(3);
        agg.record(outcome(Ok(200), 10)).unwrap();

        let final_summary = agg.finalize();
        assert!(final_summary.finalized);
        assert_eq!(final_summary.active_vus, 0);

        assert_eq!(
            agg.record(outcome(Ok(200), 10)),
            Err(AggregateError::Finalized)
        );
        assert_eq!(agg.add_rate(ERRORS, false), Err(AggregateError::Finalized));
        assert_eq!(agg.finalize(), final_summary);
        assert_eq!(agg.snapshot().total_requests, 1);
    }

    #[test]
    fn concurrent_submissions_are_not_lost() {
        let agg = Arc::new(Aggregator::with_error_rate().unwrap());
        let threads = 16;
        let per_thread = 500;

        std::thread::scope(|s| {
            for t in 0..threads {
                let agg = Arc::clone(&agg);
                s.spawn(move || {
                    for i in 0..per_thread {
                        let status = if (t + i) % 10 == 0 { 500 } else { 200 };
                        let o = outcome(Ok(status), 5);
                        let failed = !o.passed();
                        agg.record_with_rates(o, &[(ERRORS, failed)]).unwrap();
                    }
                });
            }
        });

        let summary = agg.finalize();
        assert_eq!(summary.total_requests, threads * per_thread);
        assert_eq!(summary.failed_requests, 800);
        assert_eq!(summary.rates[ERRORS].total, threads * per_thread);
        assert_eq!(summary.rates[ERRORS].hits, 800);
        assert_eq!(summary.error_rate, 0.1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_tasks_are_not_lost() {
        let agg = Arc::new(Aggregator::with_error_rate().unwrap());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let agg = Arc::clone(&agg);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    agg.record(outcome(Ok(200), 1)).unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(agg.snapshot().total_requests, 5000);
    }
}
