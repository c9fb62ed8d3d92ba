//! Virtual users.
//!
//! A virtual user loops request/check iterations until its stop token is
//! cancelled. The token is only looked at between iterations, so a request in
//! flight always completes (or times out) and its outcome is reported.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::aggregator::{Aggregator, ERRORS};
use crate::client::{send_request, HttpsClient, RequestTemplate};
use crate::error::AggregateError;
use crate::models::dsl_model::DslConfig;
use crate::models::outcome::RequestOutcome;

/// Everything a virtual user shares with the rest of the run.
#[derive(Clone)]
pub struct RunContext {
    pub client: HttpsClient,
    pub template: Arc<RequestTemplate>,
    pub config: Arc<DslConfig>,
    pub aggregator: Arc<Aggregator>,
}

pub struct VirtualUser {
    id: u64,
    ctx: RunContext,
    stop: CancellationToken,
}

impl VirtualUser {
    pub fn new(id: u64, ctx: RunContext, stop: CancellationToken) -> Self {
        Self { id, ctx, stop }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Runs the user on its own task. The handle resolves to the number of
    /// iterations performed.
    pub fn spawn(self) -> JoinHandle<u64> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) -> u64 {
        debug!(vu = self.id, "virtual user started");
        let pacing = self.ctx.config.pacing();
        let mut iteration = 0;

        while !self.stop.is_cancelled() {
            let outcome = self.iterate(iteration).await;
            iteration += 1;

            if let Err(e) = self.report(outcome) {
                match e {
                    AggregateError::Finalized => {
                        debug!(vu = self.id, "run finalized, dropping late outcome")
                    }
                    _ => error!(vu = self.id, error = %e, "failed to record outcome"),
                }
                break;
            }

            if let Some(pause) = pacing {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = sleep(pause) => {}
                }
            }
        }

        debug!(vu = self.id, iterations = iteration, "virtual user stopped");
        iteration
    }

    /// One request/check cycle.
    pub async fn iterate(&self, iteration: u64) -> RequestOutcome {
        let config = &self.ctx.config;
        let (result, elapsed) =
            send_request(&self.ctx.client, &self.ctx.template, config.request_timeout()).await;

        if let Err(e) = &result {
            warn!(vu = self.id, iteration, error = %e, "request failed");
        }

        RequestOutcome::evaluate(self.id, iteration, result, elapsed, &config.checks)
    }

    fn report(&self, outcome: RequestOutcome) -> Result<(), AggregateError> {
        let failed = !outcome.passed();
        if failed {
            debug!(
                vu = self.id,
                iteration = outcome.iteration,
                status = ?outcome.status,
                duration_ms = outcome.duration.as_millis() as u64,
                "checks failed"
            );
        }
        self.ctx
            .aggregator
            .record_with_rates(outcome, &[(ERRORS, failed)])
    }
}
