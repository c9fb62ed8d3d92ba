use chrono::Local;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{self, JoinHandle};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::client::{build_client, RequestTemplate};
use crate::error::ConfigError;
use crate::models::dsl_model::DslConfig;
use crate::models::metrics::Metrics;
use crate::runner::{RunContext, VirtualUser};
use crate::scheduler::{Directive, Scheduler};
use crate::utils::hardware::get_hardware_info;

pub mod report;

const TICK: Duration = Duration::from_millis(100);
const PROGRESS_EVERY: Duration = Duration::from_secs(5);

struct LiveUser {
    stop: CancellationToken,
    handle: JoinHandle<u64>,
}

/// Runs the ramp profile against the target and returns the final report.
///
/// Outcomes go into `aggregator`, which callers may read while the test runs.
/// Cancelling `stop` ends the test early; in both cases every virtual user
/// finishes its current iteration (bounded by the drain timeout) before the
/// aggregator is finalized.
pub async fn run_load_test(
    config: DslConfig,
    aggregator: Arc<Aggregator>,
    stop: CancellationToken,
) -> Result<Metrics, ConfigError> {
    config.validate()?;
    let template = RequestTemplate::from_config(&config)?;
    let host = task::spawn_blocking(get_hardware_info)
        .await
        .unwrap_or_default();

    let config = Arc::new(config);
    let ctx = RunContext {
        client: build_client(),
        template: Arc::new(template),
        config: Arc::clone(&config),
        aggregator: Arc::clone(&aggregator),
    };

    info!(
        name = %config.name,
        target = %config.target,
        stages = config.stages.len(),
        duration = ?config.total_duration(),
        max_vus = config.max_target(),
        "starting load test"
    );

    let mut scheduler = Scheduler::new(config.stages.clone());
    let mut live: Vec<LiveUser> = Vec::new();
    let mut stopped: Vec<JoinHandle<u64>> = Vec::new();
    let mut next_id = 0u64;
    let mut max_vus = 0u64;

    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let started = Instant::now();
    let mut last_progress = started;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.cancelled() => {
                warn!("stop requested, draining virtual users");
                break;
            }
        }

        match scheduler.tick(started.elapsed()) {
            Directive::Start(n) => {
                for _ in 0..n {
                    let token = stop.child_token();
                    let vu = VirtualUser::new(next_id, ctx.clone(), token.clone());
                    live.push(LiveUser {
                        stop: token,
                        handle: vu.spawn(),
                    });
                    next_id += 1;
                }
            }
            Directive::Stop(n) => {
                // Newest first.
                for user in live.drain(live.len().saturating_sub(n as usize)..).rev() {
                    user.stop.cancel();
                    stopped.push(user.handle);
                }
            }
            Directive::Hold => {}
            Directive::Finished => break,
        }

        let active = live.len() as u64;
        max_vus = max_vus.max(active);
        aggregator.set_active_vus(active);

        if last_progress.elapsed() >= PROGRESS_EVERY {
            last_progress = Instant::now();
            let snapshot = aggregator.snapshot();
            info!(
                elapsed_secs = started.elapsed().as_secs(),
                vus = active,
                requests = snapshot.total_requests,
                error_rate = snapshot.error_rate,
                "progress"
            );
        }
    }

    for user in live.drain(..) {
        user.stop.cancel();
        stopped.push(user.handle);
    }
    aggregator.set_active_vus(0);
    drain(&mut stopped, config.drain_timeout()).await;

    let summary = aggregator.finalize();
    let elapsed = started.elapsed().as_secs_f64();
    let throughput = if elapsed > 0.0 {
        summary.total_requests as f64 / elapsed
    } else {
        0.0
    };

    info!(
        requests = summary.total_requests,
        error_rate = summary.error_rate,
        "load test finished"
    );

    Ok(Metrics {
        name: config.name.clone(),
        target_url: config.target.clone(),
        http_method: "POST".to_string(),
        stages: config.stages.clone(),
        max_vus,
        elapsed_secs: elapsed,
        throughput,
        timestamp: Local::now().format("%Y/%m/%d %H:%M:%S").to_string(),
        host,
        summary,
        error_threshold: config.thresholds.error_rate,
    })
}

/// Waits for stopped users to finish their last iteration. Users still busy
/// after `limit` are aborted; whatever they produce afterwards is rejected by
/// the finalized aggregator.
async fn drain(handles: &mut [JoinHandle<u64>], limit: Duration) {
    if handles.is_empty() {
        return;
    }

    let joined = timeout(limit, futures::future::join_all(handles.iter_mut())).await;
    match joined {
        Ok(results) => {
            let iterations: u64 = results.into_iter().filter_map(Result::ok).sum();
            info!(vus = handles.len(), iterations, "virtual users drained");
        }
        Err(_) => {
            let stragglers = handles.iter().filter(|h| !h.is_finished()).count();
            warn!(stragglers, limit = ?limit, "drain timed out, aborting virtual users");
            for handle in handles.iter() {
                handle.abort();
            }
        }
    }
}
