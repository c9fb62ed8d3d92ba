//! Staged HTTP load generator.
//!
//! A [`scheduler::Scheduler`] turns a ramp profile into start/stop
//! directives, each [`runner::VirtualUser`] loops POST requests and checks,
//! and every outcome lands in a shared [`aggregator::Aggregator`].
//! [`executor::run_load_test`] wires the three together.

pub mod aggregator;
pub mod client;
pub mod error;
pub mod executor;
pub mod models;
pub mod runner;
pub mod scheduler;
pub mod telemetry;
pub mod utils;
pub mod ws;
