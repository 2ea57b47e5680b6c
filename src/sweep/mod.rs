//! Sweep engine
//!
//! This module contains the concurrent sweep machinery:
//! - `planner`: shards the range and feeds inner batches to the queue
//! - `fetcher`: paced, bounded HTTP fetching with retries and classification
//! - `worker`: the per-worker claim, fetch, extract, record loop
//! - `control`: cancellation and abort signalling
//! - `coordinator`: wires everything together and drives the sweep state

mod control;
mod coordinator;
mod fetcher;
mod planner;
mod worker;

pub use control::{AbortReason, SweepControl};
pub use coordinator::Coordinator;
pub use fetcher::{FetchFailure, FetchPolicy, FetchReport, Fetcher, RawResponse};
pub use planner::{feed_batches, plan_shards, InnerBatch, Shard};
pub use worker::{run_worker, WorkerContext, WorkerStats};
