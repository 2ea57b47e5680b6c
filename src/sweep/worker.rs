//! Worker loop
//!
//! Each worker pulls inner batches from the shared queue and processes their
//! targets strictly one after another: claim in the registry, fetch, extract,
//! push records to the result channel, record the outcome. Per-target
//! failures never leave this loop; they become outcomes.

use crate::extract::{Extraction, Record};
use crate::output::ProgressEvent;
use crate::session::{SessionHandle, SessionPool};
use crate::state::{ClaimResult, NotFoundReason, Outcome, PermanentKind, Registry, SkipReason};
use crate::sweep::control::{AbortReason, SweepControl};
use crate::sweep::fetcher::{FetchFailure, Fetcher};
use crate::sweep::planner::InnerBatch;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Everything a worker shares with the rest of the sweep
pub struct WorkerContext {
    pub registry: Arc<Registry>,
    pub fetcher: Arc<Fetcher>,
    pub pool: Arc<SessionPool>,
    pub control: Arc<SweepControl>,
    pub records: mpsc::Sender<Record>,
    pub progress: mpsc::UnboundedSender<ProgressEvent>,
    /// Abort the sweep on the first auth-expired response
    pub fatal_auth_expired: bool,
    /// How long to keep working the current batch after external cancellation
    pub cancel_grace: Duration,
}

/// Per-worker counters, returned when the worker exits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub worker: usize,
    pub batches: u64,
    /// Fetcher invocations
    pub fetches: u64,
    /// Targets that reached a terminal outcome in this worker
    pub finished: u64,
    pub records: u64,
    /// Transient failures put back at the end of the batch
    pub reentries: u64,
}

/// Whether the worker should keep pulling batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Runs one worker until the batch queue is closed and empty, or the sweep
/// is cancelled
pub async fn run_worker(
    worker: usize,
    ctx: Arc<WorkerContext>,
    batches: async_channel::Receiver<InnerBatch>,
) -> WorkerStats {
    let session = ctx.pool.acquire();
    let cancel = ctx.control.token();
    let mut stats = WorkerStats {
        worker,
        ..WorkerStats::default()
    };

    tracing::debug!(worker, session = session.id(), "Worker started");

    loop {
        let batch = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            batch = batches.recv() => match batch {
                Ok(batch) => batch,
                Err(_) => break,
            },
        };

        stats.batches += 1;
        tracing::trace!(worker, lo = batch.lo, hi = batch.hi, "Batch pulled");

        if process_batch(&ctx, &session, batch, &mut stats).await == Flow::Stop {
            break;
        }
    }

    ctx.pool.release(&session);
    let _ = ctx.progress.send(ProgressEvent::WorkerDone { worker });
    tracing::debug!(
        worker,
        batches = stats.batches,
        fetches = stats.fetches,
        records = stats.records,
        "Worker stopped"
    );
    stats
}

async fn process_batch(
    ctx: &WorkerContext,
    session: &SessionHandle,
    batch: InnerBatch,
    stats: &mut WorkerStats,
) -> Flow {
    let mut pending: VecDeque<u64> = batch.targets().collect();
    let mut grace_deadline: Option<Instant> = None;

    while let Some(target) = pending.pop_front() {
        if ctx.control.is_cancelled() {
            if ctx.control.abort_reason().is_some() {
                return Flow::Stop;
            }
            let deadline = *grace_deadline.get_or_insert_with(|| Instant::now() + ctx.cancel_grace);
            if Instant::now() >= deadline {
                tracing::debug!(
                    worker = stats.worker,
                    discarded = pending.len() + 1,
                    "Cancelled, discarding rest of batch"
                );
                return Flow::Stop;
            }
        }

        match ctx.registry.check_and_claim(target) {
            ClaimResult::ShouldProcess => {}
            ClaimResult::AlreadyVisited | ClaimResult::InFlight => {
                tracing::trace!(id = target, "Already handled elsewhere");
                continue;
            }
            ClaimResult::OverFailureCap => {
                let outcome = Outcome::Skipped(SkipReason::OverFailureCap);
                if ctx.registry.record_outcome(target, &outcome) {
                    finish(ctx, stats, &outcome);
                }
                continue;
            }
        }

        match process_target(ctx, session, target, stats).await {
            Some(outcome) => {
                let terminal = ctx.registry.record_outcome(target, &outcome);
                if terminal {
                    tracing::debug!(id = target, outcome = %outcome, "Target finished");
                    finish(ctx, stats, &outcome);
                } else if outcome.is_transient() {
                    tracing::debug!(
                        id = target,
                        failures = ctx.registry.failure_count(target),
                        "Transient failure, re-entering target"
                    );
                    stats.reentries += 1;
                    pending.push_back(target);
                }
            }
            None => return Flow::Stop,
        }

        if ctx.control.abort_reason().is_some() {
            return Flow::Stop;
        }
    }

    Flow::Continue
}

/// Fetches and extracts one claimed target
///
/// Returns `None` when the sweep must stop; the claim has then been recorded
/// or released and the sweep aborted.
async fn process_target(
    ctx: &WorkerContext,
    session: &SessionHandle,
    target: u64,
    stats: &mut WorkerStats,
) -> Option<Outcome> {
    stats.fetches += 1;
    let report = ctx.fetcher.fetch(session, target, &ctx.control.token()).await;
    ctx.registry.note_retries(target, report.retries);

    let outcome = match report.result {
        Ok(raw) => match ctx.fetcher.extract(target, &raw) {
            Ok(Extraction::Filtered) => Outcome::NotFound(NotFoundReason::Filtered),
            Ok(Extraction::Rows(rows)) => {
                let count = rows.len();
                for record in rows {
                    if ctx.records.send(record).await.is_err() {
                        tracing::error!(id = target, "Result channel closed, record dropped");
                    }
                }
                stats.records += count as u64;
                Outcome::Record { rows: count }
            }
            Err(kind) => Outcome::PermanentError(kind),
        },
        Err(FetchFailure::NotFound(reason)) => Outcome::NotFound(reason),
        Err(FetchFailure::Transient(kind)) => Outcome::TransientError(kind),
        Err(FetchFailure::Permanent(kind)) => Outcome::PermanentError(kind),
        Err(FetchFailure::AuthExpired) if ctx.fatal_auth_expired => {
            let outcome = Outcome::PermanentError(PermanentKind::AuthExpired);
            if ctx.registry.record_outcome(target, &outcome) {
                finish(ctx, stats, &outcome);
            }
            ctx.control.abort(AbortReason::AuthExpired { target });
            return None;
        }
        Err(FetchFailure::AuthExpired) => {
            tracing::warn!(id = target, "Session expired, continuing best-effort");
            Outcome::PermanentError(PermanentKind::AuthExpired)
        }
        Err(FetchFailure::AuthExhausted(detail)) => {
            ctx.registry.release(target);
            ctx.control.abort(AbortReason::AuthExhausted(detail));
            return None;
        }
    };

    Some(outcome)
}

fn finish(ctx: &WorkerContext, stats: &mut WorkerStats, outcome: &Outcome) {
    stats.finished += 1;
    let rows = match outcome {
        Outcome::Record { rows } => *rows,
        _ => 0,
    };
    let _ = ctx.progress.send(ProgressEvent::Finished {
        category: outcome.category(),
        rows,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, UrlTemplate};
    use crate::extract::build_extractor;
    use crate::session::CookieSet;
    use crate::state::OutcomeCategory;
    use crate::sweep::fetcher::FetchPolicy;
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<html><body><form><input name="nome" value="MARIA"></form>
        <p>padding padding padding padding padding padding padding padding</p></body></html>"#;

    fn create_test_config(server: &MockServer) -> Config {
        let mut config = Config::default();
        config.sweep.id_range = (1, 10);
        config.sweep.worker_count = 1;
        config.sweep.max_attempts_per_target = 2;
        config.sweep.endpoint_template = format!("{}/item/{{}}", server.uri());
        config.http.min_interval_ms = 0;
        config.http.backoff_factor = 0.001;
        config.http.max_retries = 1;
        config
    }

    struct Harness {
        ctx: Arc<WorkerContext>,
        records: mpsc::Receiver<Record>,
        progress: mpsc::UnboundedReceiver<ProgressEvent>,
    }

    fn harness(config: &Config) -> Harness {
        let template = UrlTemplate::parse(&config.sweep.endpoint_template).unwrap();
        let cookies = CookieSet::parse_header("ci_session=abc").unwrap();
        let pool = Arc::new(SessionPool::new(config, &template, &cookies, None).unwrap());
        let extractor = build_extractor(&config.sweep.extractor, &config.extractor).unwrap();
        let fetcher = Arc::new(Fetcher::new(
            FetchPolicy::from_config(&config.http),
            template,
            Arc::clone(&pool),
            extractor,
            config.sweep.worker_count,
        ));
        let (records_tx, records) = mpsc::channel(64);
        let (progress_tx, progress) = mpsc::unbounded_channel();

        let ctx = Arc::new(WorkerContext {
            registry: Arc::new(Registry::new(config.sweep.max_attempts_per_target, 5)),
            fetcher,
            pool,
            control: Arc::new(SweepControl::new()),
            records: records_tx,
            progress: progress_tx,
            fatal_auth_expired: config.sweep.fatal_abort_on_auth_expired,
            cancel_grace: Duration::ZERO,
        });
        Harness {
            ctx,
            records,
            progress,
        }
    }

    fn html(status: u16, body: &str) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_raw(body.as_bytes().to_vec(), "text/html")
    }

    async fn run_batches(ctx: &Arc<WorkerContext>, batches: &[InnerBatch]) -> WorkerStats {
        let (tx, rx) = async_channel::bounded(batches.len().max(1));
        for batch in batches {
            tx.send(*batch).await.unwrap();
        }
        drop(tx);
        run_worker(0, Arc::clone(ctx), rx).await
    }

    #[tokio::test]
    async fn test_worker_records_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/1"))
            .respond_with(html(200, PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/item/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = create_test_config(&server);
        let mut h = harness(&config);
        let stats = run_batches(&h.ctx, &[InnerBatch { shard: 0, lo: 1, hi: 2 }]).await;

        assert_eq!(stats.finished, 2);
        assert_eq!(stats.records, 1);
        let snapshot = h.ctx.registry.snapshot();
        assert_eq!(snapshot.count(OutcomeCategory::Record), 1);
        assert_eq!(snapshot.count(OutcomeCategory::NotFound), 1);

        let record = h.records.try_recv().unwrap();
        assert_eq!(record.get("id"), Some("1"));
        assert!(h.records.try_recv().is_err());

        let mut events = Vec::new();
        while let Ok(event) = h.progress.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], ProgressEvent::WorkerDone { worker: 0 });
    }

    #[tokio::test]
    async fn test_transient_target_reenters_until_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/5"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = create_test_config(&server);
        let h = harness(&config);
        let stats = run_batches(&h.ctx, &[InnerBatch { shard: 0, lo: 5, hi: 5 }]).await;

        // max_attempts_per_target = 2 fetch calls, max_retries = 1 inside each
        assert_eq!(stats.fetches, 2);
        assert_eq!(stats.reentries, 1);
        assert_eq!(h.ctx.registry.failure_count(5), 2);
        assert_eq!(h.ctx.registry.retries_for(5), 2);
        assert_eq!(
            h.ctx.registry.snapshot().count(OutcomeCategory::TransientFailed),
            1
        );
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 4);
    }

    #[tokio::test]
    async fn test_auth_expired_aborts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/3"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/item/\d+$"))
            .respond_with(html(200, PAGE))
            .mount(&server)
            .await;

        let config = create_test_config(&server);
        let h = harness(&config);
        let stats = run_batches(
            &h.ctx,
            &[
                InnerBatch { shard: 0, lo: 1, hi: 5 },
                InnerBatch { shard: 0, lo: 6, hi: 10 },
            ],
        )
        .await;

        assert_eq!(stats.batches, 1);
        assert_eq!(stats.fetches, 3);
        assert_eq!(
            h.ctx.control.abort_reason(),
            Some(AbortReason::AuthExpired { target: 3 })
        );
        let snapshot = h.ctx.registry.snapshot();
        assert_eq!(snapshot.count(OutcomeCategory::Record), 2);
        assert_eq!(snapshot.count(OutcomeCategory::Permanent), 1);
        assert!(!h.ctx.registry.is_visited(4));
    }

    #[tokio::test]
    async fn test_auth_expired_best_effort() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/item/3"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/item/\d+$"))
            .respond_with(html(200, PAGE))
            .mount(&server)
            .await;

        let mut config = create_test_config(&server);
        config.sweep.fatal_abort_on_auth_expired = false;
        let h = harness(&config);
        let stats = run_batches(&h.ctx, &[InnerBatch { shard: 0, lo: 1, hi: 5 }]).await;

        assert_eq!(stats.finished, 5);
        assert_eq!(h.ctx.control.abort_reason(), None);
        assert_eq!(h.ctx.registry.snapshot().count(OutcomeCategory::Record), 4);
    }

    #[tokio::test]
    async fn test_cancelled_worker_stops_before_next_target() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html(200, PAGE))
            .mount(&server)
            .await;

        let config = create_test_config(&server);
        let h = harness(&config);
        h.ctx.control.cancel();
        let stats = run_batches(&h.ctx, &[InnerBatch { shard: 0, lo: 1, hi: 5 }]).await;

        assert_eq!(stats.fetches, 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_visited_targets_are_not_fetched() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(html(200, PAGE))
            .mount(&server)
            .await;

        let config = create_test_config(&server);
        let h = harness(&config);
        h.ctx
            .registry
            .record_outcome(2, &Outcome::NotFound(NotFoundReason::Absent));

        let stats = run_batches(&h.ctx, &[InnerBatch { shard: 0, lo: 1, hi: 3 }]).await;
        assert_eq!(stats.fetches, 2);
    }
}
