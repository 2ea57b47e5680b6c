//! Sweep coordinator
//!
//! Drives one sweep through its lifecycle: authenticate, build the session
//! pool and registry, start the publisher and progress reporter, feed the
//! planner's batches to `worker_count` workers, drain, and report.

use crate::config::{config_fingerprint, validate, Config, UrlTemplate};
use crate::extract::Extractor;
use crate::output::{
    generate_markdown_summary, BatchPublisher, ProgressReporter, PublishSink, PublisherSettings,
    SweepReport,
};
use crate::session::{credentials_from_config, LoginProvider, SessionPool};
use crate::state::{Registry, SweepState};
use crate::sweep::control::{AbortReason, SweepControl};
use crate::sweep::fetcher::{FetchPolicy, Fetcher};
use crate::sweep::planner::{feed_batches, plan_shards};
use crate::sweep::worker::{run_worker, WorkerContext, WorkerStats};
use crate::{AuthError, SweepError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Main sweep coordinator
pub struct Coordinator {
    config: Config,
    login: Arc<dyn LoginProvider>,
    extractor: Arc<dyn Extractor>,
    sink: Arc<dyn PublishSink>,
    control: Arc<SweepControl>,
    state: SweepState,
}

impl Coordinator {
    /// Creates a new coordinator
    ///
    /// # Arguments
    ///
    /// * `config` - Effective configuration
    /// * `login` - Login collaborator, run once before the sweep starts
    /// * `extractor` - Extractor selected for this sweep
    /// * `sink` - Destination for published batches
    pub fn new(
        config: Config,
        login: Arc<dyn LoginProvider>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<dyn PublishSink>,
    ) -> Self {
        Self {
            config,
            login,
            extractor,
            sink,
            control: Arc::new(SweepControl::new()),
            state: SweepState::Idle,
        }
    }

    /// Handle for cancelling the sweep from another task
    pub fn control(&self) -> Arc<SweepControl> {
        Arc::clone(&self.control)
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    fn transition(&mut self, next: SweepState) -> Result<(), SweepError> {
        let previous = self.state;
        self.state = previous.transition(next)?;
        tracing::info!("Sweep state: {} -> {}", previous, next);
        Ok(())
    }

    /// Runs the sweep to completion
    ///
    /// Authentication failures and fatal aborts still produce a report whose
    /// state is `Aborted`; only configuration and infrastructure failures are
    /// returned as errors.
    ///
    /// # Returns
    ///
    /// * `Ok(SweepReport)` - The sweep reached `Done` or `Aborted`
    /// * `Err(SweepError)` - Invalid configuration or a task failure
    pub async fn run(&mut self) -> Result<SweepReport, SweepError> {
        validate(&self.config)?;

        let clock = Instant::now();
        let started_at = Utc::now();
        let fingerprint = config_fingerprint(&self.config)?;
        let sweep_id = format!(
            "{}-{}",
            started_at.format("%Y%m%dT%H%M%SZ"),
            &fingerprint[..8]
        );
        let (lo, hi) = self.config.sweep.id_range;
        let workers = self.config.sweep.worker_count.max(1);
        let mut report = SweepReport::new(&sweep_id, (lo, hi), self.extractor.id(), started_at);

        tracing::info!(
            sweep_id = %sweep_id,
            lo,
            hi,
            workers,
            extractor = self.extractor.id(),
            "Starting sweep"
        );

        self.transition(SweepState::Authenticating)?;
        let pool = match self.authenticate().await {
            Ok(pool) => pool,
            Err(SweepError::Auth(e)) => {
                tracing::error!(error = %e, "Authentication failed");
                self.control.abort(match e {
                    AuthError::Exhausted(detail) => AbortReason::AuthExhausted(detail),
                    other => AbortReason::LoginFailed(other.to_string()),
                });
                self.transition(SweepState::Aborted)?;
                return Ok(self.finish(report, clock));
            }
            Err(e) => return Err(e),
        };

        self.transition(SweepState::Running)?;

        let template = UrlTemplate::parse(&self.config.sweep.endpoint_template)?;
        let fetcher = Arc::new(Fetcher::new(
            FetchPolicy::from_config(&self.config.http),
            template,
            Arc::clone(&pool),
            Arc::clone(&self.extractor),
            workers,
        ));
        let registry = Arc::new(Registry::new(
            self.config.sweep.max_attempts_per_target,
            self.config.output.report_samples,
        ));

        let batch_publish = self.config.publisher.batch_publish.max(1);
        let (records_tx, records_rx) = mpsc::channel(4 * batch_publish);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = async_channel::bounded(2 * workers);

        let publisher = BatchPublisher::new(
            PublisherSettings::from_config(
                &self.config,
                &sweep_id,
                self.extractor.id(),
                &fingerprint,
            ),
            self.extractor.schema(),
            Arc::clone(&self.sink),
        );
        let publisher_handle = tokio::spawn(publisher.run(records_rx));

        let reporter = ProgressReporter::new(report.range_len(), self.config.output.progress_every);
        let reporter_handle = tokio::spawn(reporter.run(progress_rx));

        let shards = plan_shards(lo, hi, workers);
        tracing::debug!(shards = shards.len(), "Planned shards");
        let planner_handle = tokio::spawn(feed_batches(
            shards,
            self.config.sweep.batch_inner,
            queue_tx,
            self.control.token(),
        ));

        let ctx = Arc::new(WorkerContext {
            registry: Arc::clone(&registry),
            fetcher: Arc::clone(&fetcher),
            pool: Arc::clone(&pool),
            control: Arc::clone(&self.control),
            records: records_tx,
            progress: progress_tx,
            fatal_auth_expired: self.config.sweep.fatal_abort_on_auth_expired,
            cancel_grace: Duration::from_millis(self.config.sweep.cancel_grace_ms),
        });

        let mut worker_tasks = JoinSet::new();
        for id in 0..workers {
            worker_tasks.spawn(run_worker(id, Arc::clone(&ctx), queue_rx.clone()));
        }
        // Workers now hold the only result and progress senders
        drop(queue_rx);
        drop(ctx);

        let control = Arc::clone(&self.control);
        let mut draining = false;
        let mut worker_stats: Vec<WorkerStats> = Vec::with_capacity(workers);
        loop {
            tokio::select! {
                _ = control.cancelled(), if !draining => {
                    self.transition(SweepState::Draining)?;
                    draining = true;
                }
                joined = worker_tasks.join_next() => match joined {
                    Some(Ok(stats)) => worker_stats.push(stats),
                    Some(Err(e)) => tracing::error!(error = %e, "Worker task failed"),
                    None => break,
                },
            }
        }
        if !draining {
            self.transition(SweepState::Draining)?;
        }

        let queued = planner_handle.await?;
        let fetches: u64 = worker_stats.iter().map(|s| s.fetches).sum();
        tracing::info!(
            batches = queued,
            fetches,
            workers = worker_stats.len(),
            "Workers finished, draining publisher"
        );

        let publish_summary = publisher_handle.await?;
        let progress = reporter_handle.await?;

        self.transition(SweepState::Reporting)?;
        let snapshot = registry.snapshot();
        if snapshot.terminal_total() != progress.finished {
            tracing::warn!(
                registry = snapshot.terminal_total(),
                reported = progress.finished,
                "Progress and registry totals differ"
            );
        }
        report.absorb_registry(snapshot);
        report.absorb_publish(publish_summary);
        report.peak_in_flight = fetcher.peak_in_flight();

        let last = if self.control.abort_reason().is_some() {
            SweepState::Aborted
        } else {
            SweepState::Done
        };
        self.transition(last)?;

        Ok(self.finish(report, clock))
    }

    /// Runs the login collaborator and builds the session pool
    async fn authenticate(&self) -> Result<Arc<SessionPool>, SweepError> {
        let credentials = credentials_from_config(&self.config);
        let session = self.login.login(&credentials).await?;
        tracing::info!(cookies = session.cookies.len(), "Login collaborator returned cookies");

        let template = UrlTemplate::parse(&self.config.sweep.endpoint_template)?;
        let pool = SessionPool::new(
            &self.config,
            &template,
            &session.cookies,
            session.user_agent.as_deref(),
        )?;
        Ok(Arc::new(pool))
    }

    fn finish(&self, mut report: SweepReport, clock: Instant) -> SweepReport {
        report.state = self.state;
        report.abort_reason = self.control.abort_reason().map(|r| r.to_string());
        report.elapsed = clock.elapsed();

        tracing::info!(
            state = %report.state,
            terminal = report.terminal_total(),
            records = report.records_emitted,
            elapsed_secs = report.elapsed.as_secs_f64(),
            "Sweep finished"
        );

        if let Some(path) = &self.config.output.summary_path {
            match generate_markdown_summary(&report, path) {
                Ok(()) => tracing::info!(path = %path.display(), "Markdown summary written"),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to write markdown summary"),
            }
        }

        report
    }
}
