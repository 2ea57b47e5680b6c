//! Integration tests for the sweep engine
//!
//! These tests use wiremock to stand in for both the scraped site and the
//! publish sink, and run complete sweeps end-to-end.

use id_sweep::config::Config;
use id_sweep::extract::{builder, ExtractError, Extraction, Extractor, Schema};
use id_sweep::output::{HttpSink, PublishSink};
use id_sweep::session::{LoginProvider, StaticCookies};
use id_sweep::state::OutcomeCategory;
use id_sweep::sweep::{Coordinator, SweepControl};
use id_sweep::SweepState;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Emits one `{id, body}` record per response; optionally filters odd IDs
struct EchoExtractor {
    schema: Arc<Schema>,
    filter_odd: bool,
}

impl EchoExtractor {
    fn new(filter_odd: bool) -> Self {
        Self {
            schema: Schema::new(&["id", "body"]),
            filter_odd,
        }
    }
}

impl Extractor for EchoExtractor {
    fn id(&self) -> &str {
        "echo"
    }

    fn schema(&self) -> Arc<Schema> {
        Arc::clone(&self.schema)
    }

    fn extract(
        &self,
        target: u64,
        body: &[u8],
        _content_type: Option<&str>,
    ) -> Result<Extraction, ExtractError> {
        if self.filter_odd && target % 2 == 1 {
            return Ok(Extraction::Filtered);
        }
        let record = builder(&self.schema)
            .set("id", target.to_string())?
            .set("body", String::from_utf8_lossy(body).trim().to_string())?
            .finish()?;
        Ok(Extraction::Rows(vec![record]))
    }
}

/// Returns 401 for the n-th request it sees, 200 otherwise
struct ExpireOnNth {
    seen: AtomicUsize,
    nth: usize,
}

impl Respond for ExpireOnNth {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let seen = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        if seen == self.nth {
            ResponseTemplate::new(401)
        } else {
            ResponseTemplate::new(200).set_body_string("record")
        }
    }
}

/// Cancels the sweep and fails on the first POST, accepts the rest
struct CancelOnFirstPost {
    control: Arc<SweepControl>,
    seen: AtomicUsize,
}

impl Respond for CancelOnFirstPost {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.seen.fetch_add(1, Ordering::SeqCst) == 0 {
            self.control.cancel();
            ResponseTemplate::new(503)
        } else {
            ResponseTemplate::new(200)
        }
    }
}

/// Creates a test configuration pointing at the stub site and sink
fn create_test_config(
    site: &MockServer,
    sink: &MockServer,
    spool: &TempDir,
    range: (u64, u64),
    workers: usize,
) -> Config {
    let mut config = Config::default();
    config.sweep.id_range = range;
    config.sweep.worker_count = workers;
    config.sweep.batch_inner = 3;
    config.sweep.endpoint_template = format!("{}/item/{{}}", site.uri());
    config.sweep.extractor = "members".to_string();
    config.http.min_interval_ms = 1;
    config.http.body_min_size = 1;
    config.http.backoff_factor = 0.01;
    config.http.request_timeout_seconds = 5.0;
    config.publisher.endpoint = Some(format!("{}/ingest", sink.uri()));
    config.publisher.publish_backoff_factor = 0.01;
    config.publisher.spool_dir = spool.path().to_path_buf();
    config
}

fn create_coordinator(config: Config, extractor: EchoExtractor) -> Coordinator {
    let login: Arc<dyn LoginProvider> =
        Arc::new(StaticCookies::from_header("ci_session=integration").unwrap());
    let endpoint = url::Url::parse(config.publisher.endpoint.as_deref().unwrap()).unwrap();
    let sink: Arc<dyn PublishSink> =
        Arc::new(HttpSink::new(endpoint, Duration::from_secs(5)).unwrap());
    Coordinator::new(config, login, Arc::new(extractor), sink)
}

async fn mount_sink_ok(sink: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(200))
        .mount(sink)
        .await;
}

/// Every POST body the sink received, in arrival order
async fn sink_payloads(sink: &MockServer) -> Vec<serde_json::Value> {
    sink.received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method == wiremock::http::Method::Post)
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect()
}

fn row_ids(payloads: &[serde_json::Value]) -> Vec<String> {
    payloads
        .iter()
        .flat_map(|p| p["rows"].as_array().unwrap().clone())
        .map(|row| row[0].as_str().unwrap().to_string())
        .collect()
}

fn spool_files(spool: &TempDir) -> usize {
    std::fs::read_dir(spool.path()).unwrap().count()
}

#[tokio::test]
async fn test_records_and_not_found() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path_regex(r"^/item/[135]$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/item/[24]$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&site)
        .await;
    mount_sink_ok(&sink).await;

    let config = create_test_config(&site, &sink, &spool, (1, 5), 2);
    let report = create_coordinator(config, EchoExtractor::new(false))
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert_eq!(report.count(OutcomeCategory::Record), 3);
    assert_eq!(report.count(OutcomeCategory::NotFound), 2);
    assert_eq!(report.terminal_total(), 5);

    let ids: BTreeSet<String> = row_ids(&sink_payloads(&sink).await).into_iter().collect();
    let expected: BTreeSet<String> = ["1", "3", "5"].iter().map(|s| s.to_string()).collect();
    assert_eq!(ids, expected);
    assert_eq!(report.rows_published, 3);
}

#[tokio::test]
async fn test_server_errors_retried_within_fetch() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/item/7"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&site)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/item/\d+$"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .mount(&site)
        .await;
    mount_sink_ok(&sink).await;

    let mut config = create_test_config(&site, &sink, &spool, (1, 10), 4);
    config.http.max_retries = 3;
    let report = create_coordinator(config, EchoExtractor::new(false))
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert_eq!(report.count(OutcomeCategory::Record), 10);
    assert_eq!(report.retries_for(7), 2);
    assert_eq!(report.retries.len(), 1);
    assert_eq!(report.count(OutcomeCategory::Permanent), 0);
}

#[tokio::test]
async fn test_publish_retry_after_sink_failure() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&sink)
        .await;
    mount_sink_ok(&sink).await;

    let mut config = create_test_config(&site, &sink, &spool, (1, 100), 5);
    config.sweep.batch_inner = 10;
    config.publisher.batch_publish = 30;
    let report = create_coordinator(config, EchoExtractor::new(false))
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert_eq!(report.count(OutcomeCategory::Record), 100);

    // The failed first POST is retried with the same batch
    let payloads = sink_payloads(&sink).await;
    assert_eq!(payloads.len(), 5);
    assert_eq!(payloads[0], payloads[1]);

    let accepted = &payloads[1..];
    let sizes: Vec<usize> = accepted
        .iter()
        .map(|p| p["rows"].as_array().unwrap().len())
        .collect();
    assert_eq!(sizes, vec![30, 30, 30, 10]);
    let indexes: Vec<u64> = accepted
        .iter()
        .map(|p| p["metadata"]["batch_index"].as_u64().unwrap())
        .collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    assert_eq!(accepted[3]["metadata"]["total_batches_hint"], 4);
    assert!(accepted
        .iter()
        .all(|p| p["metadata"]["extractor"] == "echo"));
    assert!(accepted[0]["metadata"]["total_batches_hint"].is_null());

    let ids: BTreeSet<String> = row_ids(accepted).into_iter().collect();
    assert_eq!(ids.len(), 100);

    assert_eq!(report.batches_published, 4);
    assert_eq!(report.publish_attempts, 5);
    assert!(report.spill_files.is_empty());
    assert_eq!(spool_files(&spool), 0);
}

#[tokio::test]
async fn test_auth_expired_aborts_sweep() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ExpireOnNth {
            seen: AtomicUsize::new(0),
            nth: 12,
        })
        .mount(&site)
        .await;
    mount_sink_ok(&sink).await;

    let mut config = create_test_config(&site, &sink, &spool, (1, 50), 8);
    config.http.min_interval_ms = 20;
    config.sweep.fatal_abort_on_auth_expired = true;
    let report = create_coordinator(config, EchoExtractor::new(false))
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, SweepState::Aborted);
    assert_eq!(report.exit_code(), 1);
    assert!(report.abort_reason.as_deref().unwrap().starts_with("auth_expired"));
    assert_eq!(report.count(OutcomeCategory::Permanent), 1);
    assert!(report.terminal_total() < 50);
    assert!(report.peak_in_flight <= 8);

    // Records extracted before the abort are still published
    assert_eq!(report.rows_published, report.count(OutcomeCategory::Record));

    let requests = site.received_requests().await.unwrap().len();
    assert!(requests < 50, "sweep kept going after abort: {} requests", requests);
}

#[tokio::test]
async fn test_filtered_targets() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .mount(&site)
        .await;
    mount_sink_ok(&sink).await;

    let config = create_test_config(&site, &sink, &spool, (1, 20), 3);
    let report = create_coordinator(config, EchoExtractor::new(true))
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert_eq!(report.count(OutcomeCategory::Record), 10);
    assert_eq!(report.count(OutcomeCategory::Filtered), 10);
    assert!(report.retries.is_empty());
    assert_eq!(site.received_requests().await.unwrap().len(), 20);

    let ids = row_ids(&sink_payloads(&sink).await);
    assert!(ids.iter().all(|id| id.parse::<u64>().unwrap() % 2 == 0));
}

#[tokio::test]
async fn test_more_workers_than_targets() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/item/100"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .expect(1)
        .mount(&site)
        .await;
    mount_sink_ok(&sink).await;

    let config = create_test_config(&site, &sink, &spool, (100, 100), 16);
    let report = create_coordinator(config, EchoExtractor::new(false))
        .run()
        .await
        .unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert_eq!(report.count(OutcomeCategory::Record), 1);
    assert_eq!(report.rows_published, 1);
    assert_eq!(row_ids(&sink_payloads(&sink).await), vec!["100".to_string()]);
}

#[tokio::test]
async fn test_unreachable_sink_spills() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .mount(&site)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&sink)
        .await;

    let mut config = create_test_config(&site, &sink, &spool, (1, 6), 2);
    config.publisher.batch_publish = 4;
    config.publisher.publish_retries = 1;
    let report = create_coordinator(config, EchoExtractor::new(false))
        .run()
        .await
        .unwrap();

    // Publish failures never abort the sweep
    assert_eq!(report.state, SweepState::Done);
    assert_eq!(report.rows_published, 0);
    assert_eq!(report.rows_spilled, 6);
    assert_eq!(report.spill_files.len(), 2);
    assert_eq!(spool_files(&spool), 2);
    assert_eq!(sink_payloads(&sink).await.len(), 4);
}

#[tokio::test]
async fn test_external_cancel_drains() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("member")
                .set_delay(Duration::from_millis(20)),
        )
        .mount(&site)
        .await;
    mount_sink_ok(&sink).await;

    let config = create_test_config(&site, &sink, &spool, (1, 10_000), 4);
    let mut coordinator = create_coordinator(config, EchoExtractor::new(false));
    let control = coordinator.control();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        control.cancel();
    });
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert!(report.abort_reason.is_none());
    assert!(report.terminal_total() < 10_000);
    assert!(report.terminal_total() > 0);
    assert_eq!(report.rows_published, report.count(OutcomeCategory::Record));
}

#[tokio::test]
async fn test_publish_retries_continue_while_draining() {
    let site = MockServer::start().await;
    let sink = MockServer::start().await;
    let spool = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("member"))
        .mount(&site)
        .await;

    let mut config = create_test_config(&site, &sink, &spool, (1, 200), 2);
    config.publisher.batch_publish = 5;
    let mut coordinator = create_coordinator(config, EchoExtractor::new(false));
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(CancelOnFirstPost {
            control: coordinator.control(),
            seen: AtomicUsize::new(0),
        })
        .mount(&sink)
        .await;

    let report = coordinator.run().await.unwrap();

    assert_eq!(report.state, SweepState::Done);
    assert!(report.terminal_total() < 200);

    // The batch that failed after cancellation was retried, not spilled
    let payloads = sink_payloads(&sink).await;
    assert!(payloads.len() >= 2);
    assert_eq!(payloads[0], payloads[1]);
    assert_eq!(report.rows_spilled, 0);
    assert_eq!(spool_files(&spool), 0);
    assert_eq!(report.rows_published, report.count(OutcomeCategory::Record));
    assert_eq!(report.publish_attempts, report.batches_published + 1);
}
