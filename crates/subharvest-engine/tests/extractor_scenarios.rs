//! End-to-end extraction scenarios against scripted fakes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use subharvest_engine::catalog::QueryCatalog;
use subharvest_engine::extractor::{Extractor, ExtractorConfig};
use subharvest_engine::limiter::{AdaptiveLimiter, LimiterConfig};
use subharvest_engine::pool::{DynamicPool, PoolConfig};
use subharvest_engine::sink::{EventSink, SinkError};
use subharvest_engine::transport::{GraphTransport, TransportReply};
use subharvest_state::{CursorStore, MemoryCursorStore};
use subharvest_types::{Endpoint, ExtractError, GraphResponse, QueryKind};

/// Serves a scripted sequence of outcomes, one per request.
struct ScriptedTransport {
    script: Mutex<Vec<Result<Value, ExtractError>>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    fn new(script: Vec<Result<Value, ExtractError>>) -> Self {
        Self {
            script: Mutex::new(script),
            calls: AtomicU32::new(0),
        }
    }

    fn pages(pages: Vec<Value>) -> Self {
        Self::new(pages.into_iter().map(Ok).collect())
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GraphTransport for ScriptedTransport {
    async fn execute(
        &self,
        _endpoint: &Endpoint,
        _query: &str,
        _variables: Option<Value>,
        _cancel: &CancellationToken,
    ) -> Result<TransportReply, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        match next {
            Some(Ok(body)) => Ok(TransportReply {
                body: serde_json::from_value::<GraphResponse>(body).unwrap(),
                rate_limit: None,
            }),
            Some(Err(err)) => Err(err),
            None => Err(ExtractError::permanent("script exhausted")),
        }
    }
}

/// Replays the same reply for every request.
struct RepeatingTransport {
    body: Value,
    calls: AtomicU32,
}

impl RepeatingTransport {
    fn new(body: Value) -> Self {
        Self {
            body,
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl GraphTransport for RepeatingTransport {
    async fn execute(
        &self,
        _endpoint: &Endpoint,
        _query: &str,
        _variables: Option<Value>,
        _cancel: &CancellationToken,
    ) -> Result<TransportReply, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(TransportReply {
            body: serde_json::from_value(self.body.clone()).unwrap(),
            rate_limit: None,
        })
    }
}

/// Captures every published (topic, key) pair.
#[derive(Default)]
struct CapturingSink {
    published: Mutex<Vec<(String, String)>>,
    fail_keys: Mutex<Vec<String>>,
}

impl CapturingSink {
    fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }

    fn keys(&self) -> Vec<String> {
        self.published()
            .into_iter()
            .map(|(_, key)| key)
            .collect()
    }

    fn fail_key(self, key: &str) -> Self {
        self.fail_keys.lock().unwrap().push(key.to_owned());
        self
    }
}

#[async_trait]
impl EventSink for CapturingSink {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        _payload: &[u8],
        _cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if self.fail_keys.lock().unwrap().iter().any(|k| k == key) {
            return Err(SinkError::Delivery("broker unavailable".to_owned()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_owned(), key.to_owned()));
        Ok(())
    }

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

fn test_catalog() -> QueryCatalog {
    let mut catalog = QueryCatalog::new();
    catalog.register_default("tokens", "{ tokens(first: {FIRST}{CURSOR}) { id } }");
    catalog
}

struct Harness {
    extractor: Extractor,
    pool: Arc<DynamicPool>,
    sink: Arc<CapturingSink>,
    store: Arc<MemoryCursorStore>,
}

fn harness(
    transport: Arc<dyn GraphTransport>,
    sink: CapturingSink,
    store: MemoryCursorStore,
    page_size: usize,
) -> Harness {
    let sink = Arc::new(sink);
    let store = Arc::new(store);
    let limiter = Arc::new(AdaptiveLimiter::new(LimiterConfig {
        initial_rate: 500.0,
        min_rate: 100.0,
        max_rate: 1000.0,
        burst: 100,
    }));
    let pool = Arc::new(DynamicPool::new(PoolConfig {
        initial_workers: 2,
        min_workers: 1,
        max_workers: 4,
        queue_size: 16,
        adjust_period: Duration::from_secs(60),
        ..PoolConfig::default()
    }));
    let extractor = Extractor::new(
        transport,
        sink.clone(),
        store.clone(),
        Arc::new(test_catalog()),
        limiter,
        pool.clone(),
        ExtractorConfig {
            endpoints: vec![Endpoint::new("E1")],
            kinds: vec![QueryKind::new("tokens")],
            page_size,
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
        },
    );
    Harness {
        extractor,
        pool,
        sink,
        store,
    }
}

fn stored_cursor(store: &MemoryCursorStore) -> Option<String> {
    store
        .get_cursor(&QueryKind::new("tokens"), &Endpoint::new("E1"))
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_paginates_to_completion() {
    let transport = Arc::new(ScriptedTransport::pages(vec![
        json!({"data": {"tokens": [{"id": "a"}, {"id": "b"}]}}),
        json!({"data": {"tokens": [{"id": "c"}, {"id": "d"}]}}),
        json!({"data": {"tokens": [{"id": "e"}]}}),
    ]));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 2);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success());
    assert_eq!(summary.records, 5);
    assert_eq!(transport.calls(), 3);
    assert_eq!(h.sink.keys(), vec!["a", "b", "c", "d", "e"]);
    for (topic, _) in h.sink.published() {
        assert_eq!(topic, "E1.tokens");
    }
    assert_eq!(stored_cursor(&h.store).as_deref(), Some("e"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resume_from_persisted_cursor() {
    let store = MemoryCursorStore::new();
    store
        .set_cursor(&QueryKind::new("tokens"), &Endpoint::new("E1"), "c")
        .unwrap();
    let transport = Arc::new(ScriptedTransport::pages(vec![
        json!({"data": {"tokens": [{"id": "d"}, {"id": "e"}]}}),
    ]));
    let h = harness(transport.clone(), CapturingSink::default(), store, 100);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success());
    assert_eq!(transport.calls(), 1);
    assert_eq!(h.sink.keys(), vec!["d", "e"]);
    assert_eq!(stored_cursor(&h.store).as_deref(), Some("e"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_failures_then_success() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Err(ExtractError::transient("connection reset")),
        Err(ExtractError::transient("gateway returned 502")),
        Ok(json!({"data": {"tokens": [{"id": "a"}]}})),
    ]));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 2);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success());
    assert_eq!(transport.calls(), 3);
    assert_eq!(h.sink.keys(), vec!["a"]);
    assert_eq!(stored_cursor(&h.store).as_deref(), Some("a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retries_exhausted_fails_task_without_cursor_advance() {
    let transport = Arc::new(ScriptedTransport::new(vec![
        Err(ExtractError::transient("boom")),
        Err(ExtractError::transient("boom")),
        Err(ExtractError::transient("boom")),
        Err(ExtractError::transient("boom")),
    ]));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 2);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(transport.calls(), 4, "initial attempt plus three retries");
    assert!(h.sink.keys().is_empty());
    assert!(stored_cursor(&h.store).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_query_fails_fast() {
    let transport = Arc::new(ScriptedTransport::pages(vec![]));
    let sink = Arc::new(CapturingSink::default());
    let limiter = Arc::new(AdaptiveLimiter::new(LimiterConfig::default()));
    let pool = Arc::new(DynamicPool::new(PoolConfig::default()));
    let extractor = Extractor::new(
        transport.clone(),
        sink,
        Arc::new(MemoryCursorStore::new()),
        Arc::new(QueryCatalog::new()),
        limiter,
        pool.clone(),
        ExtractorConfig {
            endpoints: vec![Endpoint::new("E1")],
            kinds: vec![QueryKind::new("vaults")],
            ..ExtractorConfig::default()
        },
    );

    let summary = extractor.run(&CancellationToken::new()).await;
    pool.close().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(transport.calls(), 0, "no request without a template");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn short_page_means_single_round_trip() {
    let transport = Arc::new(RepeatingTransport::new(
        json!({"data": {"tokens": [{"id": "a"}]}}),
    ));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 2);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.sink.keys(), vec!["a"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stuck_cursor_terminates_after_second_page() {
    // hasNextPage stays true and the server keeps returning the same id;
    // the next == current guard must break the loop.
    let transport = Arc::new(RepeatingTransport::new(json!({
        "data": {
            "tokens": [{"id": "a"}],
            "pageInfo": {"hasNextPage": true, "endCursor": "a"}
        }
    })));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 1);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_page_ends_stream_without_publishes() {
    let transport = Arc::new(ScriptedTransport::pages(vec![
        json!({"data": {"tokens": []}}),
    ]));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 2);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success());
    assert_eq!(transport.calls(), 1);
    assert!(h.sink.keys().is_empty());
    assert!(stored_cursor(&h.store).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn publish_failure_is_non_fatal_and_skips_cursor() {
    let transport = Arc::new(ScriptedTransport::pages(vec![
        json!({"data": {"tokens": [{"id": "a"}, {"id": "b"}]}}),
    ]));
    let sink = CapturingSink::default().fail_key("b");
    let h = harness(transport.clone(), sink, MemoryCursorStore::new(), 100);

    let summary = h.extractor.run(&CancellationToken::new()).await;
    h.pool.close().await;

    assert!(summary.is_success(), "publish errors do not fail the task");
    assert_eq!(summary.publish_errors, 1);
    assert_eq!(h.sink.keys(), vec!["a"]);
    // Only the last *successfully emitted* id is persisted.
    assert_eq!(stored_cursor(&h.store).as_deref(), Some("a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_before_run_is_not_a_failure() {
    let transport = Arc::new(RepeatingTransport::new(
        json!({"data": {"tokens": [{"id": "a"}]}}),
    ));
    let h = harness(transport.clone(), CapturingSink::default(), MemoryCursorStore::new(), 2);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let summary = h.extractor.run(&cancel).await;
    h.pool.close().await;

    assert_eq!(summary.failed, 0);
    assert!(h.sink.keys().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn rate_limit_rejection_fails_task_and_floors_rate() {
    let transport = Arc::new(ScriptedTransport::new(vec![Err(
        ExtractError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        },
    )]));

    let sink = Arc::new(CapturingSink::default());
    let store = Arc::new(MemoryCursorStore::new());
    let limiter = Arc::new(AdaptiveLimiter::new(LimiterConfig {
        initial_rate: 40.0,
        min_rate: 2.0,
        max_rate: 50.0,
        burst: 50,
    }));
    let pool = Arc::new(DynamicPool::new(PoolConfig {
        initial_workers: 1,
        min_workers: 1,
        max_workers: 2,
        queue_size: 4,
        adjust_period: Duration::from_secs(60),
        ..PoolConfig::default()
    }));
    let extractor = Extractor::new(
        transport.clone(),
        sink,
        store,
        Arc::new(test_catalog()),
        limiter.clone(),
        pool.clone(),
        ExtractorConfig {
            endpoints: vec![Endpoint::new("E1")],
            kinds: vec![QueryKind::new("tokens")],
            page_size: 2,
            max_retries: 3,
            retry_delay: Duration::from_millis(10),
        },
    );

    let summary = extractor.run(&CancellationToken::new()).await;
    pool.close().await;

    assert_eq!(summary.failed, 1);
    assert_eq!(transport.calls(), 1, "rate-limit rejections are not retried");
    assert!((limiter.current_rate() - 2.0).abs() < f64::EPSILON);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pool_scales_up_under_pressure_and_reaps_when_idle() {
    let pool = DynamicPool::new(PoolConfig {
        initial_workers: 2,
        min_workers: 2,
        max_workers: 8,
        queue_size: 64,
        idle_timeout: Duration::from_millis(80),
        adjust_period: Duration::from_millis(20),
        shutdown_grace: Duration::from_secs(1),
    });

    for _ in 0..40 {
        pool.submit(async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        })
        .unwrap();
    }

    // Give the autoscaler a few ticks under queue pressure.
    let mut max_seen = 0;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        max_seen = max_seen.max(pool.metrics().workers);
    }
    assert_eq!(max_seen, 8, "queue pressure should reach max workers");

    pool.wait().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(pool.metrics().workers, 2, "idle workers reaped to min");
    pool.close().await;
}
