//! Extraction orchestrator.
//!
//! [`Extractor::run`] fans one task per (endpoint, query kind) pair into
//! the worker pool. Each task resumes from its persisted cursor, paginates
//! with `id_gt` queries behind the adaptive limiter, publishes every
//! decoded record, and persists the cursor of the last record it managed
//! to emit. Task failures accumulate into the run summary; they never
//! short-circuit sibling tasks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use tokio_util::sync::CancellationToken;

use subharvest_state::CursorStore;
use subharvest_types::{Endpoint, ExtractError, QueryKind, Record};

use crate::catalog::QueryCatalog;
use crate::limiter::AdaptiveLimiter;
use crate::page;
use crate::pool::DynamicPool;
use crate::sink::EventSink;
use crate::transport::{GraphTransport, TransportReply};

/// Configuration for [`Extractor`].
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub endpoints: Vec<Endpoint>,
    pub kinds: Vec<QueryKind>,
    /// Records requested per page.
    pub page_size: usize,
    /// Additional attempts after a failed request.
    pub max_retries: u32,
    /// Sleep between attempts.
    pub retry_delay: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            kinds: Vec::new(),
            page_size: 100,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl ExtractorConfig {
    /// Replace zero fields with defaults.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.page_size == 0 {
            self.page_size = defaults.page_size;
        }
        if self.max_retries == 0 {
            self.max_retries = defaults.max_retries;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = defaults.retry_delay;
        }
        self
    }
}

/// Outcome of one full extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// (endpoint, kind) pairs scheduled.
    pub tasks: usize,
    /// Tasks that ended in error (cancellation is not a failure).
    pub failed: usize,
    /// Records successfully published.
    pub records: u64,
    /// Elements skipped as malformed.
    pub malformed: u64,
    /// Publish attempts that failed (non-fatal for their task).
    pub publish_errors: u64,
}

impl RunSummary {
    /// `true` when every scheduled task completed cleanly.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

#[derive(Debug, Default)]
struct TaskStats {
    records: u64,
    malformed: u64,
    publish_errors: u64,
}

struct TaskContext {
    transport: Arc<dyn GraphTransport>,
    sink: Arc<dyn EventSink>,
    cursors: Arc<dyn CursorStore>,
    catalog: Arc<QueryCatalog>,
    limiter: Arc<AdaptiveLimiter>,
    endpoint: Endpoint,
    kind: QueryKind,
    page_size: usize,
    max_retries: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
}

/// Coordinates one extraction pass across all configured pairs.
pub struct Extractor {
    transport: Arc<dyn GraphTransport>,
    sink: Arc<dyn EventSink>,
    cursors: Arc<dyn CursorStore>,
    catalog: Arc<QueryCatalog>,
    limiter: Arc<AdaptiveLimiter>,
    pool: Arc<DynamicPool>,
    cfg: ExtractorConfig,
}

impl Extractor {
    /// Wire the orchestrator to its collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<dyn GraphTransport>,
        sink: Arc<dyn EventSink>,
        cursors: Arc<dyn CursorStore>,
        catalog: Arc<QueryCatalog>,
        limiter: Arc<AdaptiveLimiter>,
        pool: Arc<DynamicPool>,
        cfg: ExtractorConfig,
    ) -> Self {
        Self {
            transport,
            sink,
            cursors,
            catalog,
            limiter,
            pool,
            cfg: cfg.normalized(),
        }
    }

    /// Run one extraction pass to completion.
    ///
    /// Returns after every scheduled task has finished or the pool drained
    /// following cancellation.
    pub async fn run(&self, cancel: &CancellationToken) -> RunSummary {
        let started = Instant::now();
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let records = Arc::new(AtomicU64::new(0));
        let malformed = Arc::new(AtomicU64::new(0));
        let publish_errors = Arc::new(AtomicU64::new(0));
        let mut tasks = 0_usize;

        for endpoint in &self.cfg.endpoints {
            for kind in &self.cfg.kinds {
                tasks += 1;
                let ctx = TaskContext {
                    transport: self.transport.clone(),
                    sink: self.sink.clone(),
                    cursors: self.cursors.clone(),
                    catalog: self.catalog.clone(),
                    limiter: self.limiter.clone(),
                    endpoint: endpoint.clone(),
                    kind: kind.clone(),
                    page_size: self.cfg.page_size,
                    max_retries: self.cfg.max_retries,
                    retry_delay: self.cfg.retry_delay,
                    cancel: cancel.child_token(),
                };
                let failures = failures.clone();
                let records = records.clone();
                let malformed = malformed.clone();
                let publish_errors = publish_errors.clone();
                let failures_on_submit_err = failures.clone();

                let submitted = self.pool.submit(async move {
                    let endpoint = ctx.endpoint.clone();
                    let kind = ctx.kind.clone();
                    match run_task(&ctx).await {
                        Ok(stats) => {
                            tracing::info!(
                                endpoint = %endpoint,
                                kind = %kind,
                                records = stats.records,
                                malformed = stats.malformed,
                                "extracted and published records"
                            );
                            records.fetch_add(stats.records, Ordering::Relaxed);
                            malformed.fetch_add(stats.malformed, Ordering::Relaxed);
                            publish_errors.fetch_add(stats.publish_errors, Ordering::Relaxed);
                            Ok(())
                        }
                        Err(ExtractError::Cancelled) => {
                            tracing::info!(endpoint = %endpoint, kind = %kind, "task cancelled");
                            Ok(())
                        }
                        Err(err) => {
                            tracing::error!(
                                endpoint = %endpoint,
                                kind = %kind,
                                error = %err,
                                "extraction task failed"
                            );
                            failures
                                .lock()
                                .expect("run failure lock poisoned")
                                .push(format!("{kind} on {endpoint}: {err}"));
                            Err(err.into())
                        }
                    }
                });

                if let Err(err) = submitted {
                    tracing::error!(
                        endpoint = %endpoint,
                        kind = %kind,
                        error = %err,
                        "failed to submit extraction task"
                    );
                    failures_on_submit_err
                        .lock()
                        .expect("run failure lock poisoned")
                        .push(format!("submit {kind} on {endpoint}: {err}"));
                }
            }
        }

        self.pool.wait().await;

        let failed = failures.lock().expect("run failure lock poisoned").len();
        let summary = RunSummary {
            tasks,
            failed,
            records: records.load(Ordering::Relaxed),
            malformed: malformed.load(Ordering::Relaxed),
            publish_errors: publish_errors.load(Ordering::Relaxed),
        };
        if summary.failed > 0 {
            tracing::error!(
                failed = summary.failed,
                tasks = summary.tasks,
                duration_secs = started.elapsed().as_secs_f64(),
                "extraction completed with errors"
            );
        } else {
            tracing::info!(
                tasks = summary.tasks,
                records = summary.records,
                duration_secs = started.elapsed().as_secs_f64(),
                "extraction completed"
            );
        }
        summary
    }
}

async fn run_task(ctx: &TaskContext) -> Result<TaskStats, ExtractError> {
    let start_cursor = match ctx.cursors.get_cursor(&ctx.kind, &ctx.endpoint) {
        Ok(cursor) => cursor.unwrap_or_default(),
        Err(err) => {
            tracing::warn!(
                endpoint = %ctx.endpoint,
                kind = %ctx.kind,
                error = %err,
                "failed to read cursor, starting from the beginning"
            );
            String::new()
        }
    };

    let mut current = start_cursor;
    let mut query = if current.is_empty() {
        QueryCatalog::render(base_template(ctx)?, "", ctx.page_size)
    } else {
        QueryCatalog::render(paginated_template(ctx)?, &current, ctx.page_size)
    };

    let topic = format!("{}.{}", ctx.endpoint, ctx.kind);
    let mut stats = TaskStats::default();
    let mut last_published: Option<String> = None;

    loop {
        if ctx.limiter.acquire(&ctx.cancel).await.is_err() {
            return Err(ExtractError::Cancelled);
        }

        let reply = execute_with_retries(ctx, &query).await?;
        if let Some(rate_limit) = reply.rate_limit {
            ctx.limiter
                .observe(rate_limit.limit, rate_limit.remaining, rate_limit.reset_at);
        }
        if !reply.body.errors.is_empty() {
            tracing::warn!(
                endpoint = %ctx.endpoint,
                kind = %ctx.kind,
                errors = reply.body.errors.len(),
                first = %reply.body.errors[0].message,
                "response carried errors alongside usable data"
            );
        }

        let page = page::decode(&reply.body, &ctx.kind, &ctx.endpoint, ctx.page_size);
        stats.malformed += page.malformed;

        for record in &page.records {
            match publish_record(ctx, &topic, record).await {
                Ok(()) => {
                    stats.records += 1;
                    if record.cursor.is_some() {
                        last_published.clone_from(&record.cursor);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        endpoint = %ctx.endpoint,
                        kind = %ctx.kind,
                        record_id = %record.id,
                        error = %err,
                        "failed to publish record"
                    );
                    stats.publish_errors += 1;
                }
            }
        }

        let next = page.next_cursor.unwrap_or_default();
        if !page.has_more || next == current || next.is_empty() {
            break;
        }
        current = next;
        query = QueryCatalog::render(paginated_template(ctx)?, &current, ctx.page_size);
    }

    if let Some(cursor) = &last_published {
        if let Err(err) = ctx.cursors.set_cursor(&ctx.kind, &ctx.endpoint, cursor) {
            tracing::warn!(
                endpoint = %ctx.endpoint,
                kind = %ctx.kind,
                cursor = %cursor,
                error = %err,
                "failed to persist cursor"
            );
        }
    }
    Ok(stats)
}

fn base_template<'a>(ctx: &'a TaskContext) -> Result<&'a str, ExtractError> {
    ctx.catalog
        .base(&ctx.kind, &ctx.endpoint)
        .ok_or_else(|| ExtractError::QueryNotFound {
            kind: ctx.kind.clone(),
            endpoint: ctx.endpoint.clone(),
        })
}

fn paginated_template<'a>(ctx: &'a TaskContext) -> Result<&'a str, ExtractError> {
    ctx.catalog
        .paginated(&ctx.kind, &ctx.endpoint)
        .ok_or_else(|| ExtractError::QueryNotFound {
            kind: ctx.kind.clone(),
            endpoint: ctx.endpoint.clone(),
        })
}

/// Execute one page request, retrying retryable failures.
///
/// Retries reuse the limiter permit acquired for the page; every attempt
/// is individually reported so pacing still sees each failure. A reply
/// with no `data` tree counts as a failed attempt.
async fn execute_with_retries(
    ctx: &TaskContext,
    query: &str,
) -> Result<TransportReply, ExtractError> {
    let mut attempt: u32 = 0;
    loop {
        if attempt > 0 {
            tracing::warn!(
                endpoint = %ctx.endpoint,
                kind = %ctx.kind,
                retry = attempt,
                "retrying query"
            );
            tokio::select! {
                () = ctx.cancel.cancelled() => return Err(ExtractError::Cancelled),
                () = tokio::time::sleep(ctx.retry_delay) => {}
            }
        }

        let started = Instant::now();
        let outcome = ctx
            .transport
            .execute(&ctx.endpoint, query, None, &ctx.cancel)
            .await
            .and_then(|reply| {
                if reply.body.is_data_absent() {
                    Err(ExtractError::MissingData)
                } else {
                    Ok(reply)
                }
            });

        if matches!(outcome, Err(ExtractError::Cancelled)) {
            return Err(ExtractError::Cancelled);
        }
        ctx.limiter.report(outcome.is_ok(), started.elapsed());

        match outcome {
            Ok(reply) => return Ok(reply),
            Err(err) if err.is_retryable() && attempt < ctx.max_retries => {
                tracing::warn!(
                    endpoint = %ctx.endpoint,
                    kind = %ctx.kind,
                    attempt,
                    latency_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "query attempt failed"
                );
                attempt += 1;
            }
            Err(err) => {
                if let ExtractError::RateLimited { retry_after } = &err {
                    // Header-declared exhaustion flows into pacing rather
                    // than the retry loop.
                    let reset_in = retry_after
                        .and_then(|d| TimeDelta::from_std(d).ok())
                        .unwrap_or_else(|| TimeDelta::seconds(30));
                    ctx.limiter
                        .observe(None, Some(0), Some(Utc::now() + reset_in));
                }
                return Err(err);
            }
        }
    }
}

async fn publish_record(
    ctx: &TaskContext,
    topic: &str,
    record: &Record,
) -> Result<(), ExtractError> {
    let payload = record
        .to_event_bytes()
        .map_err(|err| ExtractError::Publish {
            key: record.id.clone(),
            message: err.to_string(),
        })?;
    ctx.sink
        .publish(topic, &record.id, &payload, &ctx.cancel)
        .await
        .map_err(|err| ExtractError::Publish {
            key: record.id.clone(),
            message: err.to_string(),
        })
}
