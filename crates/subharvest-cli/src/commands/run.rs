//! `subharvest run`: extraction passes on an interval until interrupted.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use subharvest_engine::config::{parse_config, validate_config, HarvestConfig, SinkKind};
use subharvest_engine::extractor::Extractor;
use subharvest_engine::kafka::KafkaSink;
use subharvest_engine::limiter::AdaptiveLimiter;
use subharvest_engine::pool::DynamicPool;
use subharvest_engine::queries;
use subharvest_engine::sink::{EventSink, FileSink, NoopSink};
use subharvest_engine::transport::HttpTransport;
use subharvest_state::FileCursorStore;

pub async fn execute(config_path: &Path) -> Result<()> {
    let config = parse_config(config_path)?;
    validate_config(&config)?;

    tracing::info!(
        endpoints = config.endpoints.len(),
        kinds = config.kinds.len(),
        page_size = config.extractor.page_size,
        sink = ?config.sink.kind,
        run_once = config.schedule.run_once,
        "starting subgraph extraction service"
    );

    let transport = Arc::new(
        HttpTransport::new(config.transport_config()).context("failed to build transport")?,
    );
    let sink = build_sink(&config)?;
    let cursors = Arc::new(
        FileCursorStore::open(&config.state.dir).context("failed to open cursor store")?,
    );
    let catalog = Arc::new(queries::catalog_with_overrides(&config.queries));
    let limiter = Arc::new(AdaptiveLimiter::new(config.limiter_config()));
    let pool = Arc::new(DynamicPool::new(config.pool_config()));

    let extractor = Extractor::new(
        transport,
        sink.clone(),
        cursors,
        catalog,
        limiter,
        pool.clone(),
        config.extractor_config(),
    );

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    // First pass immediately, further passes on the configured interval.
    let mut pass = 0_u64;
    loop {
        pass += 1;
        tracing::info!(pass, "starting extraction pass");
        let summary = extractor.run(&cancel).await;
        if summary.is_success() {
            tracing::info!(pass, records = summary.records, "extraction pass succeeded");
        } else {
            tracing::warn!(
                pass,
                failed = summary.failed,
                tasks = summary.tasks,
                "extraction pass completed with errors"
            );
        }

        if config.schedule.run_once || cancel.is_cancelled() {
            break;
        }
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(Duration::from_secs(config.schedule.interval_secs)) => {}
        }
    }

    tracing::info!("shutting down");
    pool.close().await;
    if let Err(err) = sink.close().await {
        tracing::error!(error = %err, "error closing event sink");
    }
    Ok(())
}

fn build_sink(config: &HarvestConfig) -> Result<Arc<dyn EventSink>> {
    Ok(match config.sink.kind {
        SinkKind::Kafka => {
            Arc::new(KafkaSink::new(config.kafka_config()).context("failed to build kafka sink")?)
        }
        SinkKind::File => Arc::new(
            FileSink::open(&config.sink.records_dir).context("failed to open file sink")?,
        ),
        SinkKind::Noop => Arc::new(NoopSink),
    })
}
