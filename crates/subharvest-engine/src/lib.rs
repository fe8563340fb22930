//! Adaptive extraction engine for GraphQL subgraph gateways.
//!
//! Three interlocking pieces carry a run:
//!
//! - [`limiter::AdaptiveLimiter`] paces outbound requests with a token
//!   bucket whose rate is continuously re-estimated from success and
//!   latency signals (plus server-declared limits);
//! - [`pool::DynamicPool`] absorbs extraction tasks into a bounded queue
//!   served by an autoscaling set of workers;
//! - [`extractor::Extractor`] fans out one task per (endpoint, query kind)
//!   pair, drives `id_gt` cursor pagination, retries transient failures,
//!   and publishes every decoded record to an event sink.
//!
//! External collaborators (transport, sink, cursor store, query catalog)
//! are injected behind traits so every scenario is testable with fakes.

pub mod catalog;
pub mod config;
pub mod extractor;
pub mod kafka;
pub mod limiter;
pub mod page;
pub mod pool;
pub mod queries;
pub mod sink;
pub mod transport;

pub use catalog::QueryCatalog;
pub use extractor::{Extractor, ExtractorConfig, RunSummary};
pub use limiter::{AdaptiveLimiter, LimiterConfig};
pub use pool::{DynamicPool, PoolConfig};
