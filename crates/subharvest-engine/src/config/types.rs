//! Configuration schema.
//!
//! Section defaults mirror the engine defaults so a minimal file only
//! needs `endpoints`, `kinds`, and an auth token. Helper methods convert
//! sections into the component configs they feed.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use subharvest_types::{Endpoint, QueryKind};

use crate::extractor::ExtractorConfig;
use crate::kafka::KafkaSinkConfig;
use crate::limiter::LimiterConfig;
use crate::pool::PoolConfig;
use crate::transport::{HttpTransportConfig, DEFAULT_GATEWAY_BASE};

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestConfig {
    /// Subgraph deployment ids to harvest.
    pub endpoints: Vec<String>,
    /// Entity kinds to extract from every endpoint.
    pub kinds: Vec<String>,
    #[serde(default)]
    pub extractor: ExtractorSection,
    #[serde(default)]
    pub gateway: GatewaySection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub sink: SinkSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    /// Extra query templates, merged over the built-ins:
    /// kind -> endpoint (or `default`) -> template.
    #[serde(default)]
    pub queries: HashMap<String, HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorSection {
    pub page_size: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ExtractorSection {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_retries: 3,
            retry_delay_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GATEWAY_BASE.to_owned(),
            auth_token: None,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSection {
    pub initial_rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub burst: u32,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let defaults = LimiterConfig::default();
        Self {
            initial_rate: defaults.initial_rate,
            min_rate: defaults.min_rate,
            max_rate: defaults.max_rate,
            burst: defaults.burst,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub initial_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_size: usize,
    pub idle_timeout_secs: u64,
    pub adjust_period_secs: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        let defaults = PoolConfig::default();
        Self {
            initial_workers: defaults.initial_workers,
            min_workers: defaults.min_workers,
            max_workers: defaults.max_workers,
            queue_size: defaults.queue_size,
            idle_timeout_secs: defaults.idle_timeout.as_secs(),
            adjust_period_secs: defaults.adjust_period.as_secs(),
        }
    }
}

/// Which sink implementation to publish through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    Kafka,
    File,
    Noop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkSection {
    pub kind: SinkKind,
    pub brokers: Vec<String>,
    pub topic_prefix: Option<String>,
    pub producer_name: String,
    /// Directory for the JSONL file sink.
    pub records_dir: String,
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            kind: SinkKind::Kafka,
            brokers: vec!["localhost:9092".to_owned()],
            topic_prefix: Some("thegraph".to_owned()),
            producer_name: "subharvest".to_owned(),
            records_dir: "data/records".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSection {
    /// Root directory of the file cursor store.
    pub dir: String,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            dir: "data".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    /// Seconds between extraction passes.
    pub interval_secs: u64,
    /// Run one pass and exit.
    pub run_once: bool,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            run_once: false,
        }
    }
}

impl HarvestConfig {
    /// Typed endpoint list.
    #[must_use]
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.endpoints.iter().map(Endpoint::new).collect()
    }

    /// Typed kind list.
    #[must_use]
    pub fn kinds(&self) -> Vec<QueryKind> {
        self.kinds.iter().map(QueryKind::new).collect()
    }

    /// Orchestrator configuration.
    #[must_use]
    pub fn extractor_config(&self) -> ExtractorConfig {
        ExtractorConfig {
            endpoints: self.endpoints(),
            kinds: self.kinds(),
            page_size: self.extractor.page_size,
            max_retries: self.extractor.max_retries,
            retry_delay: Duration::from_secs(self.extractor.retry_delay_secs),
        }
    }

    /// Transport configuration.
    #[must_use]
    pub fn transport_config(&self) -> HttpTransportConfig {
        HttpTransportConfig {
            gateway_base: self.gateway.base_url.clone(),
            auth_token: self.gateway.auth_token.clone(),
            request_timeout: Duration::from_secs(self.gateway.request_timeout_secs),
        }
    }

    /// Limiter configuration.
    #[must_use]
    pub fn limiter_config(&self) -> LimiterConfig {
        LimiterConfig {
            initial_rate: self.rate_limit.initial_rate,
            min_rate: self.rate_limit.min_rate,
            max_rate: self.rate_limit.max_rate,
            burst: self.rate_limit.burst,
        }
    }

    /// Pool configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            initial_workers: self.pool.initial_workers,
            min_workers: self.pool.min_workers,
            max_workers: self.pool.max_workers,
            queue_size: self.pool.queue_size,
            idle_timeout: Duration::from_secs(self.pool.idle_timeout_secs),
            adjust_period: Duration::from_secs(self.pool.adjust_period_secs),
            ..PoolConfig::default()
        }
    }

    /// Kafka sink configuration.
    #[must_use]
    pub fn kafka_config(&self) -> KafkaSinkConfig {
        KafkaSinkConfig {
            brokers: self.sink.brokers.clone(),
            topic_prefix: self.sink.topic_prefix.clone(),
            producer_name: self.sink.producer_name.clone(),
            ..KafkaSinkConfig::default()
        }
    }
}
