//! Kafka event sink.
//!
//! One `FutureProducer` serves every topic; the full topic name is
//! `<prefix>.<endpoint>.<kind>` when a prefix is configured. Each message
//! carries `producer` and `timestamp` headers so consumers can attribute
//! and order deliveries.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tokio_util::sync::CancellationToken;

use crate::sink::{EventSink, SinkError};

/// Configuration for [`KafkaSink`].
#[derive(Debug, Clone)]
pub struct KafkaSinkConfig {
    /// Broker addresses.
    pub brokers: Vec<String>,
    /// Optional prefix prepended to every topic.
    pub topic_prefix: Option<String>,
    /// Value of the `producer` message header.
    pub producer_name: String,
    /// Maximum time to wait for a delivery confirmation.
    pub delivery_timeout: Duration,
}

impl Default for KafkaSinkConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_owned()],
            topic_prefix: None,
            producer_name: "subharvest".to_owned(),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

/// At-least-once Kafka publisher.
pub struct KafkaSink {
    producer: FutureProducer,
    cfg: KafkaSinkConfig,
}

impl KafkaSink {
    /// Connect a producer to the configured brokers.
    ///
    /// # Errors
    ///
    /// Returns an error when the producer cannot be created.
    pub fn new(cfg: KafkaSinkConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set(
                "message.timeout.ms",
                cfg.delivery_timeout.as_millis().to_string(),
            )
            .create()
            .context("failed to create kafka producer")?;
        tracing::info!(brokers = ?cfg.brokers, "kafka producer created");
        Ok(Self { producer, cfg })
    }

    fn full_topic(&self, topic: &str) -> String {
        match &self.cfg.topic_prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}.{topic}"),
            _ => topic.to_owned(),
        }
    }
}

#[async_trait]
impl EventSink for KafkaSink {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        let full_topic = self.full_topic(topic);
        let timestamp = Utc::now().timestamp_millis().to_string();
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "producer",
                value: Some(self.cfg.producer_name.as_bytes()),
            })
            .insert(Header {
                key: "timestamp",
                value: Some(timestamp.as_bytes()),
            });
        let record = FutureRecord::to(&full_topic)
            .key(key)
            .payload(payload)
            .headers(headers);

        let delivery = self.producer.send(record, self.cfg.delivery_timeout);
        let outcome = tokio::select! {
            () = cancel.cancelled() => return Err(SinkError::Cancelled),
            delivered = delivery => delivered,
        };

        match outcome {
            Ok((partition, offset)) => {
                tracing::debug!(
                    topic = full_topic,
                    key,
                    partition,
                    offset,
                    bytes = payload.len(),
                    "published message"
                );
                Ok(())
            }
            Err((err, _message)) => {
                tracing::error!(topic = full_topic, key, error = %err, "kafka delivery failed");
                Err(SinkError::Delivery(err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        self.producer
            .flush(Duration::from_secs(10))
            .map_err(|err| SinkError::Delivery(err.to_string()))
    }
}
