//! Configuration validation.
//!
//! Configuration errors are fatal at startup: a run that cannot reach its
//! gateway or has nothing to extract should fail before any task is
//! scheduled.

use anyhow::{bail, Result};

use crate::config::types::{HarvestConfig, SinkKind};
use crate::transport::DEFAULT_GATEWAY_BASE;

/// Check a parsed configuration for fatal mistakes.
///
/// # Errors
///
/// Returns a descriptive error for the first problem found.
pub fn validate_config(config: &HarvestConfig) -> Result<()> {
    if config.endpoints.is_empty() {
        bail!("no endpoints configured");
    }
    if config.kinds.is_empty() {
        bail!("no query kinds configured");
    }
    if config.endpoints.iter().any(String::is_empty) {
        bail!("endpoints must not be empty strings");
    }
    if config.kinds.iter().any(String::is_empty) {
        bail!("query kinds must not be empty strings");
    }

    let uses_hosted_gateway = config.gateway.base_url == DEFAULT_GATEWAY_BASE;
    let token_missing = config
        .gateway
        .auth_token
        .as_deref()
        .map_or(true, str::is_empty);
    if uses_hosted_gateway && token_missing {
        bail!("gateway.auth_token is required for the hosted gateway");
    }

    if config.rate_limit.min_rate > config.rate_limit.max_rate {
        bail!(
            "rate_limit.min_rate ({}) exceeds max_rate ({})",
            config.rate_limit.min_rate,
            config.rate_limit.max_rate
        );
    }
    if config.pool.min_workers > config.pool.max_workers {
        bail!(
            "pool.min_workers ({}) exceeds max_workers ({})",
            config.pool.min_workers,
            config.pool.max_workers
        );
    }

    if config.sink.kind == SinkKind::Kafka && config.sink.brokers.is_empty() {
        bail!("sink.brokers must not be empty for the kafka sink");
    }

    if !config.schedule.run_once && config.schedule.interval_secs == 0 {
        bail!("schedule.interval_secs must be positive unless run_once is set");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_config_str;

    fn valid_yaml() -> &'static str {
        r"
endpoints: [E1]
kinds: [tokens]
gateway:
  base_url: http://localhost:8000/subgraphs
sink:
  kind: noop
"
    }

    #[test]
    fn valid_config_passes() {
        let config = parse_config_str(valid_yaml()).unwrap();
        validate_config(&config).unwrap();
    }

    #[test]
    fn empty_endpoints_rejected() {
        let config = parse_config_str("endpoints: []\nkinds: [tokens]").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("no endpoints"));
    }

    #[test]
    fn empty_kinds_rejected() {
        let config = parse_config_str("endpoints: [E1]\nkinds: []").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("no query kinds"));
    }

    #[test]
    fn hosted_gateway_requires_token() {
        let config = parse_config_str("endpoints: [E1]\nkinds: [tokens]").unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("auth_token"));
    }

    #[test]
    fn custom_gateway_does_not_require_token() {
        let config = parse_config_str(valid_yaml()).unwrap();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn inverted_rate_bounds_rejected() {
        let yaml = format!("{}rate_limit:\n  min_rate: 9.0\n  max_rate: 2.0\n", valid_yaml());
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("min_rate"));
    }

    #[test]
    fn inverted_worker_bounds_rejected() {
        let yaml = format!("{}pool:\n  min_workers: 9\n  max_workers: 2\n", valid_yaml());
        let config = parse_config_str(&yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("min_workers"));
    }

    #[test]
    fn kafka_sink_requires_brokers() {
        let yaml = r"
endpoints: [E1]
kinds: [tokens]
gateway:
  base_url: http://localhost:8000/subgraphs
sink:
  kind: kafka
  brokers: []
";
        let config = parse_config_str(yaml).unwrap();
        let err = validate_config(&config).unwrap_err().to_string();
        assert!(err.contains("brokers"));
    }

    #[test]
    fn zero_interval_requires_run_once() {
        let yaml = format!("{}schedule:\n  interval_secs: 0\n", valid_yaml());
        let config = parse_config_str(&yaml).unwrap();
        assert!(validate_config(&config).is_err());

        let yaml = format!(
            "{}schedule:\n  interval_secs: 0\n  run_once: true\n",
            valid_yaml()
        );
        let config = parse_config_str(&yaml).unwrap();
        assert!(validate_config(&config).is_ok());
    }
}
