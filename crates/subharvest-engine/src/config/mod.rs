//! Harvest configuration: YAML schema, parsing, and validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{parse_config, parse_config_str};
pub use types::{
    ExtractorSection, GatewaySection, HarvestConfig, PoolSection, RateLimitSection,
    ScheduleSection, SinkKind, SinkSection, StateSection,
};
pub use validator::validate_config;
