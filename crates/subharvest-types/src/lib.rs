//! Shared model types for the subharvest extraction engine.
//!
//! Pure data types used across the state, engine, and CLI crates: identifier
//! newtypes, the [`Record`](record::Record) event model, the decoded GraphQL
//! response tree, and the [`ExtractError`](error::ExtractError) taxonomy.

pub mod error;
pub mod ids;
pub mod record;
pub mod response;

pub use error::ExtractError;
pub use ids::{Endpoint, QueryKind};
pub use record::Record;
pub use response::{GraphError, GraphResponse, PageInfo, RateLimitInfo};
