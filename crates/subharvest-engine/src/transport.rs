//! GraphQL transport.
//!
//! [`GraphTransport`] is the outbound seam: execute one query against one
//! endpoint, honouring cancellation, and hand back the decoded response
//! tree plus any rate-limit state the gateway declared in headers.
//! [`HttpTransport`] is the reqwest implementation against a subgraph
//! gateway; tests inject fakes instead.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use subharvest_types::{Endpoint, ExtractError, GraphResponse, RateLimitInfo};

/// Default gateway prefix; the endpoint id is appended as the final path
/// segment.
pub const DEFAULT_GATEWAY_BASE: &str = "https://gateway.thegraph.com/api/subgraphs/id";

/// One decoded reply plus header-derived pacing hints.
#[derive(Debug, Clone)]
pub struct TransportReply {
    pub body: GraphResponse,
    pub rate_limit: Option<RateLimitInfo>,
}

/// Executes GraphQL documents against remote endpoints.
#[async_trait]
pub trait GraphTransport: Send + Sync {
    /// Execute `query` against `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::Transport`] on network or server failure,
    /// [`ExtractError::RateLimited`] on a 429 rejection, and
    /// [`ExtractError::Cancelled`] when `cancel` fires mid-flight.
    async fn execute(
        &self,
        endpoint: &Endpoint,
        query: &str,
        variables: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<TransportReply, ExtractError>;
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Gateway URL prefix the endpoint id is appended to.
    pub gateway_base: String,
    /// Bearer token attached to every request.
    pub auth_token: Option<String>,
    /// Per-request timeout, body included.
    pub request_timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            gateway_base: DEFAULT_GATEWAY_BASE.to_owned(),
            auth_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP+JSON GraphQL client for a subgraph gateway.
pub struct HttpTransport {
    client: reqwest::Client,
    cfg: HttpTransportConfig,
}

#[derive(Serialize)]
struct GraphRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<Value>,
}

impl HttpTransport {
    /// Build a transport with its own connection pool.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(cfg: HttpTransportConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self { client, cfg })
    }

    fn url_for(&self, endpoint: &Endpoint) -> String {
        format!(
            "{}/{}",
            self.cfg.gateway_base.trim_end_matches('/'),
            endpoint.as_str()
        )
    }
}

#[async_trait]
impl GraphTransport for HttpTransport {
    async fn execute(
        &self,
        endpoint: &Endpoint,
        query: &str,
        variables: Option<Value>,
        cancel: &CancellationToken,
    ) -> Result<TransportReply, ExtractError> {
        let url = self.url_for(endpoint);
        let mut request = self
            .client
            .post(&url)
            .json(&GraphRequest { query, variables });
        if let Some(token) = &self.cfg.auth_token {
            request = request.bearer_auth(token);
        }

        tracing::debug!(endpoint = %endpoint, "executing graphql query");
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(ExtractError::Cancelled),
            sent = request.send() => sent.map_err(classify_send_error)?,
        };

        let rate_limit = parse_rate_limit_headers(response.headers());
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ExtractError::RateLimited { retry_after });
        }
        if status.is_server_error() {
            return Err(ExtractError::transient(format!(
                "gateway returned {status} for {endpoint}"
            )));
        }
        if !status.is_success() {
            return Err(ExtractError::permanent(format!(
                "gateway returned {status} for {endpoint}"
            )));
        }

        let body = tokio::select! {
            () = cancel.cancelled() => return Err(ExtractError::Cancelled),
            parsed = response.json::<GraphResponse>() => {
                parsed.map_err(|err| ExtractError::permanent(format!("invalid response body: {err}")))?
            }
        };
        Ok(TransportReply { body, rate_limit })
    }
}

fn classify_send_error(err: reqwest::Error) -> ExtractError {
    // Connection resets, DNS hiccups, and timeouts are all worth retrying.
    ExtractError::transient(err.to_string())
}

fn parse_rate_limit_headers(headers: &HeaderMap) -> Option<RateLimitInfo> {
    let parse_u32 = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u32>().ok())
    };
    let limit = parse_u32("x-ratelimit-limit");
    let remaining = parse_u32("x-ratelimit-remaining");
    let reset_at = headers
        .get("x-ratelimit-reset")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(|epoch| DateTime::from_timestamp(epoch, 0));

    if limit.is_none() && remaining.is_none() && reset_at.is_none() {
        return None;
    }
    Some(RateLimitInfo {
        limit,
        remaining,
        reset_at,
    })
}
