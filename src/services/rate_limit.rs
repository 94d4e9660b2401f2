//! Rate-limit probing and the cooperative pause decision
//!
//! The engine asks the governor every N rows whether to keep walking. A
//! pause directive is turned into an error by the engine so the retry
//! envelope sleeps it off and resumes from durable state.

use anyhow::Result;
use tracing::{debug, warn};

use crate::github::error::ApiRetryableError;
use crate::github::GitHubClient;

/// Quantity reported when the host has rate limiting disabled.
pub const RATE_LIMIT_DISABLED_SENTINEL: u64 = 10_000_000_000;

/// Error-classified probes tolerated before the run is declared unrecoverable.
const DEFAULT_PAUSE_CAP: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeSeverity {
    Info,
    Warning,
    Error,
}

/// Result of one quota probe.
#[derive(Debug, Clone)]
pub struct RateLimitProbe {
    pub graphql_remaining: u64,
    pub rest_remaining: u64,
    pub message: String,
    pub severity: ProbeSeverity,
}

impl RateLimitProbe {
    /// Probe result for a host that has rate limiting switched off.
    pub fn disabled() -> Self {
        Self {
            graphql_remaining: RATE_LIMIT_DISABLED_SENTINEL,
            rest_remaining: RATE_LIMIT_DISABLED_SENTINEL,
            message: "rate limiting is disabled on this host".to_string(),
            severity: ProbeSeverity::Info,
        }
    }

    /// Probe result for a probe that itself failed.
    pub fn failed(message: String) -> Self {
        Self {
            graphql_remaining: 0,
            rest_remaining: 0,
            message,
            severity: ProbeSeverity::Error,
        }
    }
}

pub trait RateLimitProber {
    #[allow(async_fn_in_trait)]
    async fn probe_rate_limits(&self) -> RateLimitProbe;
}

impl RateLimitProber for GitHubClient {
    async fn probe_rate_limits(&self) -> RateLimitProbe {
        match self.client.ratelimit().get().await {
            Ok(limits) => {
                let rest_remaining = limits.resources.core.remaining as u64;
                let graphql_remaining = limits
                    .resources
                    .graphql
                    .as_ref()
                    .map(|rate| rate.remaining as u64)
                    .unwrap_or(RATE_LIMIT_DISABLED_SENTINEL);
                let severity = if graphql_remaining == 0 || rest_remaining == 0 {
                    ProbeSeverity::Warning
                } else {
                    ProbeSeverity::Info
                };
                RateLimitProbe {
                    graphql_remaining,
                    rest_remaining,
                    message: format!(
                        "{} GraphQL points and {} REST calls remaining",
                        graphql_remaining, rest_remaining
                    ),
                    severity,
                }
            }
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                RateLimitProbe::disabled()
            }
            Err(error) => RateLimitProbe::failed(format!("rate limit probe failed: {}", error)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDirective {
    Continue,
    Pause,
}

/// Turns probe results into continue/pause decisions and upgrades a
/// persistently failing probe to a fatal error.
#[derive(Debug)]
pub struct RateLimitGovernor {
    pause_count: u32,
    pause_cap: u32,
}

impl Default for RateLimitGovernor {
    fn default() -> Self {
        Self {
            pause_count: 0,
            pause_cap: DEFAULT_PAUSE_CAP,
        }
    }
}

impl RateLimitGovernor {
    pub fn new(pause_cap: u32) -> Self {
        Self {
            pause_count: 0,
            pause_cap,
        }
    }

    pub fn assess(&mut self, probe: &RateLimitProbe) -> Result<RateLimitDirective> {
        match probe.severity {
            ProbeSeverity::Error => {
                self.pause_count += 1;
                if self.pause_count > self.pause_cap {
                    return Err(anyhow::Error::new(ApiRetryableError::NonRetryable(
                        format!(
                            "rate limit probe kept failing after {} pauses: {}",
                            self.pause_count, probe.message
                        ),
                    )));
                }
                warn!("{} (pause {}/{})", probe.message, self.pause_count, self.pause_cap);
                Ok(RateLimitDirective::Pause)
            }
            _ if probe.graphql_remaining == 0 || probe.rest_remaining == 0 => {
                self.pause_count += 1;
                warn!("API quota exhausted: {}", probe.message);
                Ok(RateLimitDirective::Pause)
            }
            _ => {
                debug!("Rate limit check: {}", probe.message);
                Ok(RateLimitDirective::Continue)
            }
        }
    }
}
