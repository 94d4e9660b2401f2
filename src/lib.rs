/// GitHub API client facade, GraphQL plumbing, and error classification
pub mod github;

/// CSV row sink for the emitted statistics report
pub mod output;

/// Exponential-backoff retry envelope with a success-threshold reset
pub mod retry;

/// Harvest engine, rate-limit governor, and the missing-repo auditor
pub mod services;

/// Durable harvest progress state enabling resume across restarts
pub mod state;

/// Core type definitions and the output row shaper
pub mod types;
