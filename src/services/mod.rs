/// Missing-repo audit: diff the live listing against an emitted report
pub mod audit;

/// The harvest engine driving the organization walk
pub mod harvest;

/// Quota probing and the pause/continue decision
pub mod rate_limit;
