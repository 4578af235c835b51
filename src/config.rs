//! Runtime configuration: a plain struct with a hand-rolled `Default`,
//! constructed programmatically by embedders. Loading this from a file or
//! environment is out of scope.

/// Tunables for the agent runtime, flow engine, and subscription stream.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Events kept per agent before the oldest are evicted.
    pub max_buffer_size: u32,
    /// A subscriber not touched within this window is swept as expired.
    pub heartbeat_timeout_secs: u64,
    /// Poll interval while a subscriber has recently seen new events.
    pub poll_interval_fast_ms: u64,
    /// Poll interval after backing off.
    pub poll_interval_slow_ms: u64,
    /// Consecutive empty polls before backing off to the slow interval.
    pub poll_backoff_after_empty_polls: u32,
    /// Upper bound on a single LLM call.
    pub llm_call_timeout_secs: u64,
    /// Upper bound on a single sandbox call.
    pub sandbox_call_timeout_secs: u64,
    /// Maximum gap→search→score→reflect rounds in the search sub-flow.
    pub search_max_iterations: u32,
    /// Maximum tool-call round trips inside one execution step.
    pub max_tool_iterations: u32,
    /// How often the background subscriber sweeper wakes up.
    pub subscriber_sweep_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            max_buffer_size: 100,
            heartbeat_timeout_secs: 300,
            poll_interval_fast_ms: 1000,
            poll_interval_slow_ms: 5000,
            poll_backoff_after_empty_polls: 5,
            llm_call_timeout_secs: 600,
            sandbox_call_timeout_secs: 10,
            search_max_iterations: 3,
            max_tool_iterations: 5,
            subscriber_sweep_interval_secs: 60,
        }
    }
}
