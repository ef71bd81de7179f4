//! Tunables for directors, pump loops, and request/reply.
//!
//! Every struct deserializes with missing keys filled from `Default`, so
//! a host can load them from whatever format it likes. Durations are in
//! milliseconds.

use std::time::Duration;

use serde::Deserialize;

/// Per-tree director settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    /// Structural hashes remembered per director for duplicate suppression.
    /// Oldest entries are evicted first. `0` disables deduplication.
    pub history_capacity: usize,
    /// A parent not pumped for this long is pumped by its child.
    pub stale_parent_after_ms: u64,
    /// Widest range an `AddInterestRange` may expand to.
    pub max_range_span: u64,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 4096,
            stale_parent_after_ms: 100,
            max_range_span: 65_536,
        }
    }
}

impl DirectorConfig {
    pub fn stale_parent_after(&self) -> Duration {
        Duration::from_millis(self.stale_parent_after_ms)
    }
}

/// Settings for [`spawn_pump_loop`](crate::spawn_pump_loop).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Time between pumps.
    pub interval_ms: u64,
    /// Warn when one pump takes more than this fraction of the interval.
    pub budget_warn_threshold: f64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self::host()
    }
}

impl PumpConfig {
    /// Processes that host services or the state server: 1 ms.
    pub fn host() -> Self {
        Self {
            interval_ms: 1,
            budget_warn_threshold: 0.8,
        }
    }

    /// Detached clients that only need to keep up: 50 ms.
    pub fn detached() -> Self {
        Self {
            interval_ms: 50,
            ..Self::host()
        }
    }

    /// Clamps values that would make the loop spin or never warn.
    pub fn validated(mut self) -> Self {
        if self.interval_ms == 0 {
            tracing::warn!("pump interval of 0 ms; using 1 ms");
            self.interval_ms = 1;
        }
        self.budget_warn_threshold = self.budget_warn_threshold.clamp(0.0, 1.0);
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Timeout and retry policy of one request/reply exchange.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Wait per attempt.
    pub timeout_ms: u64,
    /// Extra attempts after the first one times out.
    pub retries: u32,
    /// How often the router is pumped while waiting.
    pub pump_interval_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self::bus()
    }
}

impl RequestConfig {
    /// Bus round-trips between cluster processes.
    pub fn bus() -> Self {
        Self {
            timeout_ms: 200,
            retries: 3,
            pump_interval_ms: 1,
        }
    }

    /// RPCs a client waits on.
    pub fn client_rpc() -> Self {
        Self {
            timeout_ms: 2_000,
            retries: 1,
            pump_interval_ms: 1,
        }
    }

    /// Service discovery: one long attempt.
    pub fn discovery() -> Self {
        Self {
            timeout_ms: 5_000,
            retries: 0,
            pump_interval_ms: 1,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms.max(1))
    }

    /// Total attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}
