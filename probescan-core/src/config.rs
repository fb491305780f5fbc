use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ids::IdentifierRange;

/// Engine knobs for one scan run.
///
/// Every field carries a default so callers can deserialize partial
/// configuration documents and override only what they need.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Number of concurrent producers striping the identifier set.
    pub workers: usize,
    /// Valid identifier window. A present payload outside it stops the scan.
    pub range: IdentifierRange,
    /// Removal order of the handoff buffer.
    pub order: HandoffOrder,
    /// How uneven field sequences are aligned inside one table.
    pub broadcast: BroadcastPolicy,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            workers: 3,
            range: IdentifierRange::default(),
            order: HandoffOrder::default(),
            broadcast: BroadcastPolicy::default(),
        }
    }
}

/// Order in which the consumer removes entries from the handoff buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffOrder {
    /// Most recently produced entry first.
    #[default]
    Lifo,
    /// Oldest entry first.
    Fifo,
}

/// Alignment rule for a field whose non-empty sequence length does not
/// evenly divide the table's row count for an identifier.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastPolicy {
    /// Row `i` takes element `i % len`; always yields the full row count.
    #[default]
    Cycle,
    /// Repeat `max / len` whole times, then cut every column to the
    /// shortest aligned length. Can yield fewer rows than the longest field.
    Truncate,
    /// Refuse to write the identifier's rows.
    Strict,
}

/// Retry behaviour for transient probe failures.
///
/// The default retries forever without waiting between attempts.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts allowed; `None` means unbounded.
    pub max_attempts: Option<u32>,
    /// First backoff delay. Zero disables backoff entirely.
    pub backoff_base_ms: u64,
    /// Upper bound for the exponential backoff delay.
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            backoff_base_ms: 0,
            backoff_max_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Whether another attempt may follow `attempts` failed ones.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_base_ms == 0 {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(20);
        let delay = self
            .backoff_base_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms);
        Duration::from_millis(delay)
    }
}
