//! Pipeline policies
//!
//! The durability/latency tradeoffs of the consumer are explicit values
//! rather than incidental library behavior.

use serde::{Deserialize, Serialize};

/// When a fetched message is acknowledged to the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// Acknowledge as soon as the batch is fetched (auto-commit).
    /// A crash or a drop-on-abort shutdown loses fetched, unpersisted metrics.
    #[default]
    OnFetch,
    /// Acknowledge each message after it has been committed to storage.
    /// Unpersisted messages are redelivered to the consumer group.
    OnPersist,
}

/// What happens to buffered metrics when termination is requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Persist everything already fetched before stopping
    #[default]
    Drain,
    /// Discard everything not yet handed to a worker
    DropOnAbort,
}

impl ShutdownPolicy {
    /// Map the `drop_on_abort` switch to a policy
    pub fn from_drop_on_abort(drop_on_abort: bool) -> Self {
        if drop_on_abort {
            Self::DropOnAbort
        } else {
            Self::Drain
        }
    }

    pub fn drops_on_abort(self) -> bool {
        matches!(self, Self::DropOnAbort)
    }
}

/// Where a consumer group without a committed offset starts reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

/// Dispatcher lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchState {
    #[default]
    Running,
    ShuttingDown,
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_on_abort_mapping() {
        assert_eq!(ShutdownPolicy::from_drop_on_abort(false), ShutdownPolicy::Drain);
        assert!(ShutdownPolicy::from_drop_on_abort(true).drops_on_abort());
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: AckPolicy = serde_json::from_str("\"on_persist\"").unwrap();
        assert_eq!(policy, AckPolicy::OnPersist);
        let reset: OffsetReset = serde_json::from_str("\"latest\"").unwrap();
        assert_eq!(reset, OffsetReset::Latest);
    }
}
