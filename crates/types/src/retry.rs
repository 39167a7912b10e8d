//! Retry policy declarations shared by actions and data sources.

use serde::{Deserialize, Serialize};

/// Backoff curve applied between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    /// `delay * 2^i`
    #[default]
    Exponential,
    /// `delay * (i + 1)`
    Linear,
    /// Exponential plus a random offset in `[0, delay)`.
    Jitter,
}

/// `{attempts, delay, strategy}` as written in schema documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySpec {
    /// Total number of attempts, including the first one.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    /// Base delay in milliseconds.
    #[serde(default)]
    pub delay: u64,
    #[serde(default)]
    pub strategy: RetryStrategy,
}

fn default_attempts() -> u32 {
    1
}

impl Default for RetrySpec {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay: 0,
            strategy: RetryStrategy::default(),
        }
    }
}

impl RetrySpec {
    pub fn new(attempts: u32, delay: u64, strategy: RetryStrategy) -> Self {
        Self { attempts, delay, strategy }
    }

    /// A single attempt with no waiting.
    pub fn once() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_to_single_exponential_attempt() {
        let spec: RetrySpec = serde_json::from_value(json!({})).unwrap();
        assert_eq!(spec, RetrySpec::once());
    }

    #[test]
    fn parses_strategy_names() {
        let spec: RetrySpec = serde_json::from_value(json!({ "attempts": 2, "delay": 50, "strategy": "linear" })).unwrap();
        assert_eq!(spec, RetrySpec::new(2, 50, RetryStrategy::Linear));
        let jitter: RetrySpec = serde_json::from_value(json!({ "strategy": "jitter" })).unwrap();
        assert_eq!(jitter.strategy, RetryStrategy::Jitter);
    }
}
