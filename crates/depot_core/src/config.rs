use std::time::Duration;

use serde::Deserialize;

/// Limits and tuning for upload sessions.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest `chunk_size` a session may declare, in bytes.
    pub max_chunk_size: u64,
    pub max_total_chunks: u32,
    /// Size of each piece yielded when streaming a blob back out.
    pub download_buffer_size: usize,
    /// Post-finalize staging cleanup.
    pub cleanup: RetryConfig,
    /// Marking a session completed once its blob has been committed.
    pub completion: RetryConfig,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 64 * 1024 * 1024,
            max_total_chunks: 100_000,
            download_buffer_size: 64 * 1024,
            cleanup: RetryConfig {
                attempts: 3,
                backoff_ms: 500,
            },
            completion: RetryConfig {
                attempts: 5,
                backoff_ms: 200,
            },
        }
    }
}

/// Retry policy with linear backoff.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    /// Delay before retry `n` is `n * backoff_ms`.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(attempt as u64))
    }
}
