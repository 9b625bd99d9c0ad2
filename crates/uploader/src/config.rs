//! Upload tuning knobs.

use std::time::Duration;

use filedrop_protocol::FileKind;
use filedrop_protocol::constants::DEFAULT_CALL_TIMEOUT;
use filedrop_transfer::{
    DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_THRESHOLD, DEFAULT_HASH_WINDOW, DEFAULT_MAX_FILE_SIZE,
    PlanConfig, UploadLimits,
};
use rand::Rng;

use crate::error::UploadError;

/// Default number of chunks in flight at once.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 3;

/// Default retries per chunk after the first attempt.
pub const DEFAULT_MAX_CHUNK_RETRIES: u8 = 3;

/// Default retries of the merge call after the first attempt.
pub const DEFAULT_MAX_MERGE_RETRIES: u32 = 2;

/// Largest accepted concurrency limit.
pub const MAX_CONCURRENCY_LIMIT: usize = 16;

/// Backoff between attempts of the same remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
    /// Relative jitter applied to every delay, `0.0..=1.0`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Calculates the delay after a given failed attempt (1-based),
    /// with jitter to keep concurrent chunks from retrying in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * self.jitter.clamp(0.0, 1.0);
        let offset = if jitter > 0.0 {
            rand::thread_rng().gen_range(-1.0..=1.0)
        } else {
            0.0
        };
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }

    /// A policy without any delay, for tests and local backends.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_factor: 1.0,
            jitter: 0.0,
        }
    }
}

/// Configuration of a single upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadConfig {
    /// Largest accepted file, in bytes.
    pub max_file_size: u64,
    /// Files at or below this size go out in one request.
    pub chunk_threshold: u64,
    /// Size of every chunk but the last.
    pub chunk_size: u64,
    /// Bytes read per hashing step.
    pub hash_window: u64,
    /// Chunks in flight at once.
    pub concurrency_limit: usize,
    /// Retries per chunk after the first attempt.
    pub max_chunk_retries: u8,
    /// Retries of the merge call after the first attempt.
    pub max_merge_retries: u32,
    /// Backoff between attempts.
    pub retry: RetryPolicy,
    /// Deadline for each remote call.
    pub call_timeout: Duration,
    /// Ask the server which chunks it holds before merging.
    pub reconcile_before_merge: bool,
    /// Kinds accepted for upload.
    pub allowed_kinds: Vec<FileKind>,
    /// Capacity of the progress event channel.
    pub progress_buffer: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            hash_window: DEFAULT_HASH_WINDOW,
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            max_chunk_retries: DEFAULT_MAX_CHUNK_RETRIES,
            max_merge_retries: DEFAULT_MAX_MERGE_RETRIES,
            retry: RetryPolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            reconcile_before_merge: true,
            allowed_kinds: FileKind::ALL.to_vec(),
            progress_buffer: 256,
        }
    }
}

impl UploadConfig {
    /// Checks that the configuration can drive an upload.
    pub fn validate(&self) -> Result<(), UploadError> {
        if self.chunk_size == 0 {
            return Err(UploadError::Config("chunk_size must be non-zero".into()));
        }
        if self.concurrency_limit == 0 || self.concurrency_limit > MAX_CONCURRENCY_LIMIT {
            return Err(UploadError::Config(format!(
                "concurrency_limit must be between 1 and {MAX_CONCURRENCY_LIMIT}"
            )));
        }
        if self.max_file_size.div_ceil(self.chunk_size) > u64::from(u32::MAX) {
            return Err(UploadError::Config(
                "chunk_size too small for max_file_size".into(),
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(UploadError::Config("call_timeout must be non-zero".into()));
        }
        if self.allowed_kinds.is_empty() {
            return Err(UploadError::Config("allowed_kinds must not be empty".into()));
        }
        if self.progress_buffer == 0 {
            return Err(UploadError::Config("progress_buffer must be non-zero".into()));
        }
        Ok(())
    }

    /// Planner inputs derived from this configuration.
    pub fn plan_config(&self) -> PlanConfig {
        PlanConfig {
            chunk_threshold: self.chunk_threshold,
            chunk_size: self.chunk_size,
        }
    }

    /// Validation limits derived from this configuration.
    pub fn limits(&self) -> UploadLimits {
        UploadLimits {
            max_file_size: self.max_file_size,
            allowed_kinds: self.allowed_kinds.clone(),
        }
    }
}
