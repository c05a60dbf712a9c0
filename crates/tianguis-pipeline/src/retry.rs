//! Capped-exponential-backoff retry, composed around store and search calls.
//!
//! An explicit policy value rather than a wrapping decorator, so the backoff
//! schedule is testable in isolation and every suspension point in the
//! pipeline shares one retry budget shape.

use std::time::Duration;

use tianguis_core::store::Transient;

use crate::config::PipelineConfig;

/// Retry budget: a fixed number of attempts with exponentially growing,
/// capped delays between them.
///
/// Only errors reporting [`Transient::is_transient`] are retried; anything
/// else fails fast on the first attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
  pub max_attempts: usize,
  pub base_delay:   Duration,
  pub max_delay:    Duration,
}

impl RetryPolicy {
  pub fn from_config(config: &PipelineConfig) -> Self {
    Self {
      max_attempts: config.max_retries,
      base_delay:   config.retry_base_delay,
      max_delay:    config.retry_max_delay,
    }
  }

  /// Delay before retrying after the given zero-based failed attempt.
  fn backoff(&self, attempt: usize) -> Duration {
    let exp = self.base_delay.saturating_mul(1u32 << attempt.min(31));
    exp.min(self.max_delay)
  }

  /// Run `op`, retrying transient failures up to the attempt budget.
  /// Returns the first success, the first non-transient error, or the last
  /// transient error once the budget is exhausted.
  pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
  where
    E: Transient + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
  {
    let mut attempt = 0;
    loop {
      match op().await {
        Ok(value) => return Ok(value),
        Err(err) if err.is_transient() && attempt + 1 < self.max_attempts => {
          let delay = self.backoff(attempt);
          tracing::warn!(
            attempt = attempt + 1,
            max = self.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "transient failure, retrying"
          );
          tokio::time::sleep(delay).await;
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}
