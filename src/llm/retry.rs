//! Bounded retry for transient provider failures.
//!
//! Only transport and rate-limit errors are retried, with exponential
//! backoff plus jitter. The executor loop never retries — its anti-runaway
//! mechanism is the iteration cap.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::LlmError;

/// Base backoff before the first retry.
const BASE_BACKOFF: Duration = Duration::from_millis(500);

/// Maximum random jitter added to each backoff.
const MAX_JITTER_MS: u64 = 250;

/// Run `op` up to `attempts` times, backing off between transient failures.
pub(crate) async fn with_retry<T, F, Fut>(
    op_name: &str,
    attempts: u32,
    op: F,
) -> Result<T, LlmError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let attempts = attempts.max(1);
    let mut last_err = None;

    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let backoff = BASE_BACKOFF * 2u32.pow(attempt)
                    + Duration::from_millis(rand::thread_rng().gen_range(0..MAX_JITTER_MS));
                tracing::warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient LLM failure, retrying"
                );
                tokio::time::sleep(backoff).await;
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_err.unwrap_or_else(|| LlmError::RequestFailed {
        provider: "unknown".into(),
        reason: format!("{op_name}: retries exhausted"),
    }))
}
