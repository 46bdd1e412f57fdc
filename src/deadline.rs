//! Uniform timeout wrapper for every blocking external call.
//!
//! Search, metadata fetch, voice-ready and player-ready waits all go through
//! [`with_timeout`] so that nothing can park a guild indefinitely. There is no
//! separate cancel API: a caller that gives up simply lets the deadline fire.

use std::{future::Future, time::Duration};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("{what} no respondió en {limit:?}")]
pub struct TimedOut {
    pub what: &'static str,
    pub limit: Duration,
}

/// Ejecuta `fut` con un límite de tiempo
pub async fn with_timeout<F>(limit: Duration, what: &'static str, fut: F) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(output) => Ok(output),
        Err(_) => {
            warn!("⏰ Timeout en {} tras {:?}", what, limit);
            Err(TimedOut { what, limit })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_completes_before_deadline() {
        let value = with_timeout(Duration::from_secs(1), "fast", async { 7 }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_deadline() {
        let result = with_timeout(Duration::from_secs(5), "slow", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
        .await;

        assert_eq!(
            result,
            Err(TimedOut {
                what: "slow",
                limit: Duration::from_secs(5)
            })
        );
    }
}
