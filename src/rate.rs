//! The pacing gate shared by the workers of one pool.
use tokio_util::sync::CancellationToken;

cfg_if::cfg_if! {
    if #[cfg(feature = "rate_limit")] {
        use std::time::Duration;
        use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
        use nonzero_ext::nonzero;
    }
}

use crate::error::BuildError;

/// Bounds the aggregate issue rate of a pool to `qps` requests per second.
///
/// Cells are released one every `1/qps` seconds with a burst of one, so idle
/// time is never banked. A rate of zero makes the gate a no-op.
pub struct Pacer {
    #[cfg(feature = "rate_limit")]
    limiter: Option<DefaultDirectRateLimiter>,
}

impl Pacer {
    /// Creates a gate for `qps` requests per second, `0.0` meaning unlimited.
    pub fn new(qps: f64) -> Result<Self, BuildError> {
        if !qps.is_finite() || qps < 0.0 {
            return Err(BuildError::InvalidRate { qps });
        }
        if qps == 0.0 {
            return Ok(Self::unlimited());
        }

        cfg_if::cfg_if! {
            if #[cfg(feature = "rate_limit")] {
                let period = Duration::try_from_secs_f64(qps.recip()).map_err(|_| BuildError::InvalidRate { qps })?;
                let quota = Quota::with_period(period)
                    .ok_or(BuildError::InvalidRate { qps })?
                    .allow_burst(nonzero!(1u32));
                Ok(Self { limiter: Some(RateLimiter::direct(quota)) })
            } else {
                Err(BuildError::RateLimitDisabled)
            }
        }
    }

    /// A gate that never waits.
    pub fn unlimited() -> Self {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rate_limit")] {
                Self { limiter: None }
            } else {
                Self {}
            }
        }
    }

    /// Whether the gate ever waits.
    pub fn is_limited(&self) -> bool {
        cfg_if::cfg_if! {
            if #[cfg(feature = "rate_limit")] {
                self.limiter.is_some()
            } else {
                false
            }
        }
    }

    /// Waits for the next cell.
    ///
    /// Returns `false` without waiting further once `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        #[cfg(feature = "rate_limit")]
        if let Some(limiter) = &self.limiter {
            return tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = limiter.until_ready() => true,
            };
        }
        !cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unusable_rates() {
        for qps in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert!(matches!(Pacer::new(qps), Err(BuildError::InvalidRate { .. })), "{qps}");
        }
        assert!(!Pacer::new(0.0).unwrap().is_limited());
    }

    #[tokio::test]
    async fn unlimited_gate_never_waits() {
        let pacer = Pacer::unlimited();
        let cancel = CancellationToken::new();
        for _ in 0..1000 {
            assert!(pacer.acquire(&cancel).await);
        }
        cancel.cancel();
        assert!(!pacer.acquire(&cancel).await);
    }

    #[cfg(feature = "rate_limit")]
    #[tokio::test]
    async fn limited_gate_spaces_cells() {
        let pacer = Pacer::new(20.0).unwrap();
        assert!(pacer.is_limited());
        let cancel = CancellationToken::new();
        let start = std::time::Instant::now();
        for _ in 0..5 {
            assert!(pacer.acquire(&cancel).await);
        }
        // first cell is immediate, the next four are 50ms apart
        assert!(start.elapsed() >= Duration::from_millis(190), "{:?}", start.elapsed());
    }

    #[cfg(feature = "rate_limit")]
    #[tokio::test]
    async fn cancel_releases_a_waiting_worker() {
        let pacer = std::sync::Arc::new(Pacer::new(0.1).unwrap());
        let cancel = CancellationToken::new();
        assert!(pacer.acquire(&cancel).await);

        let waiter = tokio::spawn({
            let pacer = pacer.clone();
            let cancel = cancel.clone();
            async move { pacer.acquire(&cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let acquired = tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert!(!acquired);
    }
}
