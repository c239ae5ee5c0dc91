use std::time::Duration;

use mirascout_common::PacingConfig;
use rand::Rng;
use tracing::debug;

/// Randomized delay taken before every network request of a run.
#[derive(Debug, Clone, Copy)]
pub struct Pacer {
    config: PacingConfig,
}

impl Pacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }

    /// Draw a delay uniformly from `[min, max]` at millisecond resolution.
    pub fn next_delay(&self) -> Duration {
        let min = self.config.min.as_millis() as u64;
        let max = self.config.max.as_millis() as u64;
        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    pub async fn pace(&self) {
        let delay = self.next_delay();
        if delay.is_zero() {
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, "Pacing before request");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_stays_within_bounds() {
        let pacer = Pacer::new(PacingConfig {
            min: Duration::from_millis(200),
            max: Duration::from_millis(450),
        });
        for _ in 0..200 {
            let d = pacer.next_delay();
            assert!(d >= Duration::from_millis(200) && d <= Duration::from_millis(450));
        }
    }

    #[test]
    fn degenerate_interval_is_fixed() {
        let fixed = Duration::from_millis(300);
        let pacer = Pacer::new(PacingConfig {
            min: fixed,
            max: fixed,
        });
        assert_eq!(pacer.next_delay(), fixed);
        assert_eq!(Pacer::new(PacingConfig::NONE).next_delay(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_pacing_returns_immediately() {
        Pacer::new(PacingConfig::NONE).pace().await;
    }
}
