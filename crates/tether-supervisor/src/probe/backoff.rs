use std::time::Duration;

/// Linearly growing delay between startup probes: `step * attempt`, capped at `max`.
#[derive(Clone, Debug)]
pub struct LinearBackoff {
    step: Duration,
    max: Duration,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self {
            step,
            max,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        self.step.saturating_mul(self.attempt).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_linear_growth_then_cap() {
        let mut backoff = LinearBackoff::new(Duration::from_millis(250), Duration::from_millis(1500));
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![250, 500, 750, 1000, 1250, 1500, 1500, 1500]);
        assert_eq!(backoff.attempts(), 8);
    }

    #[test]
    fn test_reset() {
        let mut backoff = LinearBackoff::new(Duration::from_millis(100), Duration::from_secs(1));
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_max(step in 1u64..1000, max in 1u64..5000, n in 1usize..50) {
            let mut backoff = LinearBackoff::new(Duration::from_millis(step), Duration::from_millis(max));
            let mut previous = Duration::ZERO;
            for _ in 0..n {
                let delay = backoff.next_delay();
                prop_assert!(delay <= Duration::from_millis(max));
                prop_assert!(delay >= previous);
                previous = delay;
            }
        }
    }
}
