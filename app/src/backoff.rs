use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            max_attempts: None,
        }
    }
}

/// Exponential reconnect delay, doubled per consecutive failure and capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt, or `None` once the attempts are used up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if matches!(self.config.max_attempts, Some(max) if self.attempt >= max) {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.config.initial.saturating_mul(factor).min(self.config.max);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay)
    }

    /// Called once the broker accepts a connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

#[test]
fn doubles_up_to_cap() {
    let mut backoff = Backoff::new(BackoffConfig::default());
    let delays: Vec<_> = std::iter::from_fn(|| backoff.next_delay())
        .take(9)
        .map(|delay| delay.as_secs())
        .collect();
    assert_eq!(delays, [1, 2, 4, 8, 16, 32, 60, 60, 60]);

    for _ in 0..100 {
        assert_eq!(backoff.next_delay(), Some(Duration::from_secs(60)));
    }
}

#[test]
fn gives_up_and_resets() {
    let mut backoff = Backoff::new(BackoffConfig {
        max_attempts: Some(2),
        ..BackoffConfig::default()
    });
    assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
    assert_eq!(backoff.next_delay(), Some(Duration::from_secs(2)));
    assert_eq!(backoff.next_delay(), None);

    backoff.reset();
    assert_eq!(backoff.attempt(), 0);
    assert_eq!(backoff.next_delay(), Some(Duration::from_secs(1)));
}
