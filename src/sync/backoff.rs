use std::time::Duration;

/// Exponential backoff between drain retries.
#[derive(Debug, Clone)]
pub struct Backoff {
  initial: Duration,
  max: Duration,
  multiplier: f64,
  attempt: u32,
}

impl Backoff {
  pub fn new(initial: Duration, max: Duration) -> Self {
    Self {
      initial,
      max,
      multiplier: 2.0,
      attempt: 0,
    }
  }

  /// Delay before the next retry; grows with every call until `reset`.
  pub fn next_delay(&mut self) -> Duration {
    let base = self.initial.as_millis() as f64 * self.multiplier.powi(self.attempt as i32);
    let capped = base.min(self.max.as_millis() as f64);
    self.attempt = self.attempt.saturating_add(1);
    Duration::from_millis(capped as u64)
  }

  pub fn reset(&mut self) {
    self.attempt = 0;
  }

  pub fn attempt(&self) -> u32 {
    self.attempt
  }
}

impl Default for Backoff {
  fn default() -> Self {
    Self::new(Duration::from_secs(1), Duration::from_secs(60))
  }
}
