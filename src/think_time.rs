use rand::Rng;
use std::time::Duration;

/// Pause between a virtual user's successive iterations.
///
/// Think time is not part of request latency; it only spaces iterations out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThinkTime {
    /// Always the same delay
    Fixed(Duration),

    /// Uniformly random delay between min and max, inclusive
    Random { min: Duration, max: Duration },
}

impl ThinkTime {
    /// Calculate the delay to apply after the current iteration.
    pub fn calculate_delay(&self) -> Duration {
        match self {
            ThinkTime::Fixed(duration) => *duration,
            ThinkTime::Random { min, max } => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;

                if min_ms >= max_ms {
                    return *min;
                }

                let random_ms = rand::thread_rng().gen_range(min_ms..=max_ms);
                Duration::from_millis(random_ms)
            }
        }
    }
}

impl Default for ThinkTime {
    fn default() -> Self {
        ThinkTime::Fixed(Duration::from_secs(1))
    }
}
