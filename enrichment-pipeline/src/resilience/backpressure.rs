use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Sliding-window events-per-second meter. When the observed rate exceeds
/// the ceiling, the dispatcher sleeps proportionally to the overshoot,
/// capped at five seconds.
pub struct RateMeter {
    window: Mutex<VecDeque<Instant>>,
    window_size: Duration,
    max_rate: f64,
}

const MAX_DELAY: Duration = Duration::from_secs(5);

impl RateMeter {
    pub fn new(max_rate: f64, window_size: Duration) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            window_size,
            max_rate,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Instant>> {
        self.window
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn record(&self) {
        let now = Instant::now();
        let mut window = self.lock();
        window.push_back(now);
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window_size {
                window.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn rate(&self) -> f64 {
        let now = Instant::now();
        let mut window = self.lock();
        while let Some(front) = window.front() {
            if now.duration_since(*front) > self.window_size {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len() as f64 / self.window_size.as_secs_f64().max(f64::EPSILON)
    }

    /// `min(5s, ((rate - max) / max) * 5s)` when over the ceiling.
    pub fn required_delay(&self) -> Option<Duration> {
        let rate = self.rate();
        if rate <= self.max_rate {
            return None;
        }
        let overshoot = (rate - self.max_rate) / self.max_rate;
        let delay = Duration::from_secs_f64((overshoot * 5.0).min(MAX_DELAY.as_secs_f64()));
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_ceiling_needs_no_delay() {
        let meter = RateMeter::new(100.0, Duration::from_secs(1));
        for _ in 0..10 {
            meter.record();
        }
        assert!(meter.required_delay().is_none());
    }

    #[test]
    fn overshoot_scales_delay_and_caps_at_five_seconds() {
        let meter = RateMeter::new(10.0, Duration::from_secs(1));
        for _ in 0..20 {
            meter.record();
        }
        // Roughly double the ceiling: expect about one second of delay.
        let delay = meter.required_delay().expect("over ceiling");
        assert!(delay <= MAX_DELAY);
        assert!(delay >= Duration::from_millis(500));

        for _ in 0..10_000 {
            meter.record();
        }
        assert_eq!(meter.required_delay().expect("far over"), MAX_DELAY);
    }
}
