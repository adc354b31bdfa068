use tokio::time::Instant;

/// Exponential smoothing factor for scroll velocity.
const SMOOTHING: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Forward,
    Backward,
}

/// One smoothed velocity reading, produced per scroll sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocitySample {
    /// Smoothed speed in px/ms (always non-negative).
    pub velocity: f64,
    pub direction: ScrollDirection,
}

/// Pure scroll-velocity estimator.
///
/// Feeds on `(position, time)` samples and keeps an exponentially smoothed
/// speed: `v = a * v_prev + (1 - a) * |dp| / dt` with `a = 0.85`. Direction
/// follows the sign of the last non-zero position delta.
#[derive(Debug, Clone)]
pub struct VelocityTracker {
    smoothed: f64,
    direction: ScrollDirection,
    last_sample: Option<(f64, Instant)>,
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl VelocityTracker {
    pub fn new() -> Self {
        Self {
            smoothed: 0.0,
            direction: ScrollDirection::Forward,
            last_sample: None,
        }
    }

    /// Record one scroll sample and return the updated smoothed state.
    ///
    /// A zero time delta leaves the smoothed velocity untouched.
    pub fn sample(&mut self, position: f64, at: Instant) -> VelocitySample {
        if let Some((prev_position, prev_at)) = self.last_sample {
            let delta = position - prev_position;
            if delta > 0.0 {
                self.direction = ScrollDirection::Forward;
            } else if delta < 0.0 {
                self.direction = ScrollDirection::Backward;
            }

            let dt_ms = at.saturating_duration_since(prev_at).as_secs_f64() * 1000.0;
            if dt_ms > 0.0 {
                let instantaneous = delta.abs() / dt_ms;
                self.smoothed = SMOOTHING * self.smoothed + (1.0 - SMOOTHING) * instantaneous;
            }
        }
        self.last_sample = Some((position, at));

        VelocitySample {
            velocity: self.smoothed,
            direction: self.direction,
        }
    }

    /// Move the tracking origin without generating velocity.
    ///
    /// Used after programmatic jumps so the next user scroll does not read
    /// as one huge instantaneous movement.
    pub fn rebase(&mut self, position: f64, at: Instant) {
        self.last_sample = Some((position, at));
    }

    pub fn velocity(&self) -> f64 {
        self.smoothed
    }

    pub fn direction(&self) -> ScrollDirection {
        self.direction
    }

    pub fn last_sample_at(&self) -> Option<Instant> {
        self.last_sample.map(|(_, at)| at)
    }

    pub fn reset(&mut self) {
        self.smoothed = 0.0;
        self.direction = ScrollDirection::Forward;
        self.last_sample = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn instants(step_ms: u64, count: usize) -> Vec<Instant> {
        let start = Instant::now();
        (0..count)
            .map(|i| start + Duration::from_millis(step_ms * i as u64))
            .collect()
    }

    #[tokio::test]
    async fn test_first_sample_produces_zero_velocity() {
        let mut tracker = VelocityTracker::new();
        let sample = tracker.sample(100.0, Instant::now());
        assert_eq!(sample.velocity, 0.0);
        assert_eq!(sample.direction, ScrollDirection::Forward);
    }

    #[tokio::test]
    async fn test_constant_motion_converges_to_instantaneous() {
        let mut tracker = VelocityTracker::new();
        let times = instants(10, 50);

        // 20 px every 10 ms = 2 px/ms.
        let mut last = VelocitySample {
            velocity: 0.0,
            direction: ScrollDirection::Forward,
        };
        for (i, at) in times.iter().enumerate() {
            last = tracker.sample(i as f64 * 20.0, *at);
        }
        assert!(
            (last.velocity - 2.0).abs() < 0.01,
            "expected ~2.0 px/ms, got {}",
            last.velocity
        );
        assert_eq!(last.direction, ScrollDirection::Forward);
    }

    #[tokio::test]
    async fn test_backward_motion_flips_direction() {
        let mut tracker = VelocityTracker::new();
        let times = instants(10, 3);
        tracker.sample(500.0, times[0]);
        let sample = tracker.sample(400.0, times[1]);
        assert_eq!(sample.direction, ScrollDirection::Backward);
        assert!(sample.velocity > 0.0, "speed stays non-negative");
    }

    #[tokio::test]
    async fn test_zero_time_delta_is_guarded() {
        let mut tracker = VelocityTracker::new();
        let now = Instant::now();
        tracker.sample(0.0, now);
        let sample = tracker.sample(1000.0, now);
        assert_eq!(sample.velocity, 0.0);
    }

    #[tokio::test]
    async fn test_unchanged_position_keeps_direction() {
        let mut tracker = VelocityTracker::new();
        let times = instants(10, 3);
        tracker.sample(100.0, times[0]);
        tracker.sample(50.0, times[1]);
        let sample = tracker.sample(50.0, times[2]);
        assert_eq!(sample.direction, ScrollDirection::Backward);
    }

    #[tokio::test]
    async fn test_rebase_suppresses_jump_velocity() {
        let mut tracker = VelocityTracker::new();
        let times = instants(10, 3);
        tracker.sample(0.0, times[0]);
        tracker.rebase(5000.0, times[1]);
        let sample = tracker.sample(5010.0, times[2]);
        assert!(
            sample.velocity < 1.0,
            "jump must not register as velocity, got {}",
            sample.velocity
        );
    }

    #[tokio::test]
    async fn test_reset() {
        let mut tracker = VelocityTracker::new();
        let times = instants(10, 2);
        tracker.sample(0.0, times[0]);
        tracker.sample(100.0, times[1]);
        assert!(tracker.velocity() > 0.0);

        tracker.reset();
        assert_eq!(tracker.velocity(), 0.0);
        assert!(tracker.last_sample_at().is_none());
    }
}
