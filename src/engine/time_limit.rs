use std::time::Duration;
use std::time::Instant;

/// A budget on the solve, combining a wall-clock deadline with a
/// deterministic-time counter.
///
/// Deterministic time is a reproducible proxy for CPU time, advanced by the
/// SAT and LP backends in proportion to the work they perform. Its order of
/// magnitude is close to seconds. Every long-running optimizer checks
/// [`TimeLimit::limit_reached`] at least once per inner loop iteration.
#[derive(Debug)]
pub struct TimeLimit {
    start: Instant,
    wall_duration: Option<Duration>,
    deterministic_limit: f64,
    elapsed_deterministic: f64,
}

impl TimeLimit {
    /// A limit that never triggers.
    pub fn infinite() -> Self {
        TimeLimit {
            start: Instant::now(),
            wall_duration: None,
            deterministic_limit: f64::INFINITY,
            elapsed_deterministic: 0.0,
        }
    }

    pub fn from_seconds(seconds: f64) -> Self {
        TimeLimit {
            start: Instant::now(),
            wall_duration: Some(Duration::from_secs_f64(seconds)),
            deterministic_limit: f64::INFINITY,
            elapsed_deterministic: 0.0,
        }
    }

    pub fn with_deterministic_limit(mut self, deterministic_limit: f64) -> Self {
        self.deterministic_limit = deterministic_limit;
        self
    }

    pub fn limit_reached(&self) -> bool {
        if self.elapsed_deterministic >= self.deterministic_limit {
            return true;
        }
        match self.wall_duration {
            Some(duration) => self.start.elapsed() >= duration,
            None => false,
        }
    }

    /// Seconds of wall clock left, or infinity.
    pub fn time_left(&self) -> f64 {
        match self.wall_duration {
            Some(duration) => (duration.saturating_sub(self.start.elapsed())).as_secs_f64(),
            None => f64::INFINITY,
        }
    }

    pub fn deterministic_time_left(&self) -> f64 {
        (self.deterministic_limit - self.elapsed_deterministic).max(0.0)
    }

    pub fn elapsed_deterministic_time(&self) -> f64 {
        self.elapsed_deterministic
    }

    pub fn advance_deterministic_time(&mut self, deterministic_duration: f64) {
        debug_assert!(deterministic_duration >= -1e-9);
        self.elapsed_deterministic += deterministic_duration.max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infinite_limit_is_never_reached() {
        let limit = TimeLimit::infinite();
        assert!(!limit.limit_reached());
        assert_eq!(limit.time_left(), f64::INFINITY);
    }

    #[test]
    fn deterministic_limit_trips_after_enough_advance() {
        let mut limit = TimeLimit::infinite().with_deterministic_limit(1.0);
        limit.advance_deterministic_time(0.5);
        assert!(!limit.limit_reached());
        limit.advance_deterministic_time(0.6);
        assert!(limit.limit_reached());
        assert_eq!(limit.deterministic_time_left(), 0.0);
    }
}
