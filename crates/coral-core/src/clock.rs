//! Wall or simulated clock

use parking_lot::RwLock;

use crate::pose::Time;

/// Clock used to judge transform freshness
///
/// Starts on wall time and switches to simulated time for good as soon as
/// the first clock message is received.
#[derive(Debug, Default)]
pub struct Clock {
    sim_time: RwLock<Option<Time>>,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Time {
        match *self.sim_time.read() {
            Some(t) => t,
            None => wall_now(),
        }
    }

    /// Record a simulated clock message; returns true when this switched the clock
    pub fn set_sim_time(&self, t: Time) -> bool {
        self.sim_time.write().replace(t).is_none()
    }

    pub fn uses_sim_time(&self) -> bool {
        self.sim_time.read().is_some()
    }
}

fn wall_now() -> Time {
    Time(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switches_to_sim_time_once() {
        let clock = Clock::new();
        assert!(!clock.uses_sim_time());
        assert!(clock.now() > Time::from_secs_f64(1.0e9));

        assert!(clock.set_sim_time(Time::from_secs_f64(12.0)));
        assert!(!clock.set_sim_time(Time::from_secs_f64(13.0)));
        assert_eq!(clock.now(), Time::from_secs_f64(13.0));
    }
}
