//! Cooperative frame pacing.
//!
//! [`FrameClock`] hands out one [`FrameInfo`] per tick. With a target rate it
//! sleeps until the next frame budget boundary; without one it returns
//! immediately.

use std::time::{Duration, Instant};

use crate::timer::Timer;

/// Timing information for one frame tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameInfo {
    /// Zero-based tick number.
    pub index: u64,
    /// Time since the previous tick.
    pub delta: Duration,
    /// Time since the clock was created.
    pub elapsed: Duration,
}

impl FrameInfo {
    /// Delta time in seconds.
    #[inline]
    pub fn delta_secs(&self) -> f32 {
        self.delta.as_secs_f32()
    }
}

/// Produces [`FrameInfo`] values, optionally paced to a target frame rate.
#[derive(Debug)]
pub struct FrameClock {
    timer: Timer,
    budget: Option<Duration>,
    next_deadline: Option<Instant>,
    index: u64,
}

impl FrameClock {
    /// Creates a clock. `target_fps` of `None` (or zero) disables pacing.
    pub fn new(target_fps: Option<u32>) -> Self {
        let budget = target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps)));
        Self {
            timer: Timer::new(),
            budget,
            next_deadline: None,
            index: 0,
        }
    }

    /// The per-frame budget, if pacing is enabled.
    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    /// Number of ticks handed out so far.
    pub fn frame_count(&self) -> u64 {
        self.index
    }

    /// Waits for the next frame boundary and returns its timing.
    pub fn next_tick(&mut self) -> FrameInfo {
        if let (Some(budget), Some(deadline)) = (self.budget, self.next_deadline) {
            let now = Instant::now();
            if deadline > now {
                std::thread::sleep(deadline - now);
            }
            // Re-anchor when we fell more than a frame behind to avoid a burst.
            let after = Instant::now();
            self.next_deadline = Some(if after > deadline + budget {
                after + budget
            } else {
                deadline + budget
            });
        } else if let Some(budget) = self.budget {
            self.next_deadline = Some(Instant::now() + budget);
        }

        let info = FrameInfo {
            index: self.index,
            delta: self.timer.tick(),
            elapsed: self.timer.elapsed(),
        };
        self.index += 1;
        info
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_are_sequential() {
        let mut clock = FrameClock::new(None);
        let ticks: Vec<u64> = (0..4).map(|_| clock.next_tick().index).collect();
        assert_eq!(ticks, vec![0, 1, 2, 3]);
        assert_eq!(clock.frame_count(), 4);
    }

    #[test]
    fn test_zero_fps_disables_pacing() {
        assert!(FrameClock::new(Some(0)).budget().is_none());
        assert!(FrameClock::new(None).budget().is_none());
    }

    #[test]
    fn test_budget_from_fps() {
        let clock = FrameClock::new(Some(50));
        assert_eq!(clock.budget(), Some(Duration::from_millis(20)));
    }

    #[test]
    fn test_paced_ticks_respect_budget() {
        let mut clock = FrameClock::new(Some(200));
        let start = Instant::now();
        clock.next_tick();
        clock.next_tick();
        clock.next_tick();
        // Two full budgets must have passed between the first and third tick.
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_elapsed_is_monotonic() {
        let mut clock = FrameClock::new(None);
        let a = clock.next_tick();
        let b = clock.next_tick();
        assert!(b.elapsed >= a.elapsed);
    }
}
