//! Real-time pacing for the 50 Hz PAL frame loop.

use std::time::{Duration, Instant};

/// Sleep granularity below which the pacer spins instead of sleeping.
const COARSE_SLEEP_MARGIN: Duration = Duration::from_millis(2);

/// If the loop falls further behind than this, the schedule anchor is
/// reset rather than trying to catch up with a burst of fast frames.
const MAX_SLIP: Duration = Duration::from_millis(100);

/// Paces a loop to a fixed period with a hybrid coarse-sleep/spin wait.
pub struct FramePacer {
    period: Duration,
    deadline: Instant,
}

impl FramePacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            deadline: Instant::now() + period,
        }
    }

    /// PAL pacing: one frame every 1/50 s.
    pub fn pal() -> Self {
        Self::new(Duration::from_nanos(1_000_000_000 / 50))
    }

    /// Block until the next frame deadline, then advance it.
    pub fn wait(&mut self) {
        let now = Instant::now();
        if now > self.deadline + MAX_SLIP {
            // Hopelessly behind (debugger stop, machine suspend): restart
            // the schedule from here.
            self.deadline = now + self.period;
            return;
        }

        while let Some(remaining) = self.deadline.checked_duration_since(Instant::now()) {
            if remaining > COARSE_SLEEP_MARGIN {
                std::thread::sleep(remaining - COARSE_SLEEP_MARGIN);
            } else if remaining > Duration::ZERO {
                std::hint::spin_loop();
            } else {
                break;
            }
        }
        self.deadline += self.period;
    }

    /// Forget the schedule, e.g. after a pause or while max-speed is on.
    pub fn rearm(&mut self) {
        self.deadline = Instant::now() + self.period;
    }
}
