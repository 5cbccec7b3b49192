//! Cliff-and-step release schedule.

/// Numeric part of a vest: nothing until the cliff, `cliff_shares` at the
/// cliff, then `step_shares` more after each full `step_duration`, `steps`
/// times.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StepSchedule {
    pub start_time: u64,
    pub cliff_duration: u64,
    pub step_duration: u64,
    pub steps: u32,
    pub cliff_shares: i128,
    pub step_shares: i128,
}

impl StepSchedule {
    /// `None` when `start_time + cliff_duration` does not fit in a timestamp.
    pub fn cliff_time(&self) -> Option<u64> {
        self.start_time.checked_add(self.cliff_duration)
    }

    /// `cliff_shares + step_shares * steps`, `None` on overflow.
    pub fn total_shares(&self) -> Option<i128> {
        self.step_shares
            .checked_mul(self.steps as i128)?
            .checked_add(self.cliff_shares)
    }

    /// Shares vested at `at`, capped at [`StepSchedule::total_shares`].
    pub fn vested_at(&self, at: u64) -> i128 {
        let cliff_time = match self.cliff_time() {
            Some(cliff_time) => cliff_time,
            None => return 0,
        };
        if at < cliff_time {
            return 0;
        }

        let steps_elapsed = if self.steps == 0 || self.step_duration == 0 {
            0
        } else {
            ((at - cliff_time) / self.step_duration).min(self.steps as u64)
        };

        self.cliff_shares + self.step_shares * steps_elapsed as i128
    }
}
