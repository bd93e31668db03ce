//! Cooperative bounded wait.
//!
//! Driven once per tick. A timeout is advisory: the caller logs it, calls
//! [`SubStateWait::reset_timeout`] and keeps waiting.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a single poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoll {
    Pending,
    Ready,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitSettings {
    /// How often the condition is checked
    pub poll_interval: Duration,
    /// Time without success before a warning is raised
    pub timeout: Duration,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubStateWait {
    settings: WaitSettings,
    since_check: Duration,
    waited: Duration,
    timeouts: u32,
}

impl SubStateWait {
    pub fn new(settings: WaitSettings) -> Self {
        Self {
            settings,
            since_check: Duration::ZERO,
            waited: Duration::ZERO,
            timeouts: 0,
        }
    }

    /// Advance by `dt`; evaluates `check` only on interval boundaries
    pub fn poll(&mut self, dt: Duration, check: impl FnOnce() -> bool) -> WaitPoll {
        self.since_check += dt;
        self.waited += dt;

        if self.since_check >= self.settings.poll_interval {
            self.since_check = Duration::ZERO;
            if check() {
                return WaitPoll::Ready;
            }
        }

        if self.waited >= self.settings.timeout {
            WaitPoll::TimedOut
        } else {
            WaitPoll::Pending
        }
    }

    /// Restart the timeout window after a timeout was reported
    pub fn reset_timeout(&mut self) {
        self.waited = Duration::ZERO;
        self.timeouts += 1;
    }

    /// Time spent in the current timeout window
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// How many timeout windows have elapsed so far
    pub fn timeouts(&self) -> u32 {
        self.timeouts
    }
}
