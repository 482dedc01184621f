//! Persistent event sources.
//!
//! A source takes part in every loop iteration through two calls: `setup`
//! runs before the loop blocks and may shorten the wait, `check` runs after
//! the loop wakes and decides whether there is work to do.

use std::time::Duration;

use slotmap::new_key_type;

new_key_type! {
    /// A unique identifier for a registered event source.
    pub struct SourceId;
}

/// The longest time the loop may block in the current iteration.
///
/// Sources can only shorten the bound, never extend it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitBound {
    max: Duration,
}

impl WaitBound {
    /// Start from the caller's requested maximum wait.
    pub fn new(max: Duration) -> Self {
        Self { max }
    }

    /// Bound the wait to at most `wait`.
    pub fn limit(&mut self, wait: Duration) {
        if wait < self.max {
            self.max = wait;
        }
    }

    /// Ask the loop not to block at all.
    pub fn zero(&mut self) {
        self.max = Duration::ZERO;
    }

    /// The resulting bound.
    pub fn get(&self) -> Duration {
        self.max
    }

    /// Whether the loop should skip blocking.
    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }
}

/// A participant registered with the event loop.
///
/// Both calls happen on the loop's thread. Implementations may post events,
/// and may delete themselves or other sources; the loop iterates over a
/// snapshot and skips sources deleted mid-iteration.
pub trait EventSource {
    /// Declare how long the loop may block before calling [`check`](Self::check).
    fn setup(&self, bound: &mut WaitBound);

    /// Called after the loop wakes, whether from the timeout or a wakeup.
    fn check(&self);
}
