//! The event loop capability.

use std::rc::Rc;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::event::{Event, QueuePosition};
use crate::source::{EventSource, SourceId};

/// A cooperative, single-threaded event loop.
///
/// This is the interface the networking crate depends on. [`Notifier`] is
/// the implementation shipped with this crate; hosts with their own loop
/// can implement the trait instead.
///
/// [`Notifier`]: crate::Notifier
pub trait EventLoop {
    /// Register a persistent event source.
    fn create_event_source(&self, source: Rc<dyn EventSource>) -> Result<SourceId>;

    /// Unregister an event source.
    ///
    /// Safe to call from inside the source's own `check`.
    fn delete_event_source(&self, id: SourceId) -> Result<()>;

    /// Post a one-shot event. Ignored once the loop is finalized.
    fn queue_event(&self, event: Event, position: QueuePosition);

    /// Whether the loop (and its execution context) has been torn down.
    fn is_finalized(&self) -> bool;

    /// A handle that interrupts a blocked wait from another thread.
    ///
    /// Loops that cannot be woken externally return `None`; sources then
    /// rely on their declared wait bound alone.
    fn waker(&self) -> Option<LoopWaker> {
        None
    }
}

#[derive(Debug, Default)]
pub(crate) struct WakeState {
    pub(crate) pending: Mutex<bool>,
    pub(crate) cond: Condvar,
}

/// Wakes a blocked event loop from any thread.
#[derive(Debug, Clone)]
pub struct LoopWaker {
    state: Arc<WakeState>,
}

impl LoopWaker {
    pub(crate) fn new(state: Arc<WakeState>) -> Self {
        Self { state }
    }

    /// Interrupt the loop's current (or next) wait.
    pub fn wake(&self) {
        let mut pending = self.state.pending.lock();
        *pending = true;
        self.state.cond.notify_one();
    }
}
