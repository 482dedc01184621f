//! The cooperative event loop.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use slotmap::SlotMap;

use crate::error::{CoreError, Result};
use crate::event::{Event, EventQueue, QueuePosition};
use crate::event_loop::{EventLoop, LoopWaker, WakeState};
use crate::logging::targets;
use crate::source::{EventSource, SourceId, WaitBound};

/// A single-threaded event loop with persistent sources and one-shot events.
///
/// Each call to [`do_one_event`](Self::do_one_event) is one iteration:
///
/// 1. If an event is queued, run exactly one and return.
/// 2. Otherwise ask every source to bound the wait, block for at most that
///    long (or until a [`LoopWaker`] fires), let every source check for work,
///    then run one queued event if there is one.
///
/// No borrow of the loop's state is held while a source or event runs, so
/// both may register sources, delete sources and post events freely.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use std::time::Duration;
/// use courier_core::{EventLoop, Notifier, QueuePosition};
///
/// let notifier = Notifier::new();
/// let hits = Rc::new(Cell::new(0));
/// let counter = hits.clone();
/// notifier.queue_event(Box::new(move || counter.set(counter.get() + 1)), QueuePosition::Tail);
///
/// assert!(notifier.run_until(|| hits.get() == 1, Duration::from_millis(50)));
/// ```
pub struct Notifier {
    sources: RefCell<SlotMap<SourceId, Rc<dyn EventSource>>>,
    queue: RefCell<EventQueue>,
    finalized: Cell<bool>,
    wake: Arc<WakeState>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    /// Create an empty loop.
    pub fn new() -> Self {
        Self {
            sources: RefCell::new(SlotMap::with_key()),
            queue: RefCell::new(EventQueue::new()),
            finalized: Cell::new(false),
            wake: Arc::new(WakeState::default()),
        }
    }

    /// Run one loop iteration, blocking for at most `max_wait`.
    ///
    /// Returns `true` if a queued event was run.
    #[tracing::instrument(level = "trace", skip(self), target = "courier_core::event_loop")]
    pub fn do_one_event(&self, max_wait: Duration) -> bool {
        if self.finalized.get() {
            return false;
        }
        if self.run_one() {
            return true;
        }

        let mut bound = WaitBound::new(max_wait);
        for (_, source) in self.snapshot() {
            source.setup(&mut bound);
        }
        if self.queue.borrow().has_pending() {
            bound.zero();
        }

        self.block(bound.get());

        for (id, source) in self.snapshot() {
            // Skip sources deleted by an earlier check in this pass.
            let live = self.sources.borrow().contains_key(id);
            if live {
                source.check();
            }
        }

        self.run_one()
    }

    /// Drive the loop until `done` returns true or `timeout` elapses.
    ///
    /// Returns whether the condition was met.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline || self.finalized.get() {
                return false;
            }
            self.do_one_event(deadline - now);
        }
    }

    /// Run every event currently queued, without consulting sources.
    ///
    /// Events posted by the handlers themselves are run as well.
    pub fn process_pending(&self) -> usize {
        let mut count = 0;
        while self.run_one() {
            count += 1;
        }
        count
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.borrow().len()
    }

    /// Number of queued events.
    pub fn pending_events(&self) -> usize {
        self.queue.borrow().pending_count()
    }

    /// Tear the loop down: pending events are dropped unrun and all sources
    /// are released. Later calls to `queue_event` are ignored.
    pub fn finalize(&self) {
        if self.finalized.replace(true) {
            return;
        }
        // Take ownership first so drop glue cannot observe a live borrow.
        let events = self.queue.borrow_mut().drain();
        let sources = std::mem::take(&mut *self.sources.borrow_mut());
        tracing::debug!(
            target: targets::EVENT_LOOP,
            dropped_events = events.len(),
            sources = sources.len(),
            "event loop finalized"
        );
        drop(events);
        drop(sources);
    }

    fn run_one(&self) -> bool {
        let event = self.queue.borrow_mut().pop();
        match event {
            Some(event) => {
                event();
                true
            }
            None => false,
        }
    }

    fn snapshot(&self) -> Vec<(SourceId, Rc<dyn EventSource>)> {
        self.sources
            .borrow()
            .iter()
            .map(|(id, source)| (id, source.clone()))
            .collect()
    }

    fn block(&self, wait: Duration) {
        let mut pending = self.wake.pending.lock();
        if !*pending && !wait.is_zero() {
            let _ = self.wake.cond.wait_for(&mut pending, wait);
        }
        *pending = false;
    }
}

impl EventLoop for Notifier {
    fn create_event_source(&self, source: Rc<dyn EventSource>) -> Result<SourceId> {
        if self.finalized.get() {
            return Err(CoreError::Finalized);
        }
        let id = self.sources.borrow_mut().insert(source);
        tracing::trace!(target: targets::SOURCE, ?id, "event source registered");
        Ok(id)
    }

    fn delete_event_source(&self, id: SourceId) -> Result<()> {
        let removed = self.sources.borrow_mut().remove(id);
        match removed {
            Some(source) => {
                tracing::trace!(target: targets::SOURCE, ?id, "event source deleted");
                drop(source);
                Ok(())
            }
            None => Err(CoreError::UnknownSource(id)),
        }
    }

    fn queue_event(&self, event: Event, position: QueuePosition) {
        if self.finalized.get() {
            tracing::trace!(target: targets::EVENT_LOOP, "event dropped, loop finalized");
            return;
        }
        self.queue.borrow_mut().post(event, position);
    }

    fn is_finalized(&self) -> bool {
        self.finalized.get()
    }

    fn waker(&self) -> Option<LoopWaker> {
        Some(LoopWaker::new(self.wake.clone()))
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("sources", &self.sources.borrow().len())
            .field("queue", &*self.queue.borrow())
            .field("finalized", &self.finalized.get())
            .finish()
    }
}
