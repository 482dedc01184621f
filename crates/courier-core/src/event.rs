//! One-shot deferred events.
//!
//! Events are posted to the loop's queue and run between suspension points.
//! Posting to the head makes an event run before anything already queued;
//! posting to the tail preserves FIFO order. Once posted, an event cannot be
//! withdrawn: handlers cancel themselves by checking shared state when they
//! run.

use std::collections::VecDeque;

/// A boxed one-shot event handler.
///
/// Events run on the loop's owning thread, so they need not be `Send`.
pub type Event = Box<dyn FnOnce() + 'static>;

/// Where a deferred event is inserted into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueuePosition {
    /// Run before every event already queued.
    Head,
    /// Run after every event already queued.
    Tail,
}

/// FIFO queue of one-shot events with head insertion.
#[derive(Default)]
pub struct EventQueue {
    events: VecDeque<Event>,
}

impl EventQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
        }
    }

    /// Post an event at the given position.
    pub fn post(&mut self, event: Event, position: QueuePosition) {
        match position {
            QueuePosition::Head => self.events.push_front(event),
            QueuePosition::Tail => self.events.push_back(event),
        }
    }

    /// Remove the next event to run.
    ///
    /// The caller runs it after releasing any borrow of the queue, so the
    /// handler is free to post more events.
    pub fn pop(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Check if there are any pending events.
    pub fn has_pending(&self) -> bool {
        !self.events.is_empty()
    }

    /// Get the number of pending events.
    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    /// Remove every pending event without running it.
    ///
    /// As with [`pop`](Self::pop), the caller drops the events after
    /// releasing its borrow of the queue.
    pub fn drain(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.events.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorder(log: &Rc<RefCell<Vec<&'static str>>>, name: &'static str) -> Event {
        let log = log.clone();
        Box::new(move || log.borrow_mut().push(name))
    }

    #[test]
    fn test_tail_events_run_in_fifo_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = EventQueue::new();
        queue.post(recorder(&log, "a"), QueuePosition::Tail);
        queue.post(recorder(&log, "b"), QueuePosition::Tail);

        while let Some(event) = queue.pop() {
            event();
        }
        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn test_head_event_jumps_the_queue() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = EventQueue::new();
        queue.post(recorder(&log, "tail"), QueuePosition::Tail);
        queue.post(recorder(&log, "head"), QueuePosition::Head);
        assert_eq!(queue.pending_count(), 2);

        while let Some(event) = queue.pop() {
            event();
        }
        assert_eq!(*log.borrow(), vec!["head", "tail"]);
    }

    #[test]
    fn test_drain_empties_without_running() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut queue = EventQueue::new();
        queue.post(recorder(&log, "a"), QueuePosition::Tail);
        queue.post(recorder(&log, "b"), QueuePosition::Tail);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(!queue.has_pending());
        drop(drained);
        assert!(log.borrow().is_empty());
    }
}
