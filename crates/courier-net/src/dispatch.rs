//! Completion dispatcher.
//!
//! A finished pooled request's callback runs from a one-shot event at the
//! tail of the loop's queue, so callbacks fire in completion order. Queued
//! events cannot be withdrawn: destroying a request instead clears the
//! [`CallbackLink`] the event carries, and the event does nothing.

use std::cell::Cell;
use std::rc::{Rc, Weak};

use courier_core::QueuePosition;

use crate::context::{Context, ContextInner, RequestId};
use crate::logging;

/// Back-reference from a queued completion event to its request.
#[derive(Debug)]
pub(crate) struct CallbackLink(Cell<Option<RequestId>>);

impl CallbackLink {
    fn new(id: RequestId) -> Self {
        Self(Cell::new(Some(id)))
    }

    /// Turn the queued event into a no-op.
    pub(crate) fn cancel(&self) {
        self.0.set(None);
    }

    fn take(&self) -> Option<RequestId> {
        self.0.take()
    }
}

/// Queue the request's callback.
///
/// Does nothing if the request has no callback or the execution context
/// has been torn down.
pub(crate) fn schedule_callback(context: &Rc<ContextInner>, id: RequestId) {
    if context.is_torn_down() {
        tracing::trace!(target: logging::DISPATCH, ?id, "context torn down, callback dropped");
        return;
    }
    let Some(cell) = context.request_cell(id) else {
        return;
    };
    let link = {
        let mut request = cell.borrow_mut();
        if request.callback.is_none() {
            return;
        }
        let link = Rc::new(CallbackLink::new(id));
        if let Some(previous) = request.callback_link.replace(link.clone()) {
            previous.cancel();
        }
        link
    };

    let weak = Rc::downgrade(context);
    context
        .event_loop()
        .queue_event(Box::new(move || fire(&weak, &link)), QueuePosition::Tail);
    tracing::trace!(target: logging::DISPATCH, ?id, "callback scheduled");
}

fn fire(context: &Weak<ContextInner>, link: &CallbackLink) {
    let Some(id) = link.take() else {
        tracing::trace!(target: logging::DISPATCH, "request destroyed before its callback");
        return;
    };
    let Some(inner) = context.upgrade() else {
        return;
    };
    let Some(cell) = inner.request_cell(id) else {
        return;
    };
    // Unlink first so freeing the request from its own callback does not
    // touch this event again.
    let callback = {
        let mut request = cell.borrow_mut();
        request.callback_link = None;
        request.callback.clone()
    };
    drop(cell);

    if let Some(callback) = callback {
        tracing::trace!(target: logging::DISPATCH, ?id, "invoking callback");
        let context = Context::from_inner(inner);
        callback(&context, id);
    }
}
