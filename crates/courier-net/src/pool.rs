//! The transfer pool.
//!
//! One pool per execution context multiplexes every in-flight asynchronous
//! request over a single engine multiplexer. While it has work, the pool is
//! registered with the event loop as an [`EventSource`]:
//!
//! - `setup` bounds the loop's wait by the engine's own deadline hint,
//!   clamped to the configured ceiling, and requests no wait at all when
//!   the engine is about to act or a refresh is pending;
//! - `check` polls the engine briefly (skipped when a refresh is pending),
//!   steps it, and drains finished transfers when the engine's running
//!   count no longer matches the pool's active count.
//!
//! The pool never unregisters itself from inside `check`; it posts a
//! deferred event to the head of the queue that does so.

use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use courier_core::{EventLoop, EventSource, QueuePosition, SourceId, WaitBound};
use slotmap::{Key, KeyData};

use crate::config::PoolTiming;
use crate::context::{ContextInner, RequestId};
use crate::dispatch;
use crate::engine::{Completion, Multi, Token};
use crate::error::{EngineError, RequestError, Result};
use crate::logging;
use crate::request::{REMOVED_BEFORE_COMPLETION, Request, RequestState};

/// A snapshot of the pool's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Requests registered with the pool.
    pub members: usize,
    /// Registrations the pool believes are still running.
    pub active: usize,
    /// Whether the pool is registered as an event source.
    pub is_source: bool,
    /// Whether the next loop pass steps the engine without waiting.
    pub needs_refresh: bool,
}

pub(crate) fn token_for(id: RequestId) -> Token {
    Token(id.data().as_ffi())
}

fn request_for(token: Token) -> RequestId {
    RequestId::from(KeyData::from_ffi(token.0))
}

struct PoolState {
    multi: Box<dyn Multi>,
    members: HashSet<RequestId>,
    needs_refresh: bool,
    active: usize,
    source: Option<SourceId>,
    deactivation_queued: bool,
    dead: bool,
}

pub(crate) struct Pool {
    context: Weak<ContextInner>,
    event_loop: Rc<dyn EventLoop>,
    timing: PoolTiming,
    this: Weak<Pool>,
    state: RefCell<PoolState>,
}

impl Pool {
    pub(crate) fn new(context: &Rc<ContextInner>) -> Result<Rc<Self>> {
        let mut multi = context
            .engine()
            .create_multi()
            .map_err(|e| RequestError::resource(format!("failed to allocate async pool: {e}")))?;
        let event_loop = context.event_loop().clone();
        if let Some(waker) = event_loop.waker() {
            multi.set_waker(waker);
        }
        tracing::debug!(target: logging::POOL, "pool created");
        Ok(Rc::new_cyclic(|this| Self {
            context: Rc::downgrade(context),
            event_loop,
            timing: context.config().pool,
            this: this.clone(),
            state: RefCell::new(PoolState {
                multi,
                members: HashSet::new(),
                needs_refresh: false,
                active: 0,
                source: None,
                deactivation_queued: false,
                dead: false,
            }),
        }))
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let state = self.state.borrow();
        PoolStatus {
            members: state.members.len(),
            active: state.active,
            is_source: state.source.is_some(),
            needs_refresh: state.needs_refresh,
        }
    }

    /// Register a started request. On failure nothing changes.
    pub(crate) fn add_request(
        &self,
        id: RequestId,
        request: &mut Request,
    ) -> std::result::Result<(), EngineError> {
        let activate = {
            let mut state = self.state.borrow_mut();
            state.multi.add(token_for(id), request.transfer_mut())?;
            state.members.insert(id);
            state.active += 1;
            state.needs_refresh = true;
            state.source.is_none()
        };
        request.in_pool = true;
        tracing::debug!(target: logging::POOL, ?id, url = request.url(), "request added");

        if activate {
            let source: Rc<dyn EventSource> = Rc::new(PoolSource {
                pool: self.this.clone(),
            });
            match self.event_loop.create_event_source(source) {
                Ok(source_id) => self.state.borrow_mut().source = Some(source_id),
                Err(err) => {
                    tracing::warn!(target: logging::POOL, error = %err, "failed to register event source");
                    self.withdraw(id, request);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Undo a registration nothing will ever step.
    fn withdraw(&self, id: RequestId, request: &mut Request) {
        let mut state = self.state.borrow_mut();
        if let Err(err) = state.multi.remove(token_for(id), request.transfer_mut()) {
            tracing::debug!(target: logging::POOL, ?id, error = %err, "engine deregistration failed");
        }
        state.members.remove(&id);
        state.active = state.active.saturating_sub(1);
        state.needs_refresh = !state.members.is_empty();
        request.in_pool = false;
    }

    /// Deregister a request, finished or not.
    ///
    /// A request still in progress is forced into `Error`. Returns whether
    /// that happened.
    pub(crate) fn remove_request(&self, id: RequestId, request: &mut Request) -> bool {
        {
            let mut state = self.state.borrow_mut();
            if let Err(err) = state.multi.remove(token_for(id), request.transfer_mut()) {
                tracing::debug!(target: logging::POOL, ?id, error = %err, "engine deregistration failed");
            }
            if !state.dead {
                state.members.remove(&id);
            }
            state.active = state.active.saturating_sub(1);
        }
        request.in_pool = false;
        tracing::debug!(target: logging::POOL, ?id, "request removed");

        request.state() == RequestState::InProgress && request.fail(REMOVED_BEFORE_COMPLETION)
    }

    /// Timing contract, run before the loop blocks.
    fn declare_wait(&self, bound: &mut WaitBound) {
        let mut state = self.state.borrow_mut();
        if state.dead {
            return;
        }
        if state.needs_refresh {
            bound.zero();
            return;
        }
        match state.multi.timeout() {
            Some(hint) if hint <= self.timing.refresh_threshold() => {
                bound.zero();
                state.needs_refresh = true;
            }
            Some(hint) if hint < self.timing.ceiling() => bound.limit(hint),
            _ => bound.limit(self.timing.ceiling()),
        }
    }

    /// Readiness contract, run after the loop wakes.
    fn check_ready(&self) {
        let proceed = {
            let mut state = self.state.borrow_mut();
            if state.dead {
                return;
            }
            if state.needs_refresh {
                state.needs_refresh = false;
                true
            } else {
                match state.multi.poll(self.timing.poll()) {
                    Ok(ready) => ready > 0,
                    Err(err) => {
                        tracing::warn!(target: logging::POOL, error = %err, "readiness poll failed");
                        false
                    }
                }
            }
        };
        if proceed {
            self.step();
        }
    }

    /// Step the engine and report finished transfers.
    #[tracing::instrument(level = "trace", skip(self), target = "courier_net::pool")]
    fn step(&self) {
        let finished: Vec<Completion> = {
            let mut state = self.state.borrow_mut();
            let running = match state.multi.perform() {
                Ok(running) => running,
                Err(err) => {
                    tracing::warn!(target: logging::POOL, error = %err, "engine step failed");
                    return;
                }
            };
            if running == state.active {
                return;
            }
            std::iter::from_fn(|| state.multi.info_read()).collect()
        };

        for completion in finished {
            self.complete(completion);
        }

        let idle = {
            let state = self.state.borrow();
            state.active == 0 && state.source.is_some() && !state.deactivation_queued
        };
        if idle {
            self.queue_deactivation();
        }
    }

    fn complete(&self, completion: Completion) {
        let id = request_for(completion.token);
        let Some(context) = self.context.upgrade() else {
            return;
        };
        let Some(cell) = context.request_cell(id) else {
            tracing::debug!(target: logging::POOL, ?id, "completion for a destroyed request");
            let mut state = self.state.borrow_mut();
            state.members.remove(&id);
            state.active = state.active.saturating_sub(1);
            return;
        };
        let finished = {
            let mut request = cell.borrow_mut();
            let finished = request.finish(completion.result);
            self.remove_request(id, &mut request);
            finished
        };
        drop(cell);
        if finished {
            dispatch::schedule_callback(&context, id);
        }
    }

    fn queue_deactivation(&self) {
        self.state.borrow_mut().deactivation_queued = true;
        let pool = self.this.clone();
        self.event_loop.queue_event(
            Box::new(move || {
                if let Some(pool) = pool.upgrade() {
                    pool.deactivate();
                }
            }),
            QueuePosition::Head,
        );
    }

    fn deactivate(&self) {
        let source = {
            let mut state = self.state.borrow_mut();
            state.deactivation_queued = false;
            if state.active > 0 {
                return;
            }
            state.source.take()
        };
        if let Some(source) = source {
            if let Err(err) = self.event_loop.delete_event_source(source) {
                tracing::debug!(target: logging::POOL, error = %err, "event source already gone");
            }
            tracing::debug!(target: logging::POOL, "pool idle, event source removed");
        }
    }

    /// Force every registered request out of the pool and unregister.
    pub(crate) fn teardown(&self) {
        let (members, source) = {
            let mut state = self.state.borrow_mut();
            if state.dead {
                return;
            }
            state.dead = true;
            let members: Vec<RequestId> = state.members.iter().copied().collect();
            (members, state.source.take())
        };
        tracing::debug!(target: logging::POOL, requests = members.len(), "tearing down pool");

        let context = self.context.upgrade();
        for id in members {
            let Some(cell) = context.as_ref().and_then(|c| c.request_cell(id)) else {
                continue;
            };
            let forced = {
                let mut request = cell.borrow_mut();
                self.remove_request(id, &mut request)
            };
            drop(cell);
            if forced {
                if let Some(context) = &context {
                    dispatch::schedule_callback(context, id);
                }
            }
        }

        self.state.borrow_mut().members.clear();
        if let Some(source) = source {
            let _ = self.event_loop.delete_event_source(source);
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        if let Some(source) = self.state.get_mut().source.take() {
            let _ = self.event_loop.delete_event_source(source);
        }
    }
}

/// Event source registration of a pool.
struct PoolSource {
    pool: Weak<Pool>,
}

impl EventSource for PoolSource {
    fn setup(&self, bound: &mut WaitBound) {
        if let Some(pool) = self.pool.upgrade() {
            pool.declare_wait(bound);
        }
    }

    fn check(&self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.check_ready();
        }
    }
}
