//! The execution context.
//!
//! A [`Context`] is the per-thread home of every request and session, the
//! lazily created transfer pool, and the event loop they report to. Requests
//! and sessions live in slot-map arenas and refer to each other by
//! identifier, so either side can be destroyed first.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use std::time::Duration;
//! use courier_core::Notifier;
//! use courier_net::testing::{ScriptedEngine, ScriptedResponse};
//! use courier_net::{ClientConfig, Context, Method, RequestOptions, RequestState};
//!
//! let engine = ScriptedEngine::new();
//! engine.respond("http://example.test/", ScriptedResponse::ok("hello"));
//! let notifier = Rc::new(Notifier::new());
//! let context = Context::new(engine.clone(), notifier.clone(), ClientConfig::default());
//!
//! let id = context
//!     .request(Method::Get, "http://example.test/", RequestOptions::new().asynchronous())
//!     .unwrap();
//! engine.complete_all();
//! notifier.run_until(|| context.state(id).unwrap() == RequestState::Done, Duration::from_secs(1));
//! assert_eq!(context.text(id).unwrap(), "hello");
//! ```

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use courier_core::EventLoop;
use slotmap::SlotMap;

use crate::command::HandleRegistry;
use crate::config::ClientConfig;
use crate::dispatch;
use crate::engine::{Engine, HttpEngine};
use crate::error::{RequestError, Result};
use crate::headers::HeaderSet;
use crate::logging;
use crate::options::{Mode, RequestOptions, SessionOptions};
use crate::pool::{Pool, PoolStatus};
use crate::request::{HeaderLookup, Method, Request, RequestState};
use crate::session::Session;

slotmap::new_key_type! {
    /// Identifies a request within its context.
    pub struct RequestId;

    /// Identifies a session within its context.
    pub struct SessionId;
}

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

pub(crate) struct ContextInner {
    engine: Box<dyn Engine>,
    event_loop: Rc<dyn EventLoop>,
    config: ClientConfig,
    requests: RefCell<SlotMap<RequestId, Rc<RefCell<Request>>>>,
    sessions: RefCell<SlotMap<SessionId, Rc<RefCell<Session>>>>,
    pool: RefCell<Option<Rc<Pool>>>,
    pub(crate) handles: RefCell<HandleRegistry>,
    torn_down: Cell<bool>,
}

impl ContextInner {
    pub(crate) fn engine(&self) -> &dyn Engine {
        self.engine.as_ref()
    }

    pub(crate) fn event_loop(&self) -> &Rc<dyn EventLoop> {
        &self.event_loop
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.get() || self.event_loop.is_finalized()
    }

    pub(crate) fn request_cell(&self, id: RequestId) -> Option<Rc<RefCell<Request>>> {
        self.requests.borrow().get(id).cloned()
    }

    pub(crate) fn session_cell(&self, id: SessionId) -> Option<Rc<RefCell<Session>>> {
        self.sessions.borrow().get(id).cloned()
    }

    fn existing_pool(&self) -> Option<Rc<Pool>> {
        self.pool.borrow().clone()
    }

    /// The pool, created on first use.
    pub(crate) fn pool(self: &Rc<Self>) -> Result<Rc<Pool>> {
        if let Some(pool) = self.existing_pool() {
            return Ok(pool);
        }
        let pool = Pool::new(self)?;
        *self.pool.borrow_mut() = Some(pool.clone());
        Ok(pool)
    }
}

/// Per-thread execution context for requests and sessions.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Rc<ContextInner>,
}

impl Context {
    /// Create a context over any engine and event loop.
    pub fn new(
        engine: impl Engine + 'static,
        event_loop: Rc<dyn EventLoop>,
        config: ClientConfig,
    ) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                engine: Box::new(engine),
                event_loop,
                config,
                requests: RefCell::new(SlotMap::with_key()),
                sessions: RefCell::new(SlotMap::with_key()),
                pool: RefCell::new(None),
                handles: RefCell::new(HandleRegistry::default()),
                torn_down: Cell::new(false),
            }),
        }
    }

    /// Create a context backed by the HTTP engine.
    pub fn http(event_loop: Rc<dyn EventLoop>, config: ClientConfig) -> Result<Self> {
        let engine = HttpEngine::new(config.clone())
            .map_err(|e| RequestError::resource(format!("failed to start transfer engine: {e}")))?;
        Ok(Self::new(engine, event_loop, config))
    }

    pub(crate) fn from_inner(inner: Rc<ContextInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Rc<ContextInner> {
        &self.inner
    }

    /// Make this the current thread's context. Returns the one it replaces.
    pub fn install(&self) -> Option<Context> {
        CURRENT.with(|current| current.borrow_mut().replace(self.clone()))
    }

    /// The current thread's context, if one is installed.
    pub fn current() -> Option<Context> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Remove the current thread's context and shut it down.
    pub fn uninstall() -> Option<Context> {
        let context = CURRENT.with(|current| current.borrow_mut().take());
        if let Some(context) = &context {
            context.shutdown();
        }
        context
    }

    /// Whether both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The event loop this context reports to.
    pub fn event_loop(&self) -> &Rc<dyn EventLoop> {
        &self.inner.event_loop
    }

    /// Engine-wide configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Whether the context has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_torn_down()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.inner.is_torn_down() {
            return Err(RequestError::ContextFinalized);
        }
        Ok(())
    }

    /// Issue a request.
    ///
    /// Synchronous requests have finished when this returns; asynchronous
    /// ones are in the pool (or already failed). Either way the outcome is
    /// read through the returned identifier. Simple mode returns text rather
    /// than a request and goes through [`simple`](Self::simple).
    pub fn request(
        &self,
        method: Method,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<RequestId> {
        if options.mode == Mode::Simple {
            return Err(RequestError::configuration(
                "simple requests return their text, use Context::simple",
            ));
        }
        self.create_request(method, url.into(), options, None)
    }

    /// Issue a request through a session, inheriting its defaults.
    pub fn session_request(
        &self,
        session: SessionId,
        method: Method,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<RequestId> {
        if options.mode == Mode::Simple {
            return Err(RequestError::configuration(
                "simple requests return their text, use Context::simple",
            ));
        }
        self.create_request(method, url.into(), options, Some(session))
    }

    /// Perform a blocking request and return its text.
    ///
    /// The request is freed before returning. A request that ends in error
    /// yields [`RequestError::Failed`] with the composed message.
    pub fn simple(
        &self,
        method: Method,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<String> {
        self.simple_in(None, method, url, options)
    }

    /// Like [`simple`](Self::simple), through a session.
    pub fn simple_in(
        &self,
        session: Option<SessionId>,
        method: Method,
        url: impl Into<String>,
        options: RequestOptions,
    ) -> Result<String> {
        let options = options.mode(Mode::Simple);
        let id = self.create_request(method, url.into(), options, session)?;
        let outcome = self.with_request(id, |request| match request.state() {
            RequestState::Done => Ok(request.text()),
            RequestState::Error => Err(RequestError::Failed(request.error())),
            RequestState::Created | RequestState::InProgress => Err(RequestError::Failed(
                "request is in wrong state".to_string(),
            )),
        });
        self.free_request(id);
        outcome?
    }

    fn create_request(
        &self,
        method: Method,
        url: String,
        options: RequestOptions,
        session: Option<SessionId>,
    ) -> Result<RequestId> {
        self.ensure_running()?;
        let session_cell = session
            .map(|id| self.inner.session_cell(id).ok_or(RequestError::UnknownSession))
            .transpose()?;

        let mut request = Request::init(self.inner.engine(), method, url)?;
        match &session_cell {
            Some(cell) => request.apply(options, Some(&*cell.borrow())),
            None => request.apply(options, None),
        }
        request.session = session;

        let id = self
            .inner
            .requests
            .borrow_mut()
            .insert(Rc::new(RefCell::new(request)));
        if let Some(cell) = &session_cell {
            cell.borrow_mut().attach(id);
        }
        tracing::debug!(target: logging::REQUEST, ?id, ?session, "request created");

        self.run(id);
        Ok(id)
    }

    /// Configure and start a created request.
    fn run(&self, id: RequestId) {
        let Some(cell) = self.inner.request_cell(id) else {
            return;
        };
        let (prepared, mode) = {
            let mut request = cell.borrow_mut();
            (request.prepare(), request.mode())
        };

        if mode != Mode::Async {
            if prepared {
                cell.borrow_mut().perform_blocking();
            }
            return;
        }

        let failed = if prepared {
            match self.inner.pool() {
                Ok(pool) => {
                    let mut request = cell.borrow_mut();
                    match pool.add_request(id, &mut request) {
                        Ok(()) => false,
                        Err(err) => {
                            tracing::debug!(target: logging::REQUEST, ?id, error = %err, "pool rejected request");
                            request.fail(format!("failed to add request to async pool: {err}"))
                        }
                    }
                }
                Err(err) => cell.borrow_mut().fail(err.to_string()),
            }
        } else {
            true
        };
        drop(cell);

        // The caller learns about failures before submission the same way it
        // learns about completion.
        if failed {
            dispatch::schedule_callback(&self.inner, id);
        }
    }

    /// Destroy a request.
    ///
    /// A request still in the pool is removed first (and ends in `Error`
    /// without a callback). A queued callback becomes a no-op. Returns
    /// `false` if the request was already gone.
    pub fn free_request(&self, id: RequestId) -> bool {
        let Some(cell) = self.inner.requests.borrow_mut().remove(id) else {
            return false;
        };
        let (session, handle) = {
            let mut request = cell.borrow_mut();
            if request.in_pool {
                if let Some(pool) = self.inner.existing_pool() {
                    pool.remove_request(id, &mut request);
                }
            }
            if let Some(link) = request.callback_link.take() {
                link.cancel();
            }
            (request.session.take(), request.handle.take())
        };
        if let Some(session) = session.and_then(|sid| self.inner.session_cell(sid)) {
            session.borrow_mut().detach(id);
        }
        if let Some(handle) = handle {
            self.inner.handles.borrow_mut().retract(&handle);
        }
        tracing::debug!(target: logging::REQUEST, ?id, "request freed");
        true
    }

    /// Create a session.
    pub fn create_session(&self, options: SessionOptions) -> Result<SessionId> {
        self.ensure_running()?;
        let session = Session::init(self.inner.engine(), options)?;
        let id = self
            .inner
            .sessions
            .borrow_mut()
            .insert(Rc::new(RefCell::new(session)));
        tracing::debug!(target: logging::SESSION, ?id, "session created");
        Ok(id)
    }

    /// Destroy a session and every request still created through it.
    ///
    /// Returns `false` if the session was already gone.
    pub fn free_session(&self, id: SessionId) -> bool {
        let Some(cell) = self.inner.sessions.borrow_mut().remove(id) else {
            return false;
        };
        let (requests, handle) = {
            let mut session = cell.borrow_mut();
            (session.take_requests(), session.handle.take())
        };
        tracing::debug!(target: logging::SESSION, ?id, requests = requests.len(), "freeing session");
        for request in requests {
            // The session is already gone; the request must not look it up.
            if let Some(cell) = self.inner.request_cell(request) {
                cell.borrow_mut().session = None;
            }
            self.free_request(request);
        }
        if let Some(handle) = handle {
            self.inner.handles.borrow_mut().retract(&handle);
        }
        true
    }

    /// Read a request.
    pub fn with_request<R>(&self, id: RequestId, f: impl FnOnce(&Request) -> R) -> Result<R> {
        let cell = self
            .inner
            .request_cell(id)
            .ok_or(RequestError::UnknownRequest)?;
        let request = cell.borrow();
        Ok(f(&request))
    }

    /// Read a session.
    pub fn with_session<R>(&self, id: SessionId, f: impl FnOnce(&Session) -> R) -> Result<R> {
        let cell = self
            .inner
            .session_cell(id)
            .ok_or(RequestError::UnknownSession)?;
        let session = cell.borrow();
        Ok(f(&session))
    }

    /// Whether the request exists.
    pub fn contains_request(&self, id: RequestId) -> bool {
        self.inner.requests.borrow().contains_key(id)
    }

    /// Whether the session exists.
    pub fn contains_session(&self, id: SessionId) -> bool {
        self.inner.sessions.borrow().contains_key(id)
    }

    /// Number of live requests.
    pub fn request_count(&self) -> usize {
        self.inner.requests.borrow().len()
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.borrow().len()
    }

    /// Decoded response body.
    pub fn text(&self, id: RequestId) -> Result<String> {
        self.with_request(id, Request::text)
    }

    /// Raw response body.
    pub fn content(&self, id: RequestId) -> Result<Vec<u8>> {
        self.with_request(id, Request::content)
    }

    /// Response headers.
    pub fn headers(&self, id: RequestId) -> Result<HeaderSet> {
        self.with_request(id, Request::headers)
    }

    /// One response header; `Ok(None)` if the server did not send it.
    pub fn header(&self, id: RequestId, name: &str) -> Result<Option<HeaderLookup>> {
        self.with_request(id, |request| request.header(name))
    }

    /// Response status code.
    pub fn status_code(&self, id: RequestId) -> Result<u16> {
        self.with_request(id, Request::status_code)
    }

    /// Lifecycle state.
    pub fn state(&self, id: RequestId) -> Result<RequestState> {
        self.with_request(id, Request::state)
    }

    /// Composed error message.
    pub fn error(&self, id: RequestId) -> Result<String> {
        self.with_request(id, Request::error)
    }

    /// Response encoding name.
    pub fn encoding(&self, id: RequestId) -> Result<String> {
        self.with_request(id, Request::encoding)
    }

    /// Override the response encoding.
    pub fn set_encoding(&self, id: RequestId, name: &str) -> Result<()> {
        let cell = self
            .inner
            .request_cell(id)
            .ok_or(RequestError::UnknownRequest)?;
        let mut request = cell.borrow_mut();
        request.set_encoding(name)
    }

    /// The pool's bookkeeping, if the pool exists.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.inner.existing_pool().map(|pool| pool.status())
    }

    /// Tear the context down.
    ///
    /// Every request still in the pool ends in `Error` with the "removed
    /// from async pool before completion" message; no callbacks fire. New
    /// requests and sessions are refused afterwards, while existing ones
    /// stay readable until freed.
    pub fn shutdown(&self) {
        if self.inner.torn_down.replace(true) {
            return;
        }
        let pool = self.inner.pool.borrow_mut().take();
        if let Some(pool) = pool {
            pool.teardown();
        }
        tracing::debug!(target: logging::CONTEXT, "context shut down");
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("requests", &self.request_count())
            .field("sessions", &self.session_count())
            .field("pool", &self.pool_status())
            .field("torn_down", &self.inner.torn_down.get())
            .finish()
    }
}
