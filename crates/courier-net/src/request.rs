//! The request entity.
//!
//! A [`Request`] owns exactly one transfer handle for its whole lifetime.
//! It moves through `Created -> InProgress -> {Done, Error}`; no transition
//! ever leaves a terminal state.

use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::auth::Auth;
use crate::charset::Codec;
use crate::context::SessionId;
use crate::dispatch::CallbackLink;
use crate::engine::{DebugSink, Engine, ShareHandle, Transfer, TransferOption};
use crate::error::{EngineError, RequestError, Result};
use crate::headers::HeaderSet;
use crate::logging;
use crate::options::{self, Body, Callback, DebugCallback, Mode, RequestOptions};
use crate::session::Session;

/// Message recorded when a request leaves the pool before finishing.
pub(crate) const REMOVED_BEFORE_COMPLETION: &str = "removed from async pool before completion";

/// HTTP request method.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    Head,
    Get,
    Post,
    Put,
    Patch,
    Delete,
    /// Any other verb, sent as is.
    Custom(String),
}

impl Method {
    /// The verb as sent on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Head => "HEAD",
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Custom(verb) => verb,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Allocated and configured, not started.
    #[default]
    Created,
    /// Running, either blocking or in the pool.
    InProgress,
    /// Finished successfully.
    Done,
    /// Failed; see the request's error.
    Error,
}

impl RequestState {
    /// Whether the state is `Done` or `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// Lowercase name of the state.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a response header lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeaderLookup {
    /// The header occurred once.
    Single(String),
    /// The header occurred several times; values in received order.
    Multiple(Vec<String>),
}

/// Accumulates the response body. Written from engine threads.
#[derive(Debug, Default)]
struct ResponseBuffer {
    data: Vec<u8>,
    failure: Option<String>,
    #[cfg(test)]
    limit: Option<usize>,
}

impl ResponseBuffer {
    fn reserve(&mut self, additional: usize) -> bool {
        #[cfg(test)]
        if self
            .limit
            .is_some_and(|limit| self.data.len() + additional > limit)
        {
            return false;
        }
        self.data.try_reserve(additional).is_ok()
    }

    fn append(&mut self, chunk: &[u8]) -> std::result::Result<(), EngineError> {
        if !self.reserve(chunk.len()) {
            let message = growth_failure(chunk.len(), self.data.len());
            self.failure = Some(message.clone());
            return Err(EngineError::Write(message));
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }
}

fn growth_failure(additional: usize, current: usize) -> String {
    format!(
        "failed to allocate {additional} additional bytes in the output buffer, \
         current output buffer size is {current}"
    )
}

/// One HTTP request: its configuration, its transfer handle and its outcome.
///
/// Requests live inside a [`Context`](crate::Context) and are addressed by
/// [`RequestId`](crate::RequestId); use
/// [`Context::with_request`](crate::Context::with_request) or the accessor
/// shortcuts on the context to read them.
pub struct Request {
    url: String,
    method: Method,
    headers: Option<Rc<HeaderSet>>,
    body: Body,
    query: Option<String>,
    auth: Option<Auth>,
    allow_redirects: bool,
    verbose: bool,
    verify_host: Option<bool>,
    verify_peer: Option<bool>,
    verify_status: Option<bool>,
    connect_timeout: Option<Duration>,
    timeout: Option<Duration>,
    accept: Option<String>,
    content_type: Option<String>,
    mode: Mode,
    share: Option<ShareHandle>,
    pub(crate) callback: Option<Callback>,
    debug_callback: Option<DebugCallback>,

    pub(crate) session: Option<SessionId>,
    pub(crate) in_pool: bool,
    pub(crate) callback_link: Option<Rc<CallbackLink>>,
    pub(crate) handle: Option<String>,

    transfer: Box<dyn Transfer>,
    buffer: Arc<Mutex<ResponseBuffer>>,
    state: RequestState,
    error: Option<String>,
    transport_error: Option<String>,
    status_code: u16,
    response_headers: Vec<(String, String)>,
    codec: OnceCell<Codec>,
}

impl Request {
    /// Allocate a transfer and wire its body sink to the response buffer.
    pub(crate) fn init(engine: &dyn Engine, method: Method, url: String) -> Result<Self> {
        let mut transfer = engine
            .create_transfer()
            .map_err(|e| RequestError::resource(format!("failed to allocate transfer: {e}")))?;

        let buffer = Arc::new(Mutex::new(ResponseBuffer::default()));
        let sink = buffer.clone();
        transfer.set_write_sink(Box::new(move |chunk| sink.lock().append(chunk)));

        Ok(Self {
            url,
            method,
            headers: None,
            body: Body::None,
            query: None,
            auth: None,
            allow_redirects: true,
            verbose: false,
            verify_host: None,
            verify_peer: None,
            verify_status: None,
            connect_timeout: None,
            timeout: None,
            accept: None,
            content_type: None,
            mode: Mode::Sync,
            share: None,
            callback: None,
            debug_callback: None,
            session: None,
            in_pool: false,
            callback_link: None,
            handle: None,
            transfer,
            buffer,
            state: RequestState::Created,
            error: None,
            transport_error: None,
            status_code: 0,
            response_headers: Vec::new(),
            codec: OnceCell::new(),
        })
    }

    /// Apply options, inheriting from `session` where they are unset.
    ///
    /// Session headers are shared by reference; the first explicit header
    /// makes a private copy.
    pub(crate) fn apply(&mut self, options: RequestOptions, session: Option<&Session>) {
        let RequestOptions {
            mut common,
            body,
            query,
            mode,
        } = options;

        if let Some(session) = session {
            common.inherit(&session.options().common);
            self.headers = session.headers();
            self.share = Some(session.share().clone());
        }
        if let Some(explicit) = common.headers.take() {
            match self.headers.as_mut() {
                Some(headers) => Rc::make_mut(headers).merge(&explicit),
                None => self.headers = Some(Rc::new(explicit)),
            }
        }

        self.body = body;
        self.query = query;
        self.mode = mode;
        self.auth = common.auth;
        if let Some(allow) = common.allow_redirects {
            self.allow_redirects = allow;
        }
        if let Some(verbose) = common.verbose {
            self.verbose = verbose;
        }
        self.verify_host = common.verify_host;
        self.verify_peer = common.verify_peer;
        self.verify_status = common.verify_status;
        self.connect_timeout = common.connect_timeout;
        self.timeout = common.timeout;
        self.accept = common.accept;
        self.content_type = common.content_type;
        // Only pooled requests report completion through a callback.
        self.callback = common.callback.filter(|_| mode == Mode::Async);
        self.debug_callback = common.debug_callback;
    }

    /// Translate the request into transfer configuration and mark it
    /// in progress. A failing configuration call leaves it in `Error`.
    ///
    /// Returns whether the transfer may be started.
    pub(crate) fn prepare(&mut self) -> bool {
        match self.configure() {
            Ok(()) => {
                self.state = RequestState::InProgress;
                true
            }
            Err(err) => {
                tracing::debug!(target: logging::REQUEST, url = %self.url, error = %err, "configuration failed");
                self.fail(err.to_string());
                false
            }
        }
    }

    fn configure(&mut self) -> Result<()> {
        let sink: Option<DebugSink> = self.debug_callback.clone();
        self.transfer.set_debug_sink(sink);

        let url = match &self.query {
            Some(query) if !query.is_empty() => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{separator}{query}", self.url)
            }
            _ => self.url.clone(),
        };
        self.set(TransferOption::Url(url))?;
        self.set(TransferOption::Method(self.method.clone()))?;

        if let Some(auth) = self.auth.clone() {
            if let Some(username) = auth.username.clone() {
                self.set(TransferOption::Username(username))?;
            }
            if let Some(password) = auth.password.clone() {
                self.set(TransferOption::Password(password))?;
            }
            if let Some(token) = auth.token.clone() {
                self.set(TransferOption::BearerToken(token))?;
            }
            if let Some(descriptor) = auth.aws_sigv4.clone() {
                self.set(TransferOption::AwsSigV4(descriptor))?;
            }
            if let Some(scheme) = auth.effective_scheme() {
                self.set(TransferOption::AuthScheme(scheme))?;
            }
        }

        match self.body.clone() {
            Body::None => {}
            Body::Raw(data) => self.set(TransferOption::PostFields(data))?,
            Body::Form(fields) => self.set(TransferOption::MultipartForm(fields))?,
        }

        self.set(TransferOption::FollowRedirects(self.allow_redirects))?;
        self.set(TransferOption::Verbose(self.verbose))?;

        if let Some(timeout) = self.connect_timeout {
            self.set(TransferOption::ConnectTimeout(timeout))?;
        }
        if let Some(timeout) = self.timeout {
            self.set(TransferOption::Timeout(timeout))?;
        }
        if let Some(verify) = self.verify_peer {
            self.set(TransferOption::VerifyPeer(verify))?;
        }
        if let Some(verify) = self.verify_host {
            self.set(TransferOption::VerifyHost(verify))?;
        }
        if let Some(verify) = self.verify_status {
            self.set(TransferOption::VerifyStatus(verify))?;
        }
        if let Some(share) = self.share.clone() {
            self.set(TransferOption::Share(share))?;
            self.set(TransferOption::CookieEngine(true))?;
        }

        let mut lines = Vec::new();
        if let Some(accept) = &self.accept {
            lines.push(format!("Accept: {}", options::accept_value(accept)));
        }
        if let Some(content_type) = &self.content_type {
            lines.push(format!(
                "Content-Type: {}",
                options::content_type_value(content_type)
            ));
        }
        if let Some(headers) = &self.headers {
            lines.extend(headers.to_lines()?);
        }
        if !lines.is_empty() {
            self.set(TransferOption::Headers(lines))?;
        }
        Ok(())
    }

    fn set(&mut self, option: TransferOption) -> Result<()> {
        let name = option.name();
        self.transfer
            .set_option(option)
            .map_err(|e| RequestError::configuration(format!("failed to set {name}: {e}")))
    }

    /// Run the transfer on the calling thread and record the outcome.
    pub(crate) fn perform_blocking(&mut self) {
        tracing::debug!(target: logging::REQUEST, method = %self.method, url = %self.url, "performing request");
        let result = self.transfer.perform();
        self.finish(result);
    }

    /// Record the engine's outcome. Returns whether the state changed.
    pub(crate) fn finish(&mut self, result: std::result::Result<(), EngineError>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.status_code = self.transfer.response_code();
        self.response_headers = self.transfer.response_headers();
        match result {
            Ok(()) => self.state = RequestState::Done,
            Err(err) => {
                if let Some(failure) = self.buffer.lock().failure.take() {
                    self.error = Some(failure);
                }
                self.transport_error = Some(err.to_string());
                self.state = RequestState::Error;
            }
        }
        tracing::debug!(
            target: logging::REQUEST,
            url = %self.url,
            state = %self.state,
            status = self.status_code,
            "request finished"
        );
        true
    }

    /// Record an error and enter `Error`. Returns whether the state changed.
    pub(crate) fn fail(&mut self, message: impl Into<String>) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.error = Some(message.into());
        self.state = RequestState::Error;
        true
    }

    pub(crate) fn transfer_mut(&mut self) -> &mut dyn Transfer {
        self.transfer.as_mut()
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    /// Target URL, without the query augmentation.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Effective request headers, session defaults included.
    pub fn request_headers(&self) -> Option<&HeaderSet> {
        self.headers.as_deref()
    }

    /// Whether the request headers are still the session's own set.
    pub fn shares_headers_with(&self, session_headers: &Rc<HeaderSet>) -> bool {
        self.headers
            .as_ref()
            .is_some_and(|headers| Rc::ptr_eq(headers, session_headers))
    }

    /// Lifecycle state.
    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Session the request was created through, if it is still alive.
    pub fn session(&self) -> Option<SessionId> {
        self.session
    }

    /// Whether the request is registered with the pool.
    pub fn is_in_pool(&self) -> bool {
        self.in_pool
    }

    /// Name of the exposed command handle, if any.
    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    /// Response status code, 0 before a response arrives.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Raw response body.
    pub fn content(&self) -> Vec<u8> {
        self.buffer.lock().data.clone()
    }

    /// Response body decoded with the response encoding.
    pub fn text(&self) -> String {
        let codec = self.codec();
        codec.decode(&self.buffer.lock().data)
    }

    /// Response headers; repeated names keep their last value.
    pub fn headers(&self) -> HeaderSet {
        self.response_headers.iter().cloned().collect()
    }

    /// Look up a response header, ignoring case.
    ///
    /// `None` means the server did not send it.
    pub fn header(&self, name: &str) -> Option<HeaderLookup> {
        let mut values: Vec<String> = self
            .response_headers
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
            .collect();
        match values.len() {
            0 => None,
            1 => values.pop().map(HeaderLookup::Single),
            _ => Some(HeaderLookup::Multiple(values)),
        }
    }

    /// The error message.
    ///
    /// Composes the library-level message with the transport error when both
    /// exist. Empty unless the request is in `Error` or a message was
    /// recorded.
    pub fn error(&self) -> String {
        match (&self.error, &self.transport_error) {
            (Some(error), Some(transport)) => format!("{error} (transport error: {transport})"),
            (Some(error), None) => error.clone(),
            (None, Some(transport)) => format!("transport error: {transport}"),
            (None, None) if self.state == RequestState::Error => "unknown error".to_string(),
            (None, None) => String::new(),
        }
    }

    /// Name of the codec used by [`text`](Self::text).
    pub fn encoding(&self) -> String {
        self.codec().name().to_string()
    }

    /// Override the response encoding.
    pub fn set_encoding(&mut self, name: &str) -> Result<()> {
        let codec =
            Codec::from_name(name).ok_or_else(|| RequestError::UnknownEncoding(name.to_string()))?;
        self.codec = OnceCell::from(codec);
        Ok(())
    }

    /// The override, or the codec named by the response's charset.
    ///
    /// Until a `Content-Type` header has been received the default codec is
    /// reported without being cached.
    fn codec(&self) -> Codec {
        if let Some(codec) = self.codec.get() {
            return codec.clone();
        }
        let content_type = self
            .response_headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str());
        match content_type {
            Some(value) => self
                .codec
                .get_or_init(|| Codec::for_content_type(Some(value)))
                .clone(),
            None => Codec::default(),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("session", &self.session)
            .field("in_pool", &self.in_pool)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedEngine, ScriptedResponse};

    fn request(engine: &ScriptedEngine, url: &str, options: RequestOptions) -> Request {
        let mut request = Request::init(engine, Method::Get, url.to_string()).unwrap();
        request.apply(options, None);
        request
    }

    #[test]
    fn test_new_request_is_created() {
        let engine = ScriptedEngine::new();
        let request = request(&engine, "http://example.test/", RequestOptions::new());
        assert_eq!(request.state(), RequestState::Created);
        assert_eq!(request.error(), "");
        assert_eq!(request.status_code(), 0);
        assert_eq!(request.encoding(), "iso8859-1");
    }

    #[test]
    fn test_configuration_order() {
        let engine = ScriptedEngine::new();
        let options = RequestOptions::new()
            .auth(Auth::bearer("t0k3n"))
            .data_form([("a", "1"), ("b", "2")])
            .accept("json")
            .header("X-Trace", "on")
            .timeout(Duration::from_secs(5));
        let mut request = request(&engine, "http://example.test/", options);
        assert!(request.prepare());

        assert_eq!(
            engine.option_names(0),
            vec![
                "url",
                "method",
                "bearer token",
                "auth scheme",
                "multipart form",
                "follow redirects",
                "verbose",
                "timeout",
                "headers",
            ]
        );
        let options = engine.options(0);
        let Some(TransferOption::Headers(lines)) = options.last() else {
            panic!("headers were not set last");
        };
        assert_eq!(lines, &["Accept: application/json", "X-Trace: on"]);
        assert_eq!(request.state(), RequestState::InProgress);
    }

    #[test]
    fn test_query_is_appended() {
        let engine = ScriptedEngine::new();
        let mut request = request(
            &engine,
            "http://example.test/search?q=1",
            RequestOptions::new().query("page=2"),
        );
        assert!(request.prepare());
        let options = engine.options(0);
        let Some(TransferOption::Url(url)) = options.first() else {
            panic!("url was not set first");
        };
        assert_eq!(url, "http://example.test/search?q=1&page=2");
    }

    #[test]
    fn test_configuration_failure_names_the_option() {
        let engine = ScriptedEngine::new();
        engine.fail_option("follow redirects");
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());

        assert!(!request.prepare());
        assert_eq!(request.state(), RequestState::Error);
        assert_eq!(
            request.error(),
            "failed to set follow redirects: invalid value: scripted failure of follow redirects"
        );
        assert_eq!(engine.performed(0), 0);
    }

    #[test]
    fn test_blocking_transfer_done() {
        let engine = ScriptedEngine::new();
        engine.respond(
            "http://example.test/",
            ScriptedResponse::ok(vec![0x63, 0x61, 0x66, 0xe9])
                .with_header("Content-Type", "text/plain; charset=ISO-8859-1")
                .with_header("Set-Cookie", "a=1")
                .with_header("set-cookie", "b=2"),
        );
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());
        assert!(request.prepare());
        request.perform_blocking();

        assert_eq!(request.state(), RequestState::Done);
        assert_eq!(request.status_code(), 200);
        assert_eq!(request.text(), "café");
        assert_eq!(request.encoding(), "iso8859-1");
        assert_eq!(
            request.header("SET-COOKIE"),
            Some(HeaderLookup::Multiple(vec!["a=1".into(), "b=2".into()]))
        );
        assert_eq!(
            request.header("content-type"),
            Some(HeaderLookup::Single("text/plain; charset=ISO-8859-1".into()))
        );
        assert_eq!(request.header("x-missing"), None);
        assert_eq!(request.headers().get("set-cookie"), Some("b=2"));
    }

    #[test]
    fn test_transport_error_is_composed() {
        let engine = ScriptedEngine::new();
        engine.respond(
            "http://example.test/",
            ScriptedResponse::failure("connection refused"),
        );
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());
        assert!(request.prepare());
        request.perform_blocking();

        assert_eq!(request.state(), RequestState::Error);
        assert_eq!(request.error(), "transport error: connection refused");

        assert!(!request.fail("late"));
        request.error = Some("upload rejected".into());
        assert_eq!(
            request.error(),
            "upload rejected (transport error: connection refused)"
        );
    }

    #[test]
    fn test_terminal_state_is_final() {
        let engine = ScriptedEngine::new();
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());
        assert!(request.prepare());
        assert!(request.finish(Ok(())));
        assert!(!request.finish(Err(EngineError::Timeout)));
        assert!(!request.fail("too late"));
        assert_eq!(request.state(), RequestState::Done);
        assert_eq!(request.error(), "");
    }

    #[test]
    fn test_unknown_error() {
        let engine = ScriptedEngine::new();
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());
        request.state = RequestState::Error;
        assert_eq!(request.error(), "unknown error");
    }

    #[test]
    fn test_encoding_override() {
        let engine = ScriptedEngine::new();
        engine.respond(
            "http://example.test/",
            ScriptedResponse::ok("caf\u{e9}".as_bytes().to_vec())
                .with_header("Content-Type", "text/plain; charset=latin1"),
        );
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());
        assert!(request.prepare());
        request.perform_blocking();
        assert_eq!(request.text(), "cafÃ©");

        request.set_encoding("utf-8").unwrap();
        assert_eq!(request.text(), "café");
        assert_eq!(
            request.set_encoding("no-such-codec").unwrap_err(),
            RequestError::UnknownEncoding("no-such-codec".into())
        );
    }

    #[test]
    fn test_buffer_growth_failure_message() {
        assert_eq!(
            growth_failure(16, 4096),
            "failed to allocate 16 additional bytes in the output buffer, \
             current output buffer size is 4096"
        );
    }

    #[test]
    fn test_buffer_growth_failure_fails_request() {
        let engine = ScriptedEngine::new();
        engine.respond("http://example.test/", ScriptedResponse::ok("hello"));
        let mut request = request(&engine, "http://example.test/", RequestOptions::new());
        request.buffer.lock().limit = Some(3);
        assert!(request.prepare());

        request.perform_blocking();

        let growth = "failed to allocate 5 additional bytes in the output buffer, \
                      current output buffer size is 0";
        assert_eq!(request.state(), RequestState::Error);
        assert_eq!(
            request.error(),
            format!("{growth} (transport error: failed writing received data: {growth})")
        );
        assert!(request.content().is_empty());
    }

    #[test]
    fn test_callback_kept_only_for_async() {
        let engine = ScriptedEngine::new();
        let sync = request(
            &engine,
            "http://example.test/",
            RequestOptions::new().callback(|_, _| {}),
        );
        assert!(sync.callback.is_none());

        let pooled = request(
            &engine,
            "http://example.test/",
            RequestOptions::new().asynchronous().callback(|_, _| {}),
        );
        assert!(pooled.callback.is_some());
    }
}
