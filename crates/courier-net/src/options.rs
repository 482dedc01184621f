//! Validated request and session options.
//!
//! These structures represent an option set that has already passed
//! argument parsing: the body is one variant of [`Body`], the execution
//! mode is one variant of [`Mode`], and every inheritable flag is an
//! `Option` so that `None` means "inherit".

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::auth::Auth;
use crate::context::{Context, RequestId};
use crate::engine::TraceKind;
use crate::error::RequestError;
use crate::headers::HeaderSet;

/// Completion callback, invoked with the finished request's identifier.
pub type Callback = Rc<dyn Fn(&Context, RequestId)>;

/// Debug-trace callback, invoked from the transfer engine with raw trace data.
pub type DebugCallback = Arc<dyn Fn(TraceKind, &[u8]) + Send + Sync>;

/// The request body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Body {
    /// No body.
    #[default]
    None,
    /// An already-encoded payload sent as is.
    Raw(Bytes),
    /// Multipart form fields, one part per pair, in order.
    Form(Vec<(String, String)>),
}

/// How a request is executed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Block until the transfer finishes.
    #[default]
    Sync,
    /// Hand the transfer to the pool and return immediately.
    Async,
    /// Block, return the text or the error, and free the request.
    Simple,
}

impl Mode {
    /// Combine the `async` and `simple` switches.
    pub fn from_switches(is_async: bool, simple: bool) -> Result<Self, RequestError> {
        match (is_async, simple) {
            (true, true) => Err(RequestError::IncompatibleModes),
            (true, false) => Ok(Self::Async),
            (false, true) => Ok(Self::Simple),
            (false, false) => Ok(Self::Sync),
        }
    }
}

/// Settings shared by sessions and requests.
///
/// On a request, unset fields inherit from its session, then from the
/// library defaults.
#[derive(Clone, Default)]
pub struct CommonOptions {
    /// Headers, merged over inherited headers.
    pub headers: Option<HeaderSet>,
    /// Credentials.
    pub auth: Option<Auth>,
    /// Follow redirects (default: true).
    pub allow_redirects: Option<bool>,
    /// Verbose engine tracing (default: false).
    pub verbose: Option<bool>,
    /// Verify the server host name.
    pub verify_host: Option<bool>,
    /// Verify the server certificate.
    pub verify_peer: Option<bool>,
    /// Require OCSP status verification.
    pub verify_status: Option<bool>,
    /// Connection timeout.
    pub connect_timeout: Option<Duration>,
    /// Total transfer timeout.
    pub timeout: Option<Duration>,
    /// Accept header shortcut (`all`, `json`) or literal value.
    pub accept: Option<String>,
    /// Content-Type shortcut (`json`) or literal value.
    pub content_type: Option<String>,
    /// Completion callback.
    pub callback: Option<Callback>,
    /// Debug-trace callback.
    pub debug_callback: Option<DebugCallback>,
}

impl CommonOptions {
    /// Fill every unset field from `defaults`. Headers are not touched.
    pub(crate) fn inherit(&mut self, defaults: &CommonOptions) {
        fn fill<T: Clone>(slot: &mut Option<T>, default: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(default);
            }
        }
        fill(&mut self.auth, &defaults.auth);
        fill(&mut self.allow_redirects, &defaults.allow_redirects);
        fill(&mut self.verbose, &defaults.verbose);
        fill(&mut self.verify_host, &defaults.verify_host);
        fill(&mut self.verify_peer, &defaults.verify_peer);
        fill(&mut self.verify_status, &defaults.verify_status);
        fill(&mut self.connect_timeout, &defaults.connect_timeout);
        fill(&mut self.timeout, &defaults.timeout);
        fill(&mut self.accept, &defaults.accept);
        fill(&mut self.content_type, &defaults.content_type);
        fill(&mut self.callback, &defaults.callback);
        fill(&mut self.debug_callback, &defaults.debug_callback);
    }
}

impl fmt::Debug for CommonOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommonOptions")
            .field("headers", &self.headers)
            .field("auth", &self.auth)
            .field("allow_redirects", &self.allow_redirects)
            .field("verbose", &self.verbose)
            .field("verify_host", &self.verify_host)
            .field("verify_peer", &self.verify_peer)
            .field("verify_status", &self.verify_status)
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("accept", &self.accept)
            .field("content_type", &self.content_type)
            .field("callback", &self.callback.is_some())
            .field("debug_callback", &self.debug_callback.is_some())
            .finish()
    }
}

macro_rules! common_setters {
    ($ty:ty) => {
        impl $ty {
            /// Merge headers over the current ones.
            pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
            where
                K: Into<String>,
                V: Into<String>,
            {
                self.common
                    .headers
                    .get_or_insert_with(HeaderSet::new)
                    .extend(headers);
                self
            }

            /// Set one header.
            pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
                self.common
                    .headers
                    .get_or_insert_with(HeaderSet::new)
                    .insert(name, value);
                self
            }

            /// Set credentials.
            pub fn auth(mut self, auth: Auth) -> Self {
                self.common.auth = Some(auth);
                self
            }

            /// Follow (or not) redirects.
            pub fn allow_redirects(mut self, allow: bool) -> Self {
                self.common.allow_redirects = Some(allow);
                self
            }

            /// Enable verbose engine tracing.
            pub fn verbose(mut self, verbose: bool) -> Self {
                self.common.verbose = Some(verbose);
                self
            }

            /// Verify the server host name.
            pub fn verify_host(mut self, verify: bool) -> Self {
                self.common.verify_host = Some(verify);
                self
            }

            /// Verify the server certificate.
            pub fn verify_peer(mut self, verify: bool) -> Self {
                self.common.verify_peer = Some(verify);
                self
            }

            /// Require certificate status verification.
            pub fn verify_status(mut self, verify: bool) -> Self {
                self.common.verify_status = Some(verify);
                self
            }

            /// Set the connection timeout.
            pub fn connect_timeout(mut self, timeout: Duration) -> Self {
                self.common.connect_timeout = Some(timeout);
                self
            }

            /// Set the total transfer timeout.
            pub fn timeout(mut self, timeout: Duration) -> Self {
                self.common.timeout = Some(timeout);
                self
            }

            /// Set the Accept header (`all`, `json` or a literal media range).
            pub fn accept(mut self, accept: impl Into<String>) -> Self {
                self.common.accept = Some(accept.into());
                self
            }

            /// Set the Content-Type header (`json` or a literal media type).
            pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
                self.common.content_type = Some(content_type.into());
                self
            }

            /// Set the completion callback.
            pub fn callback(mut self, callback: impl Fn(&Context, RequestId) + 'static) -> Self {
                self.common.callback = Some(Rc::new(callback));
                self
            }

            /// Set the debug-trace callback.
            pub fn debug_callback(
                mut self,
                callback: impl Fn(TraceKind, &[u8]) + Send + Sync + 'static,
            ) -> Self {
                self.common.debug_callback = Some(Arc::new(callback));
                self
            }
        }
    };
}

/// Defaults held by a session.
#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    /// Settings inherited by the session's requests.
    pub common: CommonOptions,
}

impl SessionOptions {
    /// Empty option set: everything inherits library defaults.
    pub fn new() -> Self {
        Self::default()
    }
}

common_setters!(SessionOptions);

/// Options of a single request.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Settings that may also be inherited from a session.
    pub common: CommonOptions,
    /// Request body.
    pub body: Body,
    /// Already-encoded query string appended to the URL.
    pub query: Option<String>,
    /// Execution mode.
    pub mode: Mode,
}

impl RequestOptions {
    /// Empty option set: a synchronous request with inherited settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Send an already-encoded body.
    pub fn data(mut self, data: impl Into<Bytes>) -> Self {
        self.body = Body::Raw(data.into());
        self
    }

    /// Send a multipart form, one part per field.
    pub fn data_form<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.body = Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    /// Append an already-encoded query string to the URL.
    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Set the execution mode.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Run asynchronously through the pool.
    pub fn asynchronous(self) -> Self {
        self.mode(Mode::Async)
    }
}

common_setters!(RequestOptions);

/// Expand the Accept shortcuts.
pub(crate) fn accept_value(value: &str) -> &str {
    match value {
        "all" => "*/*",
        "json" => "application/json",
        other => other,
    }
}

/// Expand the Content-Type shortcuts.
pub(crate) fn content_type_value(value: &str) -> &str {
    match value {
        "json" => "application/json",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_switches() {
        assert_eq!(Mode::from_switches(false, false).unwrap(), Mode::Sync);
        assert_eq!(Mode::from_switches(true, false).unwrap(), Mode::Async);
        assert_eq!(Mode::from_switches(false, true).unwrap(), Mode::Simple);
        let err = Mode::from_switches(true, true).unwrap_err();
        assert_eq!(
            err.to_string(),
            "-async and -simple switches are incompatible with each other"
        );
    }

    #[test]
    fn test_shortcuts() {
        assert_eq!(accept_value("all"), "*/*");
        assert_eq!(accept_value("json"), "application/json");
        assert_eq!(accept_value("text/csv"), "text/csv");
        assert_eq!(content_type_value("json"), "application/json");
        assert_eq!(content_type_value("all"), "all");
    }

    #[test]
    fn test_headers_builder_merges() {
        let options = RequestOptions::new()
            .headers([("X-A", "1")])
            .headers([("x-a", "2"), ("X-B", "3")]);
        let headers = options.common.headers.unwrap();
        let entries: Vec<_> = headers.iter().collect();
        assert_eq!(entries, vec![("x-a", "2"), ("X-B", "3")]);
    }

    #[test]
    fn test_body_variants_are_exclusive() {
        let options = RequestOptions::new().data("a=1").data_form([("f", "v")]);
        assert_eq!(
            options.body,
            Body::Form(vec![("f".to_string(), "v".to_string())])
        );
    }

    #[test]
    fn test_inherit_keeps_explicit_values() {
        let defaults = SessionOptions::new()
            .verbose(true)
            .allow_redirects(false)
            .timeout(Duration::from_secs(3));
        let mut common = RequestOptions::new().allow_redirects(true).common;
        common.inherit(&defaults.common);

        assert_eq!(common.allow_redirects, Some(true));
        assert_eq!(common.verbose, Some(true));
        assert_eq!(common.timeout, Some(Duration::from_secs(3)));
        assert_eq!(common.verify_peer, None);
    }
}
