//! The transfer engine capability.
//!
//! The request and pool layers drive HTTP exchanges through these traits
//! only. [`HttpEngine`] implements them on top of reqwest; the scripted
//! engine in [`crate::testing`] implements them in memory.

mod http_engine;
pub mod runtime;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use courier_core::LoopWaker;

use crate::auth::AuthScheme;
use crate::error::EngineError;
use crate::request::Method;

pub use self::http_engine::HttpEngine;

/// Receives response body bytes as they arrive.
///
/// Returning an error aborts the transfer.
pub type WriteSink = Box<dyn FnMut(&[u8]) -> Result<(), EngineError> + Send>;

/// Receives debug-trace data.
pub type DebugSink = Arc<dyn Fn(TraceKind, &[u8]) + Send + Sync>;

/// The kind of data passed to a debug sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TraceKind {
    /// Informational text from the engine.
    Text,
    /// A received response header line.
    HeaderIn,
    /// A sent request header line.
    HeaderOut,
    /// Received body data.
    DataIn,
    /// Sent body data.
    DataOut,
}

/// Associates a transfer registered with a [`Multi`] with its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

/// A finished transfer reported by [`Multi::info_read`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completion {
    /// The token the transfer was registered with.
    pub token: Token,
    /// The transfer's outcome.
    pub result: Result<(), EngineError>,
}

/// An opaque cache shared by the transfers of one session.
///
/// Holds whatever the engine reuses across transfers: cookies, resolved
/// names, TLS session tickets, open connections.
#[derive(Clone)]
pub struct ShareHandle(Arc<dyn Any + Send + Sync>);

impl ShareHandle {
    /// Wrap an engine-specific cache.
    pub fn new<T: Any + Send + Sync>(inner: T) -> Self {
        Self(Arc::new(inner))
    }

    /// Access the engine-specific cache.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }

    /// Whether two handles refer to the same cache.
    pub fn ptr_eq(&self, other: &ShareHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ShareHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ShareHandle")
            .field(&Arc::as_ptr(&self.0))
            .finish()
    }
}

/// One configuration call on a transfer.
#[derive(Clone, Debug)]
pub enum TransferOption {
    /// Target URL, query included.
    Url(String),
    /// Request method.
    Method(Method),
    /// User name.
    Username(String),
    /// Password.
    Password(String),
    /// Bearer token.
    BearerToken(String),
    /// AWS SigV4 provider descriptor.
    AwsSigV4(String),
    /// Allowed auth schemes.
    AuthScheme(AuthScheme),
    /// Multipart form fields.
    MultipartForm(Vec<(String, String)>),
    /// Raw request body.
    PostFields(Bytes),
    /// Follow redirects.
    FollowRedirects(bool),
    /// Verbose tracing.
    Verbose(bool),
    /// Request header lines, `Name: Value`.
    Headers(Vec<String>),
    /// Connection timeout.
    ConnectTimeout(Duration),
    /// Total transfer timeout.
    Timeout(Duration),
    /// Verify the server host name.
    VerifyHost(bool),
    /// Verify the server certificate.
    VerifyPeer(bool),
    /// Require certificate status verification.
    VerifyStatus(bool),
    /// Session cache shared with other transfers.
    Share(ShareHandle),
    /// Keep cookies in the shared cache.
    CookieEngine(bool),
}

impl TransferOption {
    /// Stable name used in configuration error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Url(_) => "url",
            Self::Method(_) => "method",
            Self::Username(_) => "username",
            Self::Password(_) => "password",
            Self::BearerToken(_) => "bearer token",
            Self::AwsSigV4(_) => "aws_sigv4",
            Self::AuthScheme(_) => "auth scheme",
            Self::MultipartForm(_) => "multipart form",
            Self::PostFields(_) => "post fields",
            Self::FollowRedirects(_) => "follow redirects",
            Self::Verbose(_) => "verbose",
            Self::Headers(_) => "headers",
            Self::ConnectTimeout(_) => "connect timeout",
            Self::Timeout(_) => "timeout",
            Self::VerifyHost(_) => "verify host",
            Self::VerifyPeer(_) => "verify peer",
            Self::VerifyStatus(_) => "verify status",
            Self::Share(_) => "share",
            Self::CookieEngine(_) => "cookie engine",
        }
    }
}

/// Creates transfers, multiplexers and shared caches.
pub trait Engine {
    /// Allocate a transfer handle.
    fn create_transfer(&self) -> Result<Box<dyn Transfer>, EngineError>;

    /// Allocate a multiplexer.
    fn create_multi(&self) -> Result<Box<dyn Multi>, EngineError>;

    /// Allocate a cache to share between transfers.
    fn create_share(&self) -> Result<ShareHandle, EngineError>;
}

/// One HTTP exchange.
pub trait Transfer {
    /// Apply one configuration call.
    fn set_option(&mut self, option: TransferOption) -> Result<(), EngineError>;

    /// Install the body sink.
    fn set_write_sink(&mut self, sink: WriteSink);

    /// Install (or remove) the debug-trace sink.
    fn set_debug_sink(&mut self, sink: Option<DebugSink>);

    /// Run the transfer to completion, blocking the calling thread.
    fn perform(&mut self) -> Result<(), EngineError>;

    /// Status code of the last response, 0 if none was received.
    fn response_code(&self) -> u16;

    /// Response headers in received order, repeated names included.
    fn response_headers(&self) -> Vec<(String, String)>;

    /// Downcasting support for the engine's multiplexer.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Advances many transfers with non-blocking steps.
pub trait Multi {
    /// Register a transfer. On failure nothing is registered.
    fn add(&mut self, token: Token, transfer: &mut dyn Transfer) -> Result<(), EngineError>;

    /// Deregister a transfer, finished or not.
    fn remove(&mut self, token: Token, transfer: &mut dyn Transfer) -> Result<(), EngineError>;

    /// Perform pending work without blocking; returns the number of
    /// transfers still running.
    fn perform(&mut self) -> Result<usize, EngineError>;

    /// How soon the engine wants `perform` to be called, if it knows.
    fn timeout(&self) -> Option<Duration>;

    /// Wait up to `timeout` for transfer activity; returns how many
    /// transfers are ready.
    fn poll(&mut self, timeout: Duration) -> Result<usize, EngineError>;

    /// Pop the next completion message.
    fn info_read(&mut self) -> Option<Completion>;

    /// Wake the owning event loop whenever a transfer becomes ready.
    fn set_waker(&mut self, waker: LoopWaker);
}
