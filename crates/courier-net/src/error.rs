//! Error types for the networking module.

use std::path::PathBuf;

/// Errors reported by a transfer engine.
///
/// The `Display` text is the engine's own description; request-level code
/// composes it with higher-level context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The engine cannot honor this configuration.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// The configuration value was rejected.
    #[error("invalid value: {0}")]
    InvalidValue(String),
    /// The transfer failed in transit.
    #[error("{0}")]
    Transport(String),
    /// The transfer timed out.
    #[error("operation timed out")]
    Timeout,
    /// The write sink refused the received data.
    #[error("failed writing received data: {0}")]
    Write(String),
    /// The transfer is not registered with this multiplexer.
    #[error("transfer is not registered")]
    NotRegistered,
    /// The transfer was created by a different engine.
    #[error("transfer belongs to a different engine")]
    ForeignTransfer,
    /// The async runtime could not be started.
    #[error("failed to start async runtime: {0}")]
    Runtime(String),
    /// The pool could not register itself with the event loop.
    #[error("failed to register with the event loop: {0}")]
    EventLoop(#[from] courier_core::CoreError),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_builder() {
            Self::InvalidValue(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Errors surfaced by requests, sessions and the execution context.
///
/// Configuration and transport failures of a running request are recorded
/// on the request itself (see `Request::error`); these variants cover what
/// the caller observes directly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    /// Invalid or unsupported request setting.
    #[error("{0}")]
    Configuration(String),
    /// The transfer engine reported a failure.
    #[error("{0}")]
    Transport(String),
    /// An allocation (transfer handle, buffer, pool) failed.
    #[error("{0}")]
    Resource(String),
    /// The request finished in the error state; carries the composed message.
    #[error("{0}")]
    Failed(String),
    /// The request has been destroyed or never existed.
    #[error("request does not exist")]
    UnknownRequest,
    /// The session has been destroyed or never existed.
    #[error("session does not exist")]
    UnknownSession,
    /// The execution context has been torn down.
    #[error("the execution context has been shut down")]
    ContextFinalized,
    /// No codec is known under the given name.
    #[error("unknown encoding \"{0}\"")]
    UnknownEncoding(String),
    /// The `async` and `simple` switches were both requested.
    #[error("-async and -simple switches are incompatible with each other")]
    IncompatibleModes,
    /// The auth scheme list violates the scheme grammar.
    #[error("{0}")]
    InvalidAuthScheme(String),
}

impl RequestError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a resource error.
    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }
}

/// Errors raised when dispatching a command to an exposed handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    /// No request or session is exposed under this name.
    #[error("invalid handle \"{0}\"")]
    UnknownHandle(String),
    /// The command name is not in the handle's command table.
    #[error("bad command \"{name}\": must be {expected}")]
    UnknownCommand { name: String, expected: String },
    /// Wrong number of arguments.
    #[error("wrong # args: should be \"{usage}\"")]
    WrongArgs { usage: String },
    /// Header lookup found nothing.
    #[error("there is no header \"{0}\" in the server response")]
    HeaderNotFound(String),
    /// The request or session operation failed.
    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The configuration text is not valid TOML for this schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A value is out of range.
    #[error("invalid value for '{field}': {message}")]
    InvalidValue { field: &'static str, message: String },
}

/// A specialized Result type for request operations.
pub type Result<T> = std::result::Result<T, RequestError>;
