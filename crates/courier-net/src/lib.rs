//! Networking module for Courier.
//!
//! This crate issues HTTP requests from a cooperative, single-threaded
//! event loop:
//!
//! - [`Context`]: per-thread home of requests, sessions and the transfer pool
//! - Requests: synchronous, asynchronous (pooled, with a completion
//!   callback) or simple (blocking, returning the decoded text)
//! - Sessions: inheritable defaults plus a cache shared by their requests
//! - The transfer pool: many in-flight transfers driven by one engine
//!   multiplexer, registered with the loop as an event source
//! - [`engine`]: the transfer engine traits and the reqwest-backed
//!   [`HttpEngine`]
//! - Command handles: requests and sessions driven by string commands
//!
//! # Example
//!
//! ```no_run
//! use std::rc::Rc;
//! use std::time::Duration;
//! use courier_core::Notifier;
//! use courier_net::{ClientConfig, Context, Method, RequestOptions, RequestState};
//!
//! let notifier = Rc::new(Notifier::new());
//! let context = Context::http(notifier.clone(), ClientConfig::default()).unwrap();
//!
//! let id = context
//!     .request(
//!         Method::Get,
//!         "https://example.com/",
//!         RequestOptions::new().asynchronous().callback(|context, id| {
//!             println!("status {}", context.status_code(id).unwrap());
//!         }),
//!     )
//!     .unwrap();
//!
//! notifier.run_until(
//!     || context.state(id).map_or(true, RequestState::is_terminal),
//!     Duration::from_secs(30),
//! );
//! ```

mod auth;
pub mod charset;
mod command;
mod config;
mod context;
mod dispatch;
pub mod engine;
mod error;
mod headers;
pub mod logging;
mod options;
mod pool;
mod request;
mod session;
pub mod testing;

pub use auth::{Auth, AuthScheme};
pub use command::{HandleTarget, Reply};
pub use config::{ClientConfig, PoolTiming};
pub use context::{Context, RequestId, SessionId};
pub use engine::HttpEngine;
pub use error::{CommandError, ConfigError, EngineError, RequestError, Result};
pub use headers::HeaderSet;
pub use options::{Body, Callback, CommonOptions, DebugCallback, Mode, RequestOptions, SessionOptions};
pub use pool::PoolStatus;
pub use request::{HeaderLookup, Method, Request, RequestState};
pub use session::Session;
