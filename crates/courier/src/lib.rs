//! Courier: HTTP requests and sessions for cooperative event loops.
//!
//! Courier issues HTTP requests synchronously or asynchronously from a
//! single-threaded event loop. Asynchronous requests are multiplexed by a
//! per-context transfer pool that plugs into the loop as an event source and
//! reports each finished request through a callback, exactly once.
//!
//! This crate re-exports the event loop from `courier-core` at the top
//! level and the networking layer as [`net`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::rc::Rc;
//! use std::time::Duration;
//! use courier::prelude::*;
//!
//! let notifier = Rc::new(Notifier::new());
//! let context = Context::http(notifier.clone(), ClientConfig::default()).unwrap();
//!
//! let session = context
//!     .create_session(SessionOptions::new().header("Accept", "application/json"))
//!     .unwrap();
//! let id = context
//!     .session_request(
//!         session,
//!         Method::Get,
//!         "https://example.com/api",
//!         RequestOptions::new().asynchronous().callback(|context, id| {
//!             println!("{}", context.text(id).unwrap());
//!         }),
//!     )
//!     .unwrap();
//!
//! notifier.run_until(
//!     || context.state(id).map_or(true, RequestState::is_terminal),
//!     Duration::from_secs(30),
//! );
//! context.free_session(session);
//! ```

pub use courier_core::*;

/// Requests, sessions, the transfer pool and the transfer engines.
pub mod net {
    pub use courier_net::*;
}

/// The types most programs need.
pub mod prelude {
    pub use courier_core::{EventLoop, Notifier};
    pub use courier_net::{
        Auth, AuthScheme, ClientConfig, Context, HeaderSet, Method, RequestId, RequestOptions,
        RequestState, SessionId, SessionOptions,
    };
}
