//! Core systems for Courier.
//!
//! This crate provides the cooperative, single-threaded event loop that the
//! networking crate plugs its transfer pool into:
//!
//! - [`EventLoop`]: the capability other crates program against
//! - [`Notifier`]: the concrete loop implementation
//! - [`EventSource`]: persistent participants with a timing/readiness contract
//! - one-shot deferred events posted to the head or tail of the queue
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use courier_core::{EventLoop, Notifier, QueuePosition};
//!
//! let notifier = Notifier::new();
//! notifier.queue_event(Box::new(|| println!("deferred")), QueuePosition::Tail);
//! assert!(notifier.do_one_event(Duration::ZERO));
//! ```

mod error;
mod event;
mod event_loop;
pub mod logging;
mod notifier;
mod source;

pub use error::{CoreError, Result};
pub use event::{Event, EventQueue, QueuePosition};
pub use event_loop::{EventLoop, LoopWaker};
pub use notifier::Notifier;
pub use source::{EventSource, SourceId, WaitBound};
