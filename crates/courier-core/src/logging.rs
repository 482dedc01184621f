//! Logging facilities for Courier.
//!
//! Courier uses the `tracing` crate for instrumentation. To see logs, install
//! a subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("courier_core::event_loop=trace")
//!     .init();
//! ```

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core framework target.
    pub const CORE: &str = "courier_core";
    /// Event loop target.
    pub const EVENT_LOOP: &str = "courier_core::event_loop";
    /// Event source registration target.
    pub const SOURCE: &str = "courier_core::source";
}
