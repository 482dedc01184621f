//! Target names for log filtering.
//!
//! Use these with `tracing` directives to filter logs by subsystem, e.g.
//! `RUST_LOG=courier_net::pool=trace`.

/// Networking crate target.
pub const NET: &str = "courier_net";
/// Request lifecycle target.
pub const REQUEST: &str = "courier_net::request";
/// Session lifecycle target.
pub const SESSION: &str = "courier_net::session";
/// Transfer pool target.
pub const POOL: &str = "courier_net::pool";
/// Completion dispatcher target.
pub const DISPATCH: &str = "courier_net::dispatch";
/// Transfer engine target.
pub const ENGINE: &str = "courier_net::engine";
/// Execution context target.
pub const CONTEXT: &str = "courier_net::context";
