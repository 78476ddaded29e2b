//! # Utility Modules
//!
//! Supporting utilities shared by the transports and sessions.
//!
//! ## Components
//! - **Timers**: game tick arithmetic and a cancellable steady tick stream
//! - **Resolve**: host → address + family resolution
//! - **Logging**: tracing subscriber setup
//! - **Metrics**: thread-safe observability counters

pub mod logging;
pub mod metrics;
pub mod resolve;
pub mod timers;

pub use resolve::{resolve, AddressFamily, ResolvedHost};
pub use timers::{dynamic_period, dynamic_tick, steady_tick, ticks, MAX_TICK_RATE, MIN_TICK_RATE, SECOND, TICK};
