//! WebSocket gateway for interview sessions.
//!
//! Each `/ws` connection carries one media stream and is bound to exactly
//! one interview session for its lifetime. `/health` reports liveness and
//! the number of live sessions.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{build_router, start_gateway};
pub use state::GatewayState;
