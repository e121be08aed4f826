// ============================================================================
// Courier Server
// ============================================================================
//
// Message submission pipeline for an end-to-end encrypted messenger:
// device topology validation, rate limiting with abuse challenges, delivery
// routing to queues and push vendors, and multi-recipient fan-out.
//
// ============================================================================

pub mod accounts;
pub mod cache;
pub mod challenge;
pub mod clock;
pub mod context;
pub mod delivery;
pub mod fanout;
pub mod limiter;
pub mod metrics;
pub mod push;
pub mod routes;
pub mod utils;
pub mod validation;

pub use context::{AppContext, Backends};
pub use routes::create_router;
