//! HTTP status API
//!
//! Read-only view of the running sessions:
//! - GET /health - Health check
//! - GET /channels - Stats of every channel session
//! - GET /channels/:channel_id/status - Stats of one channel session

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;
