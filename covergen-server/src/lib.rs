//! # Covergen Server
//!
//! Serves cover images and runs the cover pipeline. A request for a cover
//! that does not exist yet queues it and answers `202 Accepted`; the
//! worker pool and backfill scheduler run in the same process.

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_router;
