//! HTTP introspection surface.
//!
//! Read-only views of the scheduler plus manual triggers:
//! - `GET  /api/health`
//! - `GET  /api/status`
//! - `GET  /api/agents`
//! - `POST /api/agents/:name/run`
//! - `POST /api/agents/:name/ops/:op/:id`

mod agents;
mod routes;

pub use routes::{router, serve, AppState};
