//! Axum HTTP API server.
//!
//! Thin HTTP surface over `JobService`:
//! - `POST /api/jobs` submits a job
//! - `GET /api/jobs/:job_id` reports status
//! - `POST /api/jobs/:job_id/cancel` cancels
//! - health, readiness and Prometheus endpoints

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
