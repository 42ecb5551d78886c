pub mod health;
pub mod jobs;
pub mod research;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// /health                   health check, same as the root `/health`
/// /research                 submit (POST)
/// /jobs                     history (GET, ?page&page_size&status)
/// /jobs/{job_id}            job status and result (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/research", research::router())
        .nest("/jobs", jobs::router())
}
