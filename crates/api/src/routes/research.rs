use axum::routing::post;
use axum::Router;

use crate::handlers::research;
use crate::state::AppState;

/// Routes mounted at `/research`.
///
/// ```text
/// POST   /                -> submit_research
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(research::submit_research))
}
