use crate::handlers;
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, post, put},
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/today", get(handlers::get_today))
        .route("/api/groups", get(handlers::list_groups))
        .route(
            "/api/groups/:group_id/members",
            get(handlers::list_members).post(handlers::add_member),
        )
        .route(
            "/api/groups/:group_id/members/:member_id",
            put(handlers::rename_member).delete(handlers::remove_member),
        )
        .route("/api/groups/:group_id/status", get(handlers::get_status))
        .route("/api/groups/:group_id/sign-out", post(handlers::sign_out))
        .route("/api/groups/:group_id/sign-in", post(handlers::sign_in))
        .route("/api/groups/:group_id/undo", post(handlers::undo))
        .route("/api/groups/:group_id/report", get(handlers::get_report))
        .with_state(state)
}
