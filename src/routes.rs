use crate::handlers;
use crate::state::AppState;
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring invalid cors origin");
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_credentials(true)
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::COOKIE,
            axum::http::HeaderName::from_static("x-request-id"),
        ]);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/v1/auth/signup", post(handlers::signup))
        .route("/api/v1/auth/login", post(handlers::login))
        .route("/api/v1/auth/logout", post(handlers::logout))
        .route("/api/v1/auth/me", get(handlers::me))
        .route("/api/v1/teachers", post(handlers::add_teacher))
        .route("/api/v1/quizzes", post(handlers::create_quiz).get(handlers::list_quizzes))
        .route("/api/v1/quizzes/template", get(handlers::download_template))
        .route("/api/v1/quizzes/import", post(handlers::import_quizzes))
        .route("/api/v1/quizzes/:id", get(handlers::get_quiz))
        .route("/api/v1/quizzes/:id/activate", post(handlers::activate_quiz))
        .route("/api/v1/quizzes/:id/deactivate", post(handlers::deactivate_quiz))
        .route("/api/v1/quizzes/:id/results", get(handlers::quiz_results))
        .route("/api/v1/submissions", post(handlers::submit).get(handlers::list_submissions))
        .route("/api/v1/submissions/mine", get(handlers::my_submissions))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
