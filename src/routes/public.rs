use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a session. Every POST here still goes through the
/// CSRF layer, so clients fetch a token from `/csrf`, `/login` or `/register` first.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for load balancers.
        .route("/health", get(|| async { "ok" }))
        // GET /csrf
        .route("/csrf", get(handlers::get_csrf_token))
        // GET|POST /register
        // GET hands out a CSRF token; POST creates a role-less account and logs it in.
        .route(
            "/register",
            get(handlers::register_form).post(handlers::register_user),
        )
        // GET|POST /login
        .route("/login", get(handlers::login_form).post(handlers::login))
        // GET /logout
        .route("/logout", get(handlers::logout))
        // GET /libraries/{id}
        // Library detail with holdings and librarian.
        .route("/libraries/{id}", get(handlers::get_library))
        // GET /authors/{id}/books
        .route("/authors/{id}/books", get(handlers::get_author_books))
        // POST /contact
        // Message is sanitized (script blocks and angle brackets removed) and echoed back.
        .route("/contact", post(handlers::submit_contact))
}
