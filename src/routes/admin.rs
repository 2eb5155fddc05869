use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{post, put},
};

/// Admin Router Module
///
/// User and library administration, nested under `/admin`. The router is wrapped in the
/// authentication layer; each handler additionally calls `AuthUser::require_admin`, so a
/// logged-in non-admin receives 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // PUT /admin/users/{id}/role
        // Sets or clears the role and moves the user into the matching group.
        .route("/users/{id}/role", put(handlers::assign_role))
        // POST /admin/users/{id}/permissions
        // Direct grants on top of group permissions.
        .route(
            "/users/{id}/permissions",
            post(handlers::grant_permissions),
        )
        // POST /admin/libraries
        .route("/libraries", post(handlers::create_library))
        // POST /admin/libraries/{id}/books
        .route(
            "/libraries/{id}/books",
            post(handlers::add_library_books),
        )
        // POST /admin/libraries/{id}/librarian
        // One librarian per library; a second assignment is 409.
        .route(
            "/libraries/{id}/librarian",
            post(handlers::assign_librarian),
        )
}
