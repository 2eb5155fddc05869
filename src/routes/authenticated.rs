use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Every handler here receives a resolved `AuthUser`. The book endpoints then check the
/// matching `book:*` permission before touching the payload or the store, and answer
/// 404 for a missing book only once that check has passed.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        .route("/me", get(handlers::get_me))
        // GET /books?search=...&page=...
        // Paginated (10 per page) listing; requires book:view.
        .route("/books", get(handlers::list_books))
        // GET|POST /books/create
        // Requires book:create.
        .route(
            "/books/create",
            get(handlers::book_create_form).post(handlers::create_book),
        )
        // GET|POST /books/{id}/edit
        // Requires book:edit.
        .route(
            "/books/{id}/edit",
            get(handlers::get_book_for_edit).post(handlers::edit_book),
        )
        // GET|POST /books/{id}/delete
        // GET shows the book to confirm, POST deletes it. Requires book:delete.
        .route(
            "/books/{id}/delete",
            get(handlers::get_book_for_delete).post(handlers::delete_book),
        )
        // --- Role Pages ---
        // Each answers 403 unless the caller holds that exact role.
        .route("/admin", get(handlers::admin_page))
        .route("/librarian", get(handlers::librarian_page))
        .route("/member", get(handlers::member_page))
}
