use axum::{
    Router,
    extract::{FromRef, Request},
    http::{HeaderName, HeaderValue, header},
    middleware::{self, Next},
    response::Response,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod csrf;
pub mod error;
pub mod handlers;
pub mod models;
pub mod pagination;
pub mod permissions;
pub mod provisioning;
pub mod repository;
pub mod validation;

// Routing segregation (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// Aggregates every `#[utoipa::path]` handler and `ToSchema` model into the OpenAPI
/// document served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::get_csrf_token, handlers::register_form, handlers::register_user,
        handlers::login_form, handlers::login, handlers::logout, handlers::get_me,
        handlers::admin_page, handlers::librarian_page, handlers::member_page,
        handlers::list_books, handlers::book_create_form, handlers::create_book,
        handlers::get_book_for_edit, handlers::edit_book, handlers::get_book_for_delete,
        handlers::delete_book, handlers::get_library, handlers::get_author_books,
        handlers::submit_contact, handlers::assign_role, handlers::grant_permissions,
        handlers::create_library, handlers::add_library_books, handlers::assign_librarian
    ),
    components(
        schemas(
            models::Book, models::BookForm, models::BookPage, models::Author, models::Library,
            models::Librarian, models::LibraryDetail, models::Group, models::RegisterRequest,
            models::LoginRequest, models::LoginResponse, models::CsrfTokenResponse,
            models::UserProfile, models::RolePage, models::ContactForm, models::ContactResponse,
            models::AssignRoleRequest, models::GrantPermissionsRequest,
            models::CreateLibraryRequest, models::AddLibraryBooksRequest,
            models::AssignLibrarianRequest, permissions::Role, permissions::Permission,
            error::ErrorResponse, error::FieldErrors,
        )
    ),
    tags(
        (name = "library-catalog", description = "Library Catalog API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single shared container for the repository handle and the loaded configuration.
/// Cloned per request; both fields are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Persistence layer (Postgres in production, in-memory in tests).
    pub repo: RepositoryState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication on the routes it wraps. A failed `AuthUser` extraction
/// rejects with 401 before the handler runs. On success the identity is stored in the
/// request extensions so the handler's own `AuthUser` extraction does not hit the store
/// a second time.
async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// create_router
///
/// Assembles the routing table and the middleware stack.
///
/// Layer order, outermost first: CORS, hardening headers, request id / tracing, CSRF,
/// then the per-router authentication layer.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let protected = authenticated::authenticated_routes()
        // Nested routes never match bare `/admin`, which stays the admin role page.
        .nest("/admin", admin::admin_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(protected)
        .with_state(state)
        // Rejects unsafe methods without a matching token before auth or body parsing.
        .layer(middleware::from_fn(csrf::csrf_protect));

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(
                    x_request_id.clone(),
                    MakeRequestUuid,
                ))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(
            ServiceBuilder::new()
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::overriding(
                    header::REFERRER_POLICY,
                    HeaderValue::from_static("same-origin"),
                )),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span factory for `TraceLayer`: method, URI and the `x-request-id` set by
/// `SetRequestIdLayer`, so every log line of one request can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
