use crate::{
    AppState,
    auth::{self, AuthUser},
    csrf,
    error::{AppError, AppResult, FieldErrors},
    models::{
        AddLibraryBooksRequest, AssignLibrarianRequest, AssignRoleRequest, Book, BookForm,
        BookPage, ContactForm, ContactResponse, CreateLibraryRequest, CsrfTokenResponse,
        GrantPermissionsRequest, Librarian, Library, LibraryDetail, LoginRequest, LoginResponse,
        NewUser, RegisterRequest, RolePage, UserProfile,
    },
    pagination::{self, PAGE_SIZE},
    permissions::{Permission, Role},
    repository::normalize_search,
    validation,
};
use axum::{
    Json,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use uuid::Uuid;

// --- Query Structs ---

/// BookListParams
///
/// Query parameters for GET /books. `page` is taken as a raw string so that garbage
/// values fall back to page 1 instead of rejecting the request.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct BookListParams {
    /// Case-insensitive match against title or author name.
    pub search: Option<String>,
    /// 1-based page number.
    pub page: Option<String>,
}

/// Malformed JSON is only reported after the permission check has passed.
fn payload<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

/// Book ids are parsed only after the permission check, so a non-numeric id from an
/// unauthorized caller still gets 403.
fn book_id(path: Result<Path<i64>, PathRejection>) -> AppResult<i64> {
    path.map(|Path(id)| id)
        .map_err(|rejection| AppError::BadRequest(rejection.body_text()))
}

fn profile_for(access: crate::models::UserAccess) -> UserProfile {
    AuthUser::from_access(access).profile()
}

// --- Session & Identity ---

/// get_csrf_token
///
/// [Public Route] Returns the caller's anti-forgery token and sets the `csrftoken` cookie.
/// Clients echo it in `X-CSRFToken` on every POST/PUT/PATCH/DELETE.
#[utoipa::path(
    get,
    path = "/csrf",
    responses((status = 200, description = "Current CSRF token", body = CsrfTokenResponse))
)]
pub async fn get_csrf_token(jar: CookieJar) -> impl IntoResponse {
    let (jar, csrf_token) = csrf::ensure_token(jar);
    (jar, Json(CsrfTokenResponse { csrf_token }))
}

/// register_form
///
/// [Public Route] The GET side of registration: hands out the CSRF token the form needs.
#[utoipa::path(
    get,
    path = "/register",
    responses((status = 200, description = "CSRF token for the registration form", body = CsrfTokenResponse))
)]
pub async fn register_form(jar: CookieJar) -> impl IntoResponse {
    get_csrf_token(jar).await
}

/// register_user
///
/// [Public Route] Creates an account with no role and logs it in.
///
/// *Flow*: validate the form, reject a taken username as a field error, hash the password
/// with Argon2, insert, then issue the session cookie and rotate the CSRF token.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered and logged in", body = LoginResponse),
        (status = 400, description = "Invalid form"),
        (status = 409, description = "Username taken concurrently")
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let form = payload(body)?;
    let mut errors = validation::clean_registration(&form).err().unwrap_or_default();

    let username = form.username.trim().to_string();
    if state.repo.get_user_by_username(&username).await?.is_some() {
        errors.add("username", "A user with that username already exists.");
    }
    if !errors.is_empty() {
        return Err(AppError::Validation(errors));
    }

    let user = state
        .repo
        .create_user(NewUser {
            username,
            email: form.email.trim().to_string(),
            password_hash: auth::hash_password(&form.password)?,
            role: None,
        })
        .await?;
    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    let access = state
        .repo
        .get_user_access(user.id)
        .await?
        .ok_or_else(|| AppError::Internal("registered user vanished".to_string()))?;

    let token = auth::issue_token(user.id, &state.config)?;
    let jar = jar.add(auth::session_cookie(token.clone(), &state.config));
    let (jar, csrf_token) = csrf::rotate_token(jar);

    Ok((
        StatusCode::CREATED,
        jar,
        Json(LoginResponse {
            token,
            csrf_token,
            user: profile_for(access),
        }),
    ))
}

/// login_form
///
/// [Public Route] The GET side of login: hands out the CSRF token the form needs.
#[utoipa::path(
    get,
    path = "/login",
    responses((status = 200, description = "CSRF token for the login form", body = CsrfTokenResponse))
)]
pub async fn login_form(jar: CookieJar) -> impl IntoResponse {
    get_csrf_token(jar).await
}

/// login
///
/// [Public Route] Verifies credentials and starts a session.
/// Unknown usernames and wrong passwords produce the same error.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Invalid credentials")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    body: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let form = payload(body)?;

    let user = state.repo.get_user_by_username(form.username.trim()).await?;
    let user = match user {
        Some(user) if auth::verify_password(&form.password, &user.password_hash) => user,
        _ => {
            tracing::warn!(username = %form.username, "failed login attempt");
            let mut errors = FieldErrors::new();
            errors.add(
                "__all__",
                "Please enter a correct username and password. Note that both fields may be case-sensitive.",
            );
            return Err(AppError::Validation(errors));
        }
    };

    let access = state
        .repo
        .get_user_access(user.id)
        .await?
        .ok_or(AppError::Unauthenticated)?;

    let token = auth::issue_token(user.id, &state.config)?;
    let jar = jar.add(auth::session_cookie(token.clone(), &state.config));
    let (jar, csrf_token) = csrf::rotate_token(jar);
    tracing::info!(user_id = %user.id, username = %user.username, "user logged in");

    Ok((
        jar,
        Json(LoginResponse {
            token,
            csrf_token,
            user: profile_for(access),
        }),
    ))
}

/// logout
///
/// [Public Route] Clears the session cookie and rotates the CSRF token. Always succeeds.
#[utoipa::path(
    get,
    path = "/logout",
    responses((status = 204, description = "Logged out"))
)]
pub async fn logout(jar: CookieJar) -> impl IntoResponse {
    let jar = jar.remove(auth::expired_session_cookie());
    let (jar, _) = csrf::rotate_token(jar);
    (jar, StatusCode::NO_CONTENT)
}

/// get_me
///
/// [Authenticated Route] The caller's profile with role, groups and effective permissions.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Current user", body = UserProfile))
)]
pub async fn get_me(auth: AuthUser) -> Json<UserProfile> {
    Json(auth.profile())
}

// --- Role Pages ---

fn role_page(auth: &AuthUser, role: Role, allowed: bool, message: &str) -> AppResult<Json<RolePage>> {
    if !allowed {
        return Err(AppError::Forbidden(format!(
            "user '{}' tried to open the {} page",
            auth.username, role
        )));
    }
    Ok(Json(RolePage {
        role,
        username: auth.username.clone(),
        message: message.to_string(),
    }))
}

#[utoipa::path(
    get,
    path = "/admin",
    responses((status = 200, description = "Admin page", body = RolePage), (status = 403, description = "Not an admin"))
)]
pub async fn admin_page(auth: AuthUser) -> AppResult<Json<RolePage>> {
    role_page(&auth, Role::Admin, auth.is_admin(), "Welcome to the admin dashboard.")
}

#[utoipa::path(
    get,
    path = "/librarian",
    responses((status = 200, description = "Librarian page", body = RolePage), (status = 403, description = "Not a librarian"))
)]
pub async fn librarian_page(auth: AuthUser) -> AppResult<Json<RolePage>> {
    role_page(&auth, Role::Librarian, auth.is_librarian(), "Welcome to the librarian desk.")
}

#[utoipa::path(
    get,
    path = "/member",
    responses((status = 200, description = "Member page", body = RolePage), (status = 403, description = "Not a member"))
)]
pub async fn member_page(auth: AuthUser) -> AppResult<Json<RolePage>> {
    role_page(&auth, Role::Member, auth.is_member(), "Welcome, member.")
}

// --- Books ---

/// list_books
///
/// [Authenticated Route] Paginated book listing with optional search.
///
/// *Security*: the search term only ever reaches the store as a bound parameter.
/// The requested page is clamped into range rather than rejected.
#[utoipa::path(
    get,
    path = "/books",
    params(BookListParams),
    responses(
        (status = 200, description = "One page of books", body = BookPage),
        (status = 403, description = "Missing book:view")
    )
)]
pub async fn list_books(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<BookListParams>,
) -> AppResult<Json<BookPage>> {
    auth.require(Permission::BookView)?;

    let search = normalize_search(params.search.as_deref());
    if let Some(term) = &search {
        tracing::info!(username = %auth.username, search = %term, "book search");
    }

    let total_items = state.repo.count_books(search.as_deref()).await?;
    let window = pagination::resolve_page(params.page.as_deref(), total_items);
    let items = state
        .repo
        .search_books(search.as_deref(), PAGE_SIZE, window.offset)
        .await?;

    Ok(Json(BookPage {
        items,
        page: window.page,
        total_pages: window.total_pages,
        total_items,
        page_size: PAGE_SIZE,
        search,
    }))
}

/// book_create_form
///
/// [Authenticated Route] An empty book form for callers allowed to create books.
#[utoipa::path(
    get,
    path = "/books/create",
    responses((status = 200, description = "Empty form", body = BookForm), (status = 403, description = "Missing book:create"))
)]
pub async fn book_create_form(auth: AuthUser) -> AppResult<Json<BookForm>> {
    auth.require(Permission::BookCreate)?;
    Ok(Json(BookForm::default()))
}

/// create_book
///
/// [Authenticated Route] Validates and sanitizes the form, then creates the book,
/// resolving the author by name (created if new) in the same transaction.
#[utoipa::path(
    post,
    path = "/books/create",
    request_body = BookForm,
    responses(
        (status = 201, description = "Created", body = Book),
        (status = 400, description = "Field errors"),
        (status = 403, description = "Missing book:create")
    )
)]
pub async fn create_book(
    auth: AuthUser,
    State(state): State<AppState>,
    body: Result<Json<BookForm>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    auth.require(Permission::BookCreate)?;
    let form = payload(body)?;
    let clean = validation::clean_book_form(&form)?;

    let book = state.repo.create_book(clean).await?;
    tracing::info!(username = %auth.username, book_id = book.id, title = %book.title, "book created");

    Ok((StatusCode::CREATED, Json(book)))
}

/// get_book_for_edit
///
/// [Authenticated Route] The edit form pre-filled from the stored book.
#[utoipa::path(
    get,
    path = "/books/{id}/edit",
    params(("id" = i64, Path, description = "Book id")),
    responses(
        (status = 200, description = "Pre-filled form", body = BookForm),
        (status = 403, description = "Missing book:edit"),
        (status = 404, description = "No such book")
    )
)]
pub async fn get_book_for_edit(
    auth: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<BookForm>> {
    auth.require(Permission::BookEdit)?;
    let id = book_id(id)?;
    let book = state
        .repo
        .get_book(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Book".to_string()))?;
    Ok(Json(BookForm::from(&book)))
}

/// edit_book
///
/// [Authenticated Route] Replaces a book's fields.
///
/// *Order*: permission, then existence, then validation. A failed write leaves the
/// stored book untouched.
#[utoipa::path(
    post,
    path = "/books/{id}/edit",
    params(("id" = i64, Path, description = "Book id")),
    request_body = BookForm,
    responses(
        (status = 200, description = "Updated", body = Book),
        (status = 400, description = "Field errors"),
        (status = 403, description = "Missing book:edit"),
        (status = 404, description = "No such book")
    )
)]
pub async fn edit_book(
    auth: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<BookForm>, JsonRejection>,
) -> AppResult<Json<Book>> {
    auth.require(Permission::BookEdit)?;
    let id = book_id(id)?;
    if state.repo.get_book(id).await?.is_none() {
        return Err(AppError::NotFound("Book".to_string()));
    }

    let form = payload(body)?;
    let clean = validation::clean_book_form(&form)?;

    // The book can disappear between the lookup and the write.
    let book = state
        .repo
        .update_book(id, clean)
        .await?
        .ok_or_else(|| AppError::NotFound("Book".to_string()))?;
    tracing::info!(username = %auth.username, book_id = book.id, title = %book.title, "book edited");

    Ok(Json(book))
}

/// get_book_for_delete
///
/// [Authenticated Route] The book awaiting delete confirmation.
#[utoipa::path(
    get,
    path = "/books/{id}/delete",
    params(("id" = i64, Path, description = "Book id")),
    responses(
        (status = 200, description = "Book to delete", body = Book),
        (status = 403, description = "Missing book:delete"),
        (status = 404, description = "No such book")
    )
)]
pub async fn get_book_for_delete(
    auth: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<Json<Book>> {
    auth.require(Permission::BookDelete)?;
    let id = book_id(id)?;
    state
        .repo
        .get_book(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Book".to_string()))
}

#[utoipa::path(
    post,
    path = "/books/{id}/delete",
    params(("id" = i64, Path, description = "Book id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Missing book:delete"),
        (status = 404, description = "No such book")
    )
)]
pub async fn delete_book(
    auth: AuthUser,
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> AppResult<StatusCode> {
    auth.require(Permission::BookDelete)?;
    let id = book_id(id)?;
    if state.repo.delete_book(id).await? {
        tracing::info!(username = %auth.username, book_id = id, "book deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound("Book".to_string()))
    }
}

// --- Libraries & Authors ---

/// get_library
///
/// [Public Route] A library with its books and librarian.
#[utoipa::path(
    get,
    path = "/libraries/{id}",
    responses((status = 200, description = "Library detail", body = LibraryDetail), (status = 404, description = "No such library"))
)]
pub async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<LibraryDetail>> {
    state
        .repo
        .get_library_detail(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Library".to_string()))
}

#[utoipa::path(
    get,
    path = "/authors/{id}/books",
    responses((status = 200, description = "Books by the author", body = [Book]), (status = 404, description = "No such author"))
)]
pub async fn get_author_books(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<Json<Vec<Book>>> {
    if state.repo.get_author(id).await?.is_none() {
        return Err(AppError::NotFound("Author".to_string()));
    }
    Ok(Json(state.repo.books_by_author(id).await?))
}

// --- Contact ---

/// submit_contact
///
/// [Public Route] Sanitizes a contact message and echoes the cleaned payload.
/// Script blocks and angle brackets never survive into the response.
#[utoipa::path(
    post,
    path = "/contact",
    request_body = ContactForm,
    responses((status = 200, description = "Cleaned message", body = ContactResponse), (status = 400, description = "Field errors"))
)]
pub async fn submit_contact(
    body: Result<Json<ContactForm>, JsonRejection>,
) -> AppResult<Json<ContactResponse>> {
    let form = payload(body)?;
    let clean = validation::clean_contact_form(&form)?;
    tracing::info!(email = %clean.email, "contact message received");

    Ok(Json(ContactResponse {
        name: clean.name,
        email: clean.email,
        message: clean.message,
    }))
}

// --- Administration ---

/// assign_role
///
/// [Admin Route] Sets (or clears) a user's role. Group membership follows the role in
/// the same transaction.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    request_body = AssignRoleRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such user")
    )
)]
pub async fn assign_role(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    body: Result<Json<AssignRoleRequest>, JsonRejection>,
) -> AppResult<Json<UserProfile>> {
    auth.require_admin()?;
    let request = payload(body)?;

    let user = state
        .repo
        .set_user_role(user_id, request.role)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;
    tracing::info!(
        admin = %auth.username,
        target = %user.username,
        role = ?user.role,
        "role assigned"
    );

    let access = state
        .repo
        .get_user_access(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;
    Ok(Json(profile_for(access)))
}

/// grant_permissions
///
/// [Admin Route] Adds direct permissions to a user. Already-held grants are ignored.
#[utoipa::path(
    post,
    path = "/admin/users/{id}/permissions",
    request_body = GrantPermissionsRequest,
    responses(
        (status = 200, description = "Updated profile", body = UserProfile),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such user")
    )
)]
pub async fn grant_permissions(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    body: Result<Json<GrantPermissionsRequest>, JsonRejection>,
) -> AppResult<Json<UserProfile>> {
    auth.require_admin()?;
    let request = payload(body)?;

    state
        .repo
        .grant_user_permissions(user_id, &request.permissions)
        .await?;
    tracing::info!(admin = %auth.username, %user_id, permissions = ?request.permissions, "permissions granted");

    let access = state
        .repo
        .get_user_access(user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("User".to_string()))?;
    Ok(Json(profile_for(access)))
}

#[utoipa::path(
    post,
    path = "/admin/libraries",
    request_body = CreateLibraryRequest,
    responses(
        (status = 201, description = "Created", body = Library),
        (status = 403, description = "Not an admin"),
        (status = 409, description = "Name taken")
    )
)]
pub async fn create_library(
    auth: AuthUser,
    State(state): State<AppState>,
    body: Result<Json<CreateLibraryRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    auth.require_admin()?;
    let request = payload(body)?;
    let name = validation::clean_entity_name("name", &request.name)?;

    let library = state.repo.create_library(&name).await?;
    tracing::info!(admin = %auth.username, library = %library.name, "library created");
    Ok((StatusCode::CREATED, Json(library)))
}

/// add_library_books
///
/// [Admin Route] Adds existing books to a library's holdings. All-or-nothing: one unknown
/// book id aborts the whole request with 404.
#[utoipa::path(
    post,
    path = "/admin/libraries/{id}/books",
    request_body = AddLibraryBooksRequest,
    responses(
        (status = 200, description = "Updated library", body = LibraryDetail),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such library or book")
    )
)]
pub async fn add_library_books(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(library_id): Path<i64>,
    body: Result<Json<AddLibraryBooksRequest>, JsonRejection>,
) -> AppResult<Json<LibraryDetail>> {
    auth.require_admin()?;
    let request = payload(body)?;

    state
        .repo
        .add_books_to_library(library_id, &request.book_ids)
        .await?;

    state
        .repo
        .get_library_detail(library_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Library".to_string()))
}

#[utoipa::path(
    post,
    path = "/admin/libraries/{id}/librarian",
    request_body = AssignLibrarianRequest,
    responses(
        (status = 201, description = "Assigned", body = Librarian),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "No such library"),
        (status = 409, description = "Library already has a librarian")
    )
)]
pub async fn assign_librarian(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(library_id): Path<i64>,
    body: Result<Json<AssignLibrarianRequest>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    auth.require_admin()?;
    let request = payload(body)?;
    let name = validation::clean_entity_name("name", &request.name)?;

    let librarian = state.repo.assign_librarian(library_id, &name).await?;
    tracing::info!(admin = %auth.username, library_id, librarian = %librarian.name, "librarian assigned");
    Ok((StatusCode::CREATED, Json(librarian)))
}
