use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::permissions::{Permission, Role};

// --- Identity ---

/// User
///
/// Canonical identity record. `role` stays `None` until an administrator assigns one.
/// Never serialized directly: `UserProfile` is the outward-facing shape.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Option<Role>,
    pub created_at: DateTime<Utc>,
}

/// NewUser
///
/// Insert payload for `Repository::create_user`. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Option<Role>,
}

/// Group
///
/// Named bundle of permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Group {
    pub name: String,
    pub permissions: Vec<Permission>,
}

/// UserAccess
///
/// Everything the permission resolver needs about one user, loaded in a single call.
#[derive(Debug, Clone)]
pub struct UserAccess {
    pub user: User,
    pub groups: Vec<Group>,
    pub direct_permissions: Vec<Permission>,
}

// --- Catalog ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

/// Book
///
/// A catalog entry joined with its author's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub author_id: i64,
    /// Loaded via a JOIN on `authors`.
    pub author: String,
    pub publication_year: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Library {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, FromRow)]
#[ts(export)]
pub struct Librarian {
    pub id: i64,
    pub name: String,
    pub library_id: i64,
}

/// LibraryDetail
///
/// A library with its holdings and (at most one) librarian.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LibraryDetail {
    pub id: i64,
    pub name: String,
    pub books: Vec<Book>,
    pub librarian: Option<Librarian>,
}

/// CleanBook
///
/// A book form that passed validation. The only shape the repository accepts for writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanBook {
    pub title: String,
    pub author: String,
    pub publication_year: i32,
}

// --- Request Payloads ---

/// BookForm
///
/// Input for create/edit. Every field is optional at the wire level so a missing or
/// mistyped value becomes a field error rather than a rejected request.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct BookForm {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Accepts a JSON number or a numeric string.
    #[serde(default)]
    #[ts(type = "number | string | null")]
    #[schema(value_type = Option<i32>)]
    pub publication_year: Option<serde_json::Value>,
}

impl From<&Book> for BookForm {
    fn from(book: &Book) -> Self {
        Self {
            title: Some(book.title.clone()),
            author: Some(book.author.clone()),
            publication_year: Some(serde_json::Value::from(book.publication_year)),
        }
    }
}

/// RegisterRequest
///
/// Input for POST /register. Field rules beyond length/email (allowed username characters,
/// password confirmation) are checked in `validation::clean_registration`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct RegisterRequest {
    #[validate(length(min = 1, max = 150, message = "Username must be between 1 and 150 characters."))]
    pub username: String,
    #[serde(default)]
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(min = 8, message = "This password is too short. It must contain at least 8 characters."))]
    pub password: String,
    pub password_confirm: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// ContactForm
///
/// Free-text message form. Name and message are sanitized, never rejected for markup.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct ContactForm {
    #[validate(length(min = 1, max = 100, message = "Name must be between 1 and 100 characters."))]
    pub name: String,
    #[validate(email(message = "Enter a valid email address."))]
    pub email: String,
    #[validate(length(min = 1, max = 1000, message = "Message must be between 1 and 1000 characters."))]
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AssignRoleRequest {
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct GrantPermissionsRequest {
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CreateLibraryRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AddLibraryBooksRequest {
    pub book_ids: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AssignLibrarianRequest {
    pub name: String,
}

// --- Responses ---

/// UserProfile
///
/// The caller's identity as seen by clients (GET /me, login, register).
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Option<Role>,
    pub groups: Vec<String>,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct LoginResponse {
    pub token: String,
    pub csrf_token: String,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

/// BookPage
///
/// One page of the book listing. `page` is the page actually served after clamping.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct BookPage {
    pub items: Vec<Book>,
    pub page: i64,
    pub total_pages: i64,
    pub total_items: i64,
    pub page_size: i64,
    pub search: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RolePage {
    pub role: Role,
    pub username: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ContactResponse {
    pub name: String,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ProvisionReport {
    pub created_groups: Vec<String>,
    pub created_users: Vec<String>,
}
