use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    error::RepoResult,
    models::{Author, Book, CleanBook, Group, Library, LibraryDetail, Librarian, NewUser, User, UserAccess},
    permissions::{Permission, Role},
};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;

/// Repository Trait
///
/// The persistence contract used by handlers, the auth extractor and provisioning.
/// Every write is atomic: either the whole operation commits or nothing changes.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across Axum tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Fails with `Conflict` when the username is taken.
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>>;
    /// User plus groups and direct grants, for permission resolution.
    async fn get_user_access(&self, id: Uuid) -> RepoResult<Option<UserAccess>>;
    /// Sets the role and moves the user into that role's group (out of the others).
    /// Returns `None` for an unknown user.
    async fn set_user_role(&self, id: Uuid, role: Option<Role>) -> RepoResult<Option<User>>;
    /// Idempotent. `NotFound` for an unknown user.
    async fn grant_user_permissions(&self, user_id: Uuid, permissions: &[Permission]) -> RepoResult<()>;

    // --- Groups & Permissions ---
    /// Get-or-create each permission row.
    async fn ensure_permissions(&self, permissions: &[Permission]) -> RepoResult<()>;
    /// Get-or-create keyed by name. Permissions are attached only when the group is
    /// created; an existing group is returned untouched. The flag reports creation.
    async fn get_or_create_group(&self, name: &str, permissions: &[Permission]) -> RepoResult<(Group, bool)>;
    async fn list_groups(&self) -> RepoResult<Vec<Group>>;

    // --- Authors ---
    async fn get_or_create_author(&self, name: &str) -> RepoResult<Author>;
    async fn get_author(&self, id: i64) -> RepoResult<Option<Author>>;
    async fn books_by_author(&self, author_id: i64) -> RepoResult<Vec<Book>>;

    // --- Books ---
    /// Number of books matching the optional case-insensitive search on title or author.
    async fn count_books(&self, search: Option<&str>) -> RepoResult<i64>;
    /// One page of matching books ordered by title, then id.
    async fn search_books(&self, search: Option<&str>, limit: i64, offset: i64) -> RepoResult<Vec<Book>>;
    async fn get_book(&self, id: i64) -> RepoResult<Option<Book>>;
    async fn find_book(&self, title: &str, author: &str) -> RepoResult<Option<Book>>;
    /// Resolves (or creates) the author and inserts the book in one transaction.
    async fn create_book(&self, book: CleanBook) -> RepoResult<Book>;
    /// `None` when the book does not exist.
    async fn update_book(&self, id: i64, book: CleanBook) -> RepoResult<Option<Book>>;
    async fn delete_book(&self, id: i64) -> RepoResult<bool>;

    // --- Libraries ---
    /// Fails with `Conflict` when the name is taken.
    async fn create_library(&self, name: &str) -> RepoResult<Library>;
    async fn find_library_by_name(&self, name: &str) -> RepoResult<Option<Library>>;
    async fn get_library_detail(&self, id: i64) -> RepoResult<Option<LibraryDetail>>;
    /// Idempotent per book. `NotFound` for an unknown library or book; nothing is added then.
    async fn add_books_to_library(&self, library_id: i64, book_ids: &[i64]) -> RepoResult<()>;
    /// `NotFound` for an unknown library, `Conflict` if it already has a librarian.
    async fn assign_librarian(&self, library_id: i64, name: &str) -> RepoResult<Librarian>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer held in `AppState`.
pub type RepositoryState = Arc<dyn Repository>;

/// Builds an ILIKE pattern matching `term` literally anywhere in the column.
pub(crate) fn contains_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Normalizes a raw search string: trimmed, `None` when blank.
pub fn normalize_search(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
