use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::Repository;
use crate::{
    error::{RepoResult, RepositoryError},
    models::{Author, Book, CleanBook, Group, Library, LibraryDetail, Librarian, NewUser, User, UserAccess},
    permissions::{Permission, Role},
};

#[derive(Debug, Clone)]
struct StoredBook {
    title: String,
    author_id: i64,
    publication_year: i32,
}

#[derive(Default)]
struct State {
    users: BTreeMap<Uuid, User>,
    user_groups: BTreeMap<Uuid, BTreeSet<String>>,
    user_permissions: BTreeMap<Uuid, BTreeSet<Permission>>,
    permissions: BTreeSet<Permission>,
    groups: BTreeMap<String, BTreeSet<Permission>>,
    authors: BTreeMap<i64, Author>,
    books: BTreeMap<i64, StoredBook>,
    libraries: BTreeMap<i64, Library>,
    library_books: BTreeMap<i64, BTreeSet<i64>>,
    librarians: BTreeMap<i64, Librarian>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn group(&self, name: &str) -> Option<Group> {
        self.groups.get(name).map(|perms| Group {
            name: name.to_string(),
            permissions: perms.iter().copied().collect(),
        })
    }

    fn book(&self, id: i64) -> Option<Book> {
        let stored = self.books.get(&id)?;
        let author = self.authors.get(&stored.author_id)?;
        Some(Book {
            id,
            title: stored.title.clone(),
            author_id: stored.author_id,
            author: author.name.clone(),
            publication_year: stored.publication_year,
        })
    }

    fn matching_books(&self, search: Option<&str>) -> Vec<Book> {
        let needle = search.map(str::to_lowercase);
        let mut books: Vec<Book> = self
            .books
            .keys()
            .filter_map(|id| self.book(*id))
            .filter(|b| match &needle {
                Some(n) => b.title.to_lowercase().contains(n) || b.author.to_lowercase().contains(n),
                None => true,
            })
            .collect();
        books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        books
    }

    fn upsert_author(&mut self, name: &str) -> Author {
        if let Some(author) = self.authors.values().find(|a| a.name == name) {
            return author.clone();
        }
        let author = Author {
            id: self.next_id(),
            name: name.to_string(),
        };
        self.authors.insert(author.id, author.clone());
        author
    }
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. Used by the test suite and for running
/// the service without a database. One mutex guards all state, so every operation is atomic.
#[derive(Default)]
pub struct InMemoryRepository {
    state: Mutex<State>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let mut state = self.state.lock().await;
        if state.users.values().any(|u| u.username == user.username) {
            return Err(RepositoryError::Conflict(format!("Username '{}'", user.username)));
        }
        let created = User {
            id: Uuid::new_v4(),
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user.role,
            created_at: Utc::now(),
        };
        state.users.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        Ok(self.state.lock().await.users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.values().find(|u| u.username == username).cloned())
    }

    async fn get_user_access(&self, id: Uuid) -> RepoResult<Option<UserAccess>> {
        let state = self.state.lock().await;
        let Some(user) = state.users.get(&id).cloned() else {
            return Ok(None);
        };
        let groups = state
            .user_groups
            .get(&id)
            .map(|names| names.iter().filter_map(|n| state.group(n)).collect())
            .unwrap_or_default();
        let direct_permissions = state
            .user_permissions
            .get(&id)
            .map(|perms| perms.iter().copied().collect())
            .unwrap_or_default();
        Ok(Some(UserAccess {
            user,
            groups,
            direct_permissions,
        }))
    }

    async fn set_user_role(&self, id: Uuid, role: Option<Role>) -> RepoResult<Option<User>> {
        let mut state = self.state.lock().await;
        let Some(user) = state.users.get_mut(&id) else {
            return Ok(None);
        };
        user.role = role;
        let updated = user.clone();

        let target = role
            .map(|r| r.group_name())
            .filter(|name| state.groups.contains_key(*name))
            .map(str::to_string);
        let memberships = state.user_groups.entry(id).or_default();
        for r in Role::ALL {
            memberships.remove(r.group_name());
        }
        if let Some(group) = target {
            memberships.insert(group);
        } else if let Some(role) = role {
            tracing::warn!(
                group = role.group_name(),
                "role group missing; run provisioning to grant role permissions"
            );
        }
        Ok(Some(updated))
    }

    async fn grant_user_permissions(&self, user_id: Uuid, permissions: &[Permission]) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Err(RepositoryError::NotFound("User".to_string()));
        }
        state.permissions.extend(permissions.iter().copied());
        state
            .user_permissions
            .entry(user_id)
            .or_default()
            .extend(permissions.iter().copied());
        Ok(())
    }

    async fn ensure_permissions(&self, permissions: &[Permission]) -> RepoResult<()> {
        self.state
            .lock()
            .await
            .permissions
            .extend(permissions.iter().copied());
        Ok(())
    }

    async fn get_or_create_group(&self, name: &str, permissions: &[Permission]) -> RepoResult<(Group, bool)> {
        let mut state = self.state.lock().await;
        let created = !state.groups.contains_key(name);
        if created {
            state.permissions.extend(permissions.iter().copied());
            state
                .groups
                .insert(name.to_string(), permissions.iter().copied().collect());
        }
        let group = state
            .group(name)
            .ok_or_else(|| RepositoryError::NotFound(format!("Group '{name}'")))?;
        Ok((group, created))
    }

    async fn list_groups(&self) -> RepoResult<Vec<Group>> {
        let state = self.state.lock().await;
        Ok(state.groups.keys().filter_map(|n| state.group(n)).collect())
    }

    async fn get_or_create_author(&self, name: &str) -> RepoResult<Author> {
        Ok(self.state.lock().await.upsert_author(name))
    }

    async fn get_author(&self, id: i64) -> RepoResult<Option<Author>> {
        Ok(self.state.lock().await.authors.get(&id).cloned())
    }

    async fn books_by_author(&self, author_id: i64) -> RepoResult<Vec<Book>> {
        let state = self.state.lock().await;
        Ok(state
            .matching_books(None)
            .into_iter()
            .filter(|b| b.author_id == author_id)
            .collect())
    }

    async fn count_books(&self, search: Option<&str>) -> RepoResult<i64> {
        let state = self.state.lock().await;
        Ok(state.matching_books(search).len() as i64)
    }

    async fn search_books(&self, search: Option<&str>, limit: i64, offset: i64) -> RepoResult<Vec<Book>> {
        let state = self.state.lock().await;
        Ok(state
            .matching_books(search)
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn get_book(&self, id: i64) -> RepoResult<Option<Book>> {
        Ok(self.state.lock().await.book(id))
    }

    async fn find_book(&self, title: &str, author: &str) -> RepoResult<Option<Book>> {
        let state = self.state.lock().await;
        Ok(state
            .matching_books(None)
            .into_iter()
            .find(|b| b.title == title && b.author == author))
    }

    async fn create_book(&self, book: CleanBook) -> RepoResult<Book> {
        let mut state = self.state.lock().await;
        let author = state.upsert_author(&book.author);
        let id = state.next_id();
        state.books.insert(
            id,
            StoredBook {
                title: book.title,
                author_id: author.id,
                publication_year: book.publication_year,
            },
        );
        state
            .book(id)
            .ok_or_else(|| RepositoryError::Corrupt(format!("book {id} vanished after insert")))
    }

    async fn update_book(&self, id: i64, book: CleanBook) -> RepoResult<Option<Book>> {
        let mut state = self.state.lock().await;
        if !state.books.contains_key(&id) {
            return Ok(None);
        }
        let author = state.upsert_author(&book.author);
        state.books.insert(
            id,
            StoredBook {
                title: book.title,
                author_id: author.id,
                publication_year: book.publication_year,
            },
        );
        Ok(state.book(id))
    }

    async fn delete_book(&self, id: i64) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.books.remove(&id).is_some();
        if removed {
            for holdings in state.library_books.values_mut() {
                holdings.remove(&id);
            }
        }
        Ok(removed)
    }

    async fn create_library(&self, name: &str) -> RepoResult<Library> {
        let mut state = self.state.lock().await;
        if state.libraries.values().any(|l| l.name == name) {
            return Err(RepositoryError::Conflict(format!("Library '{name}'")));
        }
        let library = Library {
            id: state.next_id(),
            name: name.to_string(),
        };
        state.libraries.insert(library.id, library.clone());
        Ok(library)
    }

    async fn find_library_by_name(&self, name: &str) -> RepoResult<Option<Library>> {
        let state = self.state.lock().await;
        Ok(state.libraries.values().find(|l| l.name == name).cloned())
    }

    async fn get_library_detail(&self, id: i64) -> RepoResult<Option<LibraryDetail>> {
        let state = self.state.lock().await;
        let Some(library) = state.libraries.get(&id) else {
            return Ok(None);
        };
        let holdings = state.library_books.get(&id);
        let books = state
            .matching_books(None)
            .into_iter()
            .filter(|b| holdings.map(|h| h.contains(&b.id)).unwrap_or(false))
            .collect();
        Ok(Some(LibraryDetail {
            id,
            name: library.name.clone(),
            books,
            librarian: state.librarians.get(&id).cloned(),
        }))
    }

    async fn add_books_to_library(&self, library_id: i64, book_ids: &[i64]) -> RepoResult<()> {
        let mut state = self.state.lock().await;
        if !state.libraries.contains_key(&library_id) {
            return Err(RepositoryError::NotFound("Library".to_string()));
        }
        if let Some(missing) = book_ids.iter().find(|id| !state.books.contains_key(*id)) {
            return Err(RepositoryError::NotFound(format!("Book {missing}")));
        }
        state
            .library_books
            .entry(library_id)
            .or_default()
            .extend(book_ids.iter().copied());
        Ok(())
    }

    async fn assign_librarian(&self, library_id: i64, name: &str) -> RepoResult<Librarian> {
        let mut state = self.state.lock().await;
        if !state.libraries.contains_key(&library_id) {
            return Err(RepositoryError::NotFound("Library".to_string()));
        }
        if state.librarians.contains_key(&library_id) {
            return Err(RepositoryError::Conflict(format!(
                "A librarian for library {library_id}"
            )));
        }
        let librarian = Librarian {
            id: state.next_id(),
            name: name.to_string(),
            library_id,
        };
        state.librarians.insert(library_id, librarian.clone());
        Ok(librarian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(title: &str, author: &str, year: i32) -> CleanBook {
        CleanBook {
            title: title.to_string(),
            author: author.to_string(),
            publication_year: year,
        }
    }

    #[tokio::test]
    async fn books_share_an_author_by_name() {
        let repo = InMemoryRepository::new();
        let a = repo.create_book(clean("1984", "George Orwell", 1949)).await.unwrap();
        let b = repo.create_book(clean("Animal Farm", "George Orwell", 1945)).await.unwrap();

        assert_eq!(a.author_id, b.author_id);
        assert_eq!(repo.books_by_author(a.author_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn search_matches_title_or_author_case_insensitively() {
        let repo = InMemoryRepository::new();
        repo.create_book(clean("Dune", "Frank Herbert", 1965)).await.unwrap();
        repo.create_book(clean("Emma", "Jane Austen", 1815)).await.unwrap();

        assert_eq!(repo.count_books(Some("dune")).await.unwrap(), 1);
        assert_eq!(repo.count_books(Some("AUSTEN")).await.unwrap(), 1);
        assert_eq!(repo.count_books(Some("'; DROP TABLE books; --")).await.unwrap(), 0);
        assert_eq!(repo.count_books(None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn update_of_missing_book_creates_no_author() {
        let repo = InMemoryRepository::new();
        assert!(repo.update_book(42, clean("Ghost", "Nobody Here", 2000)).await.unwrap().is_none());
        assert!(repo.state.lock().await.authors.is_empty());
    }

    #[tokio::test]
    async fn adding_unknown_book_to_library_adds_nothing() {
        let repo = InMemoryRepository::new();
        let book = repo.create_book(clean("Dune", "Frank Herbert", 1965)).await.unwrap();
        let library = repo.create_library("Central Library").await.unwrap();

        let err = repo.add_books_to_library(library.id, &[book.id, 9999]).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
        let detail = repo.get_library_detail(library.id).await.unwrap().unwrap();
        assert!(detail.books.is_empty());
    }

    #[tokio::test]
    async fn library_has_at_most_one_librarian() {
        let repo = InMemoryRepository::new();
        let library = repo.create_library("Central Library").await.unwrap();
        repo.assign_librarian(library.id, "Alice Smith").await.unwrap();

        let err = repo.assign_librarian(library.id, "Bob").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }
}
