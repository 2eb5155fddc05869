use crate::{
    auth,
    error::{AppResult, RepoResult},
    models::{CleanBook, NewUser, ProvisionReport},
    permissions::{self, Permission, Role},
    repository::Repository,
};

/// Demo accounts created by `provision_sample_users`, one per role.
pub const SAMPLE_USERS: [(&str, Role); 3] = [
    ("viewer_user", Role::Member),
    ("editor_user", Role::Librarian),
    ("admin_user", Role::Admin),
];

pub const DEFAULT_SAMPLE_PASSWORD: &str = "password123";

const SAMPLE_BOOKS: [(&str, &str, i32); 3] = [
    ("Harry Potter and the Philosopher's Stone", "J.K. Rowling", 1997),
    ("1984", "George Orwell", 1949),
    ("Animal Farm", "George Orwell", 1945),
];
const SAMPLE_LIBRARY: &str = "Central Library";
const SAMPLE_LIBRARIAN: &str = "Alice Smith";

/// provision_groups
///
/// Ensures the four book permissions and the Viewers/Editors/Admins groups exist.
/// Every step is a get-or-create, so re-running changes nothing. An existing group keeps
/// whatever permissions it already has. Returns the names of groups created by this call.
pub async fn provision_groups(repo: &dyn Repository) -> RepoResult<Vec<String>> {
    repo.ensure_permissions(&Permission::ALL).await?;

    let mut created = Vec::new();
    for (name, perms) in permissions::group_definitions() {
        let (group, was_created) = repo.get_or_create_group(name, perms).await?;
        if was_created {
            tracing::info!(group = %group.name, "created permission group");
            created.push(group.name);
        } else {
            tracing::debug!(group = %group.name, "permission group already exists");
        }
    }
    Ok(created)
}

/// provision_sample_users
///
/// Creates the demo accounts that do not exist yet and gives each new one its role, which
/// also places it in the role's group. Returns the usernames created by this call.
pub async fn provision_sample_users(repo: &dyn Repository, password: &str) -> AppResult<Vec<String>> {
    let mut created = Vec::new();
    for (username, role) in SAMPLE_USERS {
        // Existing accounts keep whatever role an admin has since given them.
        if repo.get_user_by_username(username).await?.is_some() {
            continue;
        }
        let user = repo
            .create_user(NewUser {
                username: username.to_string(),
                email: format!("{username}@example.com"),
                password_hash: auth::hash_password(password)?,
                role: None,
            })
            .await?;
        repo.set_user_role(user.id, Some(role)).await?;
        created.push(user.username);
    }
    Ok(created)
}

/// Seeds two authors, three books, one library holding them and its librarian.
pub async fn provision_sample_catalog(repo: &dyn Repository) -> RepoResult<()> {
    let mut book_ids = Vec::with_capacity(SAMPLE_BOOKS.len());
    for (title, author, year) in SAMPLE_BOOKS {
        let book = match repo.find_book(title, author).await? {
            Some(book) => book,
            None => {
                repo.create_book(CleanBook {
                    title: title.to_string(),
                    author: author.to_string(),
                    publication_year: year,
                })
                .await?
            }
        };
        book_ids.push(book.id);
    }

    let library = match repo.find_library_by_name(SAMPLE_LIBRARY).await? {
        Some(library) => library,
        None => repo.create_library(SAMPLE_LIBRARY).await?,
    };
    repo.add_books_to_library(library.id, &book_ids).await?;

    let has_librarian = repo
        .get_library_detail(library.id)
        .await?
        .is_some_and(|detail| detail.librarian.is_some());
    if !has_librarian {
        repo.assign_librarian(library.id, SAMPLE_LIBRARIAN).await?;
    }

    tracing::info!(library = %library.name, books = book_ids.len(), "sample catalog ready");
    Ok(())
}

/// Runs every provisioning step in dependency order.
pub async fn provision_all(repo: &dyn Repository, sample_password: &str) -> AppResult<ProvisionReport> {
    let created_groups = provision_groups(repo).await?;
    let created_users = provision_sample_users(repo, sample_password).await?;
    provision_sample_catalog(repo).await?;

    Ok(ProvisionReport {
        created_groups,
        created_users,
    })
}
