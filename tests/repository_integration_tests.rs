//! Runs against a real Postgres. Ignored by default:
//! `DATABASE_URL=... cargo test -- --ignored`

use library_catalog::{
    error::RepositoryError,
    models::{CleanBook, NewUser},
    permissions::{Permission, Role},
    provisioning,
    repository::{PostgresRepository, Repository},
};
use sqlx::PgPool;
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Self {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set to run integration tests");

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .expect("Failed to run database migrations.");

        DbTestContext { pool }
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

/// Unique suffix so repeated runs against one database never collide.
fn unique(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

fn book(title: &str, author: &str, year: i32) -> CleanBook {
    CleanBook {
        title: title.to_string(),
        author: author.to_string(),
        publication_year: year,
    }
}

// --- Tests ---

#[tokio::test]
#[ignore]
async fn test_provisioning_is_idempotent() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();

    provisioning::provision_groups(&repo).await.unwrap();
    let before = repo.list_groups().await.unwrap();
    let created = provisioning::provision_groups(&repo).await.unwrap();

    assert!(created.is_empty());
    assert_eq!(repo.list_groups().await.unwrap(), before);

    let admins = before.iter().find(|g| g.name == "Admins").unwrap();
    assert_eq!(admins.permissions, Permission::ALL.to_vec());
}

#[tokio::test]
#[ignore]
async fn test_role_assignment_moves_group_membership() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    provisioning::provision_groups(&repo).await.unwrap();

    let user = repo
        .create_user(NewUser {
            username: unique("user"),
            email: "user@example.com".to_string(),
            password_hash: "unused".to_string(),
            role: None,
        })
        .await
        .unwrap();

    repo.set_user_role(user.id, Some(Role::Member)).await.unwrap();
    repo.set_user_role(user.id, Some(Role::Librarian)).await.unwrap();
    repo.grant_user_permissions(user.id, &[Permission::BookDelete])
        .await
        .unwrap();

    let access = repo.get_user_access(user.id).await.unwrap().unwrap();
    assert_eq!(access.user.role, Some(Role::Librarian));
    let names: Vec<_> = access.groups.iter().map(|g| g.name.as_str()).collect();
    assert_eq!(names, vec!["Editors"]);
    assert_eq!(access.direct_permissions, vec![Permission::BookDelete]);

    let duplicate = repo
        .create_user(NewUser {
            username: user.username.clone(),
            email: String::new(),
            password_hash: "unused".to_string(),
            role: None,
        })
        .await;
    assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
}

#[tokio::test]
#[ignore]
async fn test_book_crud_and_search_with_hostile_input() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();
    let marker = unique("Marker");

    let created = repo
        .create_book(book(&format!("{marker} Tale"), "Some Author", 1999))
        .await
        .unwrap();
    assert_eq!(created.author, "Some Author");

    let hits = repo.search_books(Some(&marker.to_lowercase()), 10, 0).await.unwrap();
    assert_eq!(hits.len(), 1);

    let hostile = "'; DROP TABLE books; --";
    assert_eq!(repo.count_books(Some(hostile)).await.unwrap(), 0);
    assert_eq!(repo.count_books(Some("100%")).await.unwrap(), 0);

    let updated = repo
        .update_book(created.id, book(&format!("{marker} Sequel"), "Other Author", 2001))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.publication_year, 2001);
    assert!(repo.update_book(-1, book("Nothing", "Nobody", 2000)).await.unwrap().is_none());

    assert!(repo.delete_book(created.id).await.unwrap());
    assert!(!repo.delete_book(created.id).await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_check_constraint_rejects_out_of_range_year() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();

    let result = repo
        .create_book(book(&unique("Bad Year"), "Some Author", 999))
        .await;
    assert!(matches!(result, Err(RepositoryError::Database(_))));
}

#[tokio::test]
#[ignore]
async fn test_library_relations() {
    let ctx = DbTestContext::setup().await;
    let repo = ctx.repository();

    let library = repo.create_library(&unique("Branch")).await.unwrap();
    assert!(matches!(
        repo.create_library(&library.name).await,
        Err(RepositoryError::Conflict(_))
    ));

    let stocked = repo
        .create_book(book(&unique("Stocked"), "Some Author", 2010))
        .await
        .unwrap();
    assert!(matches!(
        repo.add_books_to_library(library.id, &[stocked.id, -1]).await,
        Err(RepositoryError::NotFound(_))
    ));
    repo.add_books_to_library(library.id, &[stocked.id, stocked.id])
        .await
        .unwrap();

    repo.assign_librarian(library.id, "Alice Smith").await.unwrap();
    assert!(matches!(
        repo.assign_librarian(library.id, "Bob").await,
        Err(RepositoryError::Conflict(_))
    ));

    let detail = repo.get_library_detail(library.id).await.unwrap().unwrap();
    assert_eq!(detail.books.len(), 1);
    assert_eq!(detail.librarian.map(|l| l.name), Some("Alice Smith".to_string()));
}
