use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, query_builder::QueryBuilder};
use uuid::Uuid;

use super::{Repository, contains_pattern};
use crate::{
    error::{RepoResult, RepositoryError},
    models::{Author, Book, CleanBook, Group, Library, LibraryDetail, Librarian, NewUser, User, UserAccess},
    permissions::{Permission, Role},
};

const BOOK_SELECT: &str = r#"
    SELECT b.id, b.title, b.author_id, a.name AS author, b.publication_year
    FROM books b
    JOIN authors a ON a.id = b.author_id
"#;

const USER_COLUMNS: &str = "id, username, email, password_hash, role, created_at";

/// UserRow
///
/// Raw `users` row. `role` is stored as TEXT and parsed into `Role` on the way out.
#[derive(FromRow)]
struct UserRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    role: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = RepositoryError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .as_deref()
            .map(str::parse::<Role>)
            .transpose()
            .map_err(RepositoryError::Corrupt)?;
        Ok(User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            role,
            created_at: row.created_at,
        })
    }
}

fn parse_permission(codename: &str) -> RepoResult<Permission> {
    codename.parse::<Permission>().map_err(RepositoryError::Corrupt)
}

/// Folds `(group name, permission codename)` rows, already ordered by name, into groups.
fn fold_groups(rows: Vec<(String, Option<String>)>) -> RepoResult<Vec<Group>> {
    let mut groups: Vec<Group> = Vec::new();
    for (name, codename) in rows {
        if groups.last().map(|g| g.name != name).unwrap_or(true) {
            groups.push(Group {
                name,
                permissions: Vec::new(),
            });
        }
        if let (Some(codename), Some(group)) = (codename, groups.last_mut()) {
            group.permissions.push(parse_permission(&codename)?);
        }
    }
    for group in &mut groups {
        group.permissions.sort();
    }
    Ok(groups)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_foreign_key_violation())
        .unwrap_or(false)
}

async fn insert_permissions(conn: &mut PgConnection, permissions: &[Permission]) -> Result<(), sqlx::Error> {
    for perm in permissions {
        sqlx::query(
            "INSERT INTO permissions (codename, resource, action) VALUES ($1, $2, $3) ON CONFLICT (codename) DO NOTHING",
        )
        .bind(perm.codename())
        .bind(perm.resource())
        .bind(perm.action())
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Get-or-create keyed by name. `DO UPDATE` is a no-op write so `RETURNING` always yields the row.
async fn upsert_author(conn: &mut PgConnection, name: &str) -> Result<Author, sqlx::Error> {
    sqlx::query_as::<_, Author>(
        "INSERT INTO authors (name) VALUES ($1) ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name RETURNING id, name",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
}

async fn group_permissions(conn: &mut PgConnection, group_id: i64) -> RepoResult<Vec<Permission>> {
    let codes = sqlx::query_scalar::<_, String>(
        "SELECT permission FROM group_permissions WHERE group_id = $1",
    )
    .bind(group_id)
    .fetch_all(&mut *conn)
    .await?;
    let mut perms = codes
        .iter()
        .map(|c| parse_permission(c))
        .collect::<RepoResult<Vec<_>>>()?;
    perms.sort();
    Ok(perms)
}

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by PostgreSQL.
/// All user input reaches SQL through bound parameters only.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn push_search(builder: &mut QueryBuilder<'_, Postgres>, search: Option<&str>) {
        if let Some(term) = search {
            let pattern = contains_pattern(term);
            builder.push(" WHERE (b.title ILIKE ");
            builder.push_bind(pattern.clone());
            builder.push(" OR a.name ILIKE ");
            builder.push_bind(pattern);
            builder.push(")");
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- USERS ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash, role, created_at) VALUES ($1, $2, $3, $4, $5, NOW()) RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(Uuid::new_v4())
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.role.map(|r| r.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict(format!("Username '{}'", user.username))
                } else {
                    e.into()
                }
            })?;
        row.try_into()
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, UserRow>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    /// get_user_access
    ///
    /// Three reads: the user, their groups with each group's permissions, their direct grants.
    async fn get_user_access(&self, id: Uuid) -> RepoResult<Option<UserAccess>> {
        let Some(user) = self.get_user(id).await? else {
            return Ok(None);
        };

        let group_rows = sqlx::query_as::<_, (String, Option<String>)>(
            r#"
            SELECT g.name, gp.permission
            FROM user_groups ug
            JOIN groups g ON g.id = ug.group_id
            LEFT JOIN group_permissions gp ON gp.group_id = g.id
            WHERE ug.user_id = $1
            ORDER BY g.name
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let direct = sqlx::query_scalar::<_, String>(
            "SELECT permission FROM user_permissions WHERE user_id = $1 ORDER BY permission",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        Ok(Some(UserAccess {
            user,
            groups: fold_groups(group_rows)?,
            direct_permissions: direct
                .iter()
                .map(|c| parse_permission(c))
                .collect::<RepoResult<Vec<_>>>()?,
        }))
    }

    /// set_user_role
    ///
    /// Role column and role-group membership change in the same transaction.
    async fn set_user_role(&self, id: Uuid, role: Option<Role>) -> RepoResult<Option<User>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("UPDATE users SET role = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let Some(row) = sqlx::query_as::<_, UserRow>(&sql)
            .bind(id)
            .bind(role.map(|r| r.as_str()))
            .fetch_optional(&mut *tx)
            .await?
        else {
            return Ok(None);
        };

        let role_groups: Vec<String> = Role::ALL
            .iter()
            .map(|r| r.group_name().to_string())
            .collect();
        sqlx::query(
            "DELETE FROM user_groups WHERE user_id = $1 AND group_id IN (SELECT id FROM groups WHERE name = ANY($2))",
        )
        .bind(id)
        .bind(role_groups)
        .execute(&mut *tx)
        .await?;

        if let Some(role) = role {
            let inserted = sqlx::query(
                "INSERT INTO user_groups (user_id, group_id) SELECT $1, id FROM groups WHERE name = $2 ON CONFLICT DO NOTHING",
            )
            .bind(id)
            .bind(role.group_name())
            .execute(&mut *tx)
            .await?;
            if inserted.rows_affected() == 0 {
                tracing::warn!(
                    group = role.group_name(),
                    "role group missing; run provisioning to grant role permissions"
                );
            }
        }

        tx.commit().await?;
        Ok(Some(row.try_into()?))
    }

    async fn grant_user_permissions(&self, user_id: Uuid, permissions: &[Permission]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i32>("SELECT 1 FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound("User".to_string()));
        }

        insert_permissions(&mut tx, permissions).await?;
        for perm in permissions {
            sqlx::query(
                "INSERT INTO user_permissions (user_id, permission) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(perm.codename())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    // --- GROUPS & PERMISSIONS ---

    async fn ensure_permissions(&self, permissions: &[Permission]) -> RepoResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_permissions(&mut conn, permissions).await?;
        Ok(())
    }

    /// get_or_create_group
    ///
    /// `ON CONFLICT DO NOTHING RETURNING` yields a row only when this call created the group,
    /// which is exactly when permissions get attached.
    async fn get_or_create_group(&self, name: &str, permissions: &[Permission]) -> RepoResult<(Group, bool)> {
        let mut tx = self.pool.begin().await?;

        let created_id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO groups (name) VALUES ($1) ON CONFLICT (name) DO NOTHING RETURNING id",
        )
        .bind(name)
        .fetch_optional(&mut *tx)
        .await?;

        let (group_id, created) = match created_id {
            Some(id) => {
                insert_permissions(&mut tx, permissions).await?;
                for perm in permissions {
                    sqlx::query(
                        "INSERT INTO group_permissions (group_id, permission) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                    )
                    .bind(id)
                    .bind(perm.codename())
                    .execute(&mut *tx)
                    .await?;
                }
                (id, true)
            }
            None => {
                let id = sqlx::query_scalar::<_, i64>("SELECT id FROM groups WHERE name = $1")
                    .bind(name)
                    .fetch_one(&mut *tx)
                    .await?;
                (id, false)
            }
        };

        let permissions = group_permissions(&mut tx, group_id).await?;
        tx.commit().await?;

        Ok((
            Group {
                name: name.to_string(),
                permissions,
            },
            created,
        ))
    }

    async fn list_groups(&self) -> RepoResult<Vec<Group>> {
        let rows = sqlx::query_as::<_, (String, Option<String>)>(
            r#"
            SELECT g.name, gp.permission
            FROM groups g
            LEFT JOIN group_permissions gp ON gp.group_id = g.id
            ORDER BY g.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        fold_groups(rows)
    }

    // --- AUTHORS ---

    async fn get_or_create_author(&self, name: &str) -> RepoResult<Author> {
        let mut conn = self.pool.acquire().await?;
        Ok(upsert_author(&mut conn, name).await?)
    }

    async fn get_author(&self, id: i64) -> RepoResult<Option<Author>> {
        Ok(sqlx::query_as::<_, Author>("SELECT id, name FROM authors WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn books_by_author(&self, author_id: i64) -> RepoResult<Vec<Book>> {
        let sql = format!("{BOOK_SELECT} WHERE b.author_id = $1 ORDER BY b.title, b.id");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(author_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // --- BOOKS ---

    async fn count_books(&self, search: Option<&str>) -> RepoResult<i64> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "SELECT COUNT(*) FROM books b JOIN authors a ON a.id = b.author_id",
        );
        Self::push_search(&mut builder, search);
        Ok(builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?)
    }

    /// search_books
    ///
    /// QueryBuilder keeps the search term a bound parameter; LIKE wildcards in the term
    /// are escaped so they match literally.
    async fn search_books(&self, search: Option<&str>, limit: i64, offset: i64) -> RepoResult<Vec<Book>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(BOOK_SELECT);
        Self::push_search(&mut builder, search);
        builder.push(" ORDER BY b.title, b.id LIMIT ");
        builder.push_bind(limit);
        builder.push(" OFFSET ");
        builder.push_bind(offset);

        Ok(builder
            .build_query_as::<Book>()
            .fetch_all(&self.pool)
            .await?)
    }

    async fn get_book(&self, id: i64) -> RepoResult<Option<Book>> {
        let sql = format!("{BOOK_SELECT} WHERE b.id = $1");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_book(&self, title: &str, author: &str) -> RepoResult<Option<Book>> {
        let sql = format!("{BOOK_SELECT} WHERE b.title = $1 AND a.name = $2 ORDER BY b.id LIMIT 1");
        Ok(sqlx::query_as::<_, Book>(&sql)
            .bind(title)
            .bind(author)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn create_book(&self, book: CleanBook) -> RepoResult<Book> {
        let mut tx = self.pool.begin().await?;

        let author = upsert_author(&mut tx, &book.author).await?;
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO books (title, author_id, publication_year) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(&book.title)
        .bind(author.id)
        .bind(book.publication_year)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Book {
            id,
            title: book.title,
            author_id: author.id,
            author: author.name,
            publication_year: book.publication_year,
        })
    }

    /// update_book
    ///
    /// A missing book rolls the transaction back, so the author upsert never lands on its own.
    async fn update_book(&self, id: i64, book: CleanBook) -> RepoResult<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        let author = upsert_author(&mut tx, &book.author).await?;
        let updated = sqlx::query_scalar::<_, i64>(
            "UPDATE books SET title = $2, author_id = $3, publication_year = $4 WHERE id = $1 RETURNING id",
        )
        .bind(id)
        .bind(&book.title)
        .bind(author.id)
        .bind(book.publication_year)
        .fetch_optional(&mut *tx)
        .await?;

        if updated.is_none() {
            return Ok(None);
        }

        tx.commit().await?;
        Ok(Some(Book {
            id,
            title: book.title,
            author_id: author.id,
            author: author.name,
            publication_year: book.publication_year,
        }))
    }

    async fn delete_book(&self, id: i64) -> RepoResult<bool> {
        let result = sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- LIBRARIES ---

    async fn create_library(&self, name: &str) -> RepoResult<Library> {
        sqlx::query_as::<_, Library>("INSERT INTO libraries (name) VALUES ($1) RETURNING id, name")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    RepositoryError::Conflict(format!("Library '{name}'"))
                } else {
                    e.into()
                }
            })
    }

    async fn find_library_by_name(&self, name: &str) -> RepoResult<Option<Library>> {
        Ok(sqlx::query_as::<_, Library>("SELECT id, name FROM libraries WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_library_detail(&self, id: i64) -> RepoResult<Option<LibraryDetail>> {
        let Some(library) = sqlx::query_as::<_, Library>("SELECT id, name FROM libraries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        else {
            return Ok(None);
        };

        let sql = format!(
            "{BOOK_SELECT} JOIN library_books lb ON lb.book_id = b.id WHERE lb.library_id = $1 ORDER BY b.title, b.id"
        );
        let books = sqlx::query_as::<_, Book>(&sql)
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

        let librarian = sqlx::query_as::<_, Librarian>(
            "SELECT id, name, library_id FROM librarians WHERE library_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(Some(LibraryDetail {
            id: library.id,
            name: library.name,
            books,
            librarian,
        }))
    }

    async fn add_books_to_library(&self, library_id: i64, book_ids: &[i64]) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query_scalar::<_, i64>("SELECT id FROM libraries WHERE id = $1")
            .bind(library_id)
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound("Library".to_string()));
        }

        for book_id in book_ids {
            sqlx::query(
                "INSERT INTO library_books (library_id, book_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            )
            .bind(library_id)
            .bind(*book_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    RepositoryError::NotFound(format!("Book {book_id}"))
                } else {
                    e.into()
                }
            })?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn assign_librarian(&self, library_id: i64, name: &str) -> RepoResult<Librarian> {
        sqlx::query_as::<_, Librarian>(
            "INSERT INTO librarians (name, library_id) VALUES ($1, $2) RETURNING id, name, library_id",
        )
        .bind(name)
        .bind(library_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RepositoryError::Conflict(format!("A librarian for library {library_id}"))
            } else if is_foreign_key_violation(&e) {
                RepositoryError::NotFound("Library".to_string())
            } else {
                e.into()
            }
        })
    }
}
