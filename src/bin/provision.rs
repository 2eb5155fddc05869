use library_catalog::{
    config::AppConfig,
    provisioning::{self, DEFAULT_SAMPLE_PASSWORD},
    repository::PostgresRepository,
};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// provision
///
/// One-shot setup: applies migrations, then creates the permission groups, the sample
/// users and the sample catalog. Safe to run any number of times.
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let config = AppConfig::load();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "library_catalog=info,provision=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("FATAL: Failed to apply database migrations.");

    let password = std::env::var("SAMPLE_USER_PASSWORD")
        .unwrap_or_else(|_| DEFAULT_SAMPLE_PASSWORD.to_string());
    let repo = PostgresRepository::new(pool);

    match provisioning::provision_all(&repo, &password).await {
        Ok(report) => tracing::info!(
            created_groups = ?report.created_groups,
            created_users = ?report.created_users,
            "provisioning complete"
        ),
        Err(e) => {
            tracing::error!(error = %e, "provisioning failed");
            std::process::exit(1);
        }
    }
}
