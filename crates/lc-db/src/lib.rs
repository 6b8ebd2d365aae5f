// crates/lc-db/src/lib.rs
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod store;

pub use store::{IdentifierSource, LinkStore, OwnerResolver, WorksetCandidateKind};

mod pg;
pub use pg::{PgIdentifierSource, PgLinkStore, PgOwnerResolver};

#[cfg(feature = "testkit")]
pub mod mem;

/// Checker-owned database (link_rows table).
pub const ENV_DB_URL: &str = "LINKCHECK_DATABASE_URL";
/// Read replica of the identifier service's database.
pub const ENV_SOURCE_DB_URL: &str = "LINKCHECK_SOURCE_DATABASE_URL";

/// Connect to the checker's own Postgres using LINKCHECK_DATABASE_URL.
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .context("failed to connect to checker Postgres")?;

    Ok(pool)
}

/// Connect to the identifier-service replica using LINKCHECK_SOURCE_DATABASE_URL.
pub async fn connect_source_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_SOURCE_DB_URL)
        .with_context(|| format!("missing env var {ENV_SOURCE_DB_URL}"))?;

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .context("failed to connect to identifier-store replica")?;

    Ok(pool)
}

/// Run embedded SQLx migrations against the checker's own database.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Simple status query (connectivity + schema presence).
pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as::<_, (i32,)>("select 1")
        .fetch_one(pool)
        .await
        .context("status connectivity query failed")?;
    let ok = one == 1;

    let (exists,): (bool,) = sqlx::query_as::<_, (bool,)>(
        r#"
        select exists (
            select 1
            from information_schema.tables
            where table_schema='public' and table_name='link_rows'
        )
        "#,
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;

    Ok(DbStatus {
        ok,
        has_link_rows_table: exists,
    })
}

#[derive(Debug, Clone)]
pub struct DbStatus {
    pub ok: bool,
    pub has_link_rows_table: bool,
}
