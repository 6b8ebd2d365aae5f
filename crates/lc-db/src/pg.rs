//! Postgres implementations of the store traits.
//!
//! Row encode/decode goes through plain tuples + serde_json for the history
//! column; no derived FromRow so the mapping stays explicit.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use lc_schemas::{LinkRow, LinkVerdict, SourceRow, VerdictEntry};

use crate::store::{IdentifierSource, LinkStore, OwnerResolver, WorksetCandidateKind};

type LinkRowTuple = (String, String, String, i64, String, serde_json::Value);

fn decode_link_row(t: LinkRowTuple) -> Result<LinkRow> {
    let (identifier, owner_id, target, last_check_time, verdict, history) = t;
    let verdict = LinkVerdict::parse(&verdict)
        .ok_or_else(|| anyhow!("unknown verdict '{verdict}' for identifier {identifier}"))?;
    let history: Vec<VerdictEntry> =
        serde_json::from_value(history).context("history jsonb decode failed")?;
    Ok(LinkRow {
        identifier,
        owner_id,
        target,
        last_check_time,
        verdict,
        history,
    })
}

const LINK_ROW_COLUMNS: &str = "identifier, owner_id, target, last_check_time, verdict, history";

// ---------------------------------------------------------------------------
// PgLinkStore
// ---------------------------------------------------------------------------

/// Checker row table over the checker-owned pool.
#[derive(Clone)]
pub struct PgLinkStore {
    pool: PgPool,
}

impl PgLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LinkStore for PgLinkStore {
    async fn scan_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<LinkRow>> {
        let rows: Vec<LinkRowTuple> = sqlx::query_as(&format!(
            r#"
            select {LINK_ROW_COLUMNS}
            from link_rows
            where ($1::text is null or identifier > $1)
            order by identifier asc
            limit $2
            "#
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("link_rows scan page failed")?;

        rows.into_iter().map(decode_link_row).collect()
    }

    async fn owners(&self) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("select distinct owner_id from link_rows order by owner_id asc")
                .fetch_all(&self.pool)
                .await
                .context("link_rows owners query failed")?;
        Ok(rows.into_iter().map(|(o,)| o).collect())
    }

    async fn workset_candidates(
        &self,
        owner_id: &str,
        kind: WorksetCandidateKind,
        checked_before: i64,
        limit: i64,
    ) -> Result<Vec<LinkRow>> {
        let want_bad = matches!(kind, WorksetCandidateKind::Bad);
        let rows: Vec<LinkRowTuple> = sqlx::query_as(&format!(
            r#"
            select {LINK_ROW_COLUMNS}
            from link_rows
            where owner_id = $1
              and (case when $2 then verdict = 'BAD' else verdict <> 'BAD' end)
              and last_check_time < $3
            order by last_check_time asc, identifier asc
            limit $4
            "#
        ))
        .bind(owner_id)
        .bind(want_bad)
        .bind(checked_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("link_rows workset-candidates query failed")?;

        rows.into_iter().map(decode_link_row).collect()
    }

    async fn get_row(&self, identifier: &str) -> Result<Option<LinkRow>> {
        let row: Option<LinkRowTuple> = sqlx::query_as(&format!(
            "select {LINK_ROW_COLUMNS} from link_rows where identifier = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await
        .context("link_rows get failed")?;

        row.map(decode_link_row).transpose()
    }

    async fn insert_row(&self, row: &LinkRow) -> Result<()> {
        sqlx::query(
            r#"
            insert into link_rows (
              identifier, owner_id, target, last_check_time, verdict, history
            ) values ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&row.identifier)
        .bind(&row.owner_id)
        .bind(&row.target)
        .bind(row.last_check_time)
        .bind(row.verdict.as_str())
        .bind(serde_json::to_value(&row.history).context("history jsonb encode failed")?)
        .execute(&self.pool)
        .await
        .with_context(|| format!("link_rows insert failed for {}", row.identifier))?;
        Ok(())
    }

    async fn update_row(&self, row: &LinkRow) -> Result<()> {
        sqlx::query(
            r#"
            update link_rows
            set owner_id = $2, target = $3, last_check_time = $4,
                verdict = $5, history = $6
            where identifier = $1
            "#,
        )
        .bind(&row.identifier)
        .bind(&row.owner_id)
        .bind(&row.target)
        .bind(row.last_check_time)
        .bind(row.verdict.as_str())
        .bind(serde_json::to_value(&row.history).context("history jsonb encode failed")?)
        .execute(&self.pool)
        .await
        .with_context(|| format!("link_rows update failed for {}", row.identifier))?;
        Ok(())
    }

    async fn delete_row(&self, identifier: &str) -> Result<()> {
        sqlx::query("delete from link_rows where identifier = $1")
            .bind(identifier)
            .execute(&self.pool)
            .await
            .with_context(|| format!("link_rows delete failed for {identifier}"))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// PgIdentifierSource
// ---------------------------------------------------------------------------

/// Read-only paged scan of the identifier-service replica.
///
/// Expects an `identifiers` relation (table or view) projecting exactly the
/// columns of [`SourceRow`].
#[derive(Clone)]
pub struct PgIdentifierSource {
    pool: PgPool,
}

impl PgIdentifierSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentifierSource for PgIdentifierSource {
    async fn next_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<SourceRow>> {
        let rows: Vec<(String, String, String, String, bool, bool, bool)> = sqlx::query_as(
            r#"
            select identifier, owner_id, username, target,
                   is_public, is_test, is_default_target
            from identifiers
            where ($1::text is null or identifier > $1)
            order by identifier asc
            limit $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("identifier source page failed")?;

        Ok(rows
            .into_iter()
            .map(
                |(identifier, owner_id, username, target, is_public, is_test, is_default_target)| {
                    SourceRow {
                        identifier,
                        owner_id,
                        username,
                        target,
                        is_public,
                        is_test,
                        is_default_target,
                    }
                },
            )
            .collect())
    }
}

// ---------------------------------------------------------------------------
// PgOwnerResolver
// ---------------------------------------------------------------------------

/// Username lookup against the same replica the source reads.
#[derive(Clone)]
pub struct PgOwnerResolver {
    pool: PgPool,
}

impl PgOwnerResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OwnerResolver for PgOwnerResolver {
    async fn owner_for_username(&self, username: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("select distinct owner_id from identifiers where username = $1")
                .bind(username)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("owner lookup failed for username {username}"))?;
        Ok(row.map(|(o,)| o))
    }
}
