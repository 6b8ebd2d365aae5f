//! Store boundary for the link checker.
//!
//! Three consumed interfaces, all object-safe so callers hold
//! `Arc<dyn Trait>` without knowing the backend:
//!
//! - [`LinkStore`] — the checker's own durable row table.
//! - [`IdentifierSource`] — the authoritative identifier store, read-only,
//!   paged ascending by identifier.
//! - [`OwnerResolver`] — username → owner-id lookup backing exclusion files.
//!
//! Postgres implementations live in this crate; in-memory fixtures are
//! available behind the `testkit` feature.

use anyhow::Result;
use async_trait::async_trait;
use lc_schemas::{LinkRow, SourceRow};

/// Which partition of an owner's rows a workset-load query selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorksetCandidateKind {
    /// Rows whose last probe failed.
    Bad,
    /// Rows whose last probe succeeded, plus never-visited rows
    /// (`last_check_time = 0`, so they sort first).
    GoodOrUnvisited,
}

/// The checker's own row table.
#[async_trait]
pub trait LinkStore: Send + Sync {
    /// Page of rows with `identifier > after`, ascending, at most `limit`.
    async fn scan_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<LinkRow>>;

    /// Distinct owner ids present in the table, ascending.
    async fn owners(&self) -> Result<Vec<String>>;

    /// Per-owner workset candidates: rows in the given partition with
    /// `last_check_time < checked_before`, ordered ascending by
    /// `last_check_time`, at most `limit`.
    async fn workset_candidates(
        &self,
        owner_id: &str,
        kind: WorksetCandidateKind,
        checked_before: i64,
        limit: i64,
    ) -> Result<Vec<LinkRow>>;

    async fn get_row(&self, identifier: &str) -> Result<Option<LinkRow>>;

    async fn insert_row(&self, row: &LinkRow) -> Result<()>;

    async fn update_row(&self, row: &LinkRow) -> Result<()>;

    async fn delete_row(&self, identifier: &str) -> Result<()>;
}

/// The authoritative identifier store, consumed as a forward-only paged scan.
///
/// Rows come back unfiltered; the reconciler applies the checkable filter and
/// the permanent-exclusion filter so that filtering policy lives in one place.
#[async_trait]
pub trait IdentifierSource: Send + Sync {
    /// Page of rows with `identifier > after`, ascending, at most `limit`.
    async fn next_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<SourceRow>>;
}

/// Username → owner-id resolution against the authoritative store.
#[async_trait]
pub trait OwnerResolver: Send + Sync {
    /// `None` when the username is unknown to the identifier service.
    async fn owner_for_username(&self, username: &str) -> Result<Option<String>>;
}
