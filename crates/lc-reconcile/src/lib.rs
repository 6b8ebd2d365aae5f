//! lc-reconcile
//!
//! Once per reconciliation cycle the checker's own row table is merge-joined
//! against the authoritative identifier store. Both sides are consumed as
//! forward-only paged streams ordered ascending by identifier, so memory
//! stays bounded regardless of table size.
//!
//! The source stream is filtered to *checkable* rows (public, non-test,
//! user-supplied target) whose owner is not permanently excluded; everything
//! the filter rejects therefore falls into the delete case if the checker
//! was tracking it.
//!
//! Failure semantics: a per-row persistence error is counted and skipped;
//! a paging error on either stream aborts the cycle with `Err` (the next
//! cycle retries from scratch).

use std::cmp::Ordering;
use std::collections::VecDeque;

use anyhow::Result;
use tracing::warn;

use lc_db::{IdentifierSource, LinkStore};
use lc_exclusions::ExclusionSets;
use lc_schemas::{LinkRow, SourceRow};

/// Rows fetched per page from either stream.
pub const PAGE_SIZE: i64 = 1000;

// ---------------------------------------------------------------------------
// ReconcileStats
// ---------------------------------------------------------------------------

/// Outcome counters for one reconcile cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileStats {
    pub inserted: u64,
    pub deleted: u64,
    pub retargeted: u64,
    pub unchanged: u64,
    pub row_errors: u64,
}

impl ReconcileStats {
    /// Rows the cycle looked at on either side.
    pub fn total_seen(&self) -> u64 {
        self.inserted + self.deleted + self.retargeted + self.unchanged
    }
}

// ---------------------------------------------------------------------------
// Paged streams
// ---------------------------------------------------------------------------

/// Lazy, finite, non-restartable sequence of checker rows.
struct LocalStream<'a> {
    store: &'a dyn LinkStore,
    buf: VecDeque<LinkRow>,
    cursor: Option<String>,
    exhausted: bool,
    page_size: i64,
}

impl<'a> LocalStream<'a> {
    fn new(store: &'a dyn LinkStore, page_size: i64) -> Self {
        Self {
            store,
            buf: VecDeque::new(),
            cursor: None,
            exhausted: false,
            page_size,
        }
    }

    async fn next(&mut self) -> Result<Option<LinkRow>> {
        if self.buf.is_empty() && !self.exhausted {
            let page = self
                .store
                .scan_page(self.cursor.as_deref(), self.page_size)
                .await?;
            if (page.len() as i64) < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = Some(last.identifier.clone());
            }
            self.buf.extend(page);
        }
        Ok(self.buf.pop_front())
    }
}

/// Same shape over the authoritative store, filtered to rows the checker
/// tracks.
struct SourceStream<'a> {
    source: &'a dyn IdentifierSource,
    exclusions: &'a ExclusionSets,
    buf: VecDeque<SourceRow>,
    cursor: Option<String>,
    exhausted: bool,
    page_size: i64,
}

impl<'a> SourceStream<'a> {
    fn new(source: &'a dyn IdentifierSource, exclusions: &'a ExclusionSets, page_size: i64) -> Self {
        Self {
            source,
            exclusions,
            buf: VecDeque::new(),
            cursor: None,
            exhausted: false,
            page_size,
        }
    }

    async fn next(&mut self) -> Result<Option<SourceRow>> {
        loop {
            if let Some(row) = self.buf.pop_front() {
                return Ok(Some(row));
            }
            if self.exhausted {
                return Ok(None);
            }
            let page = self
                .source
                .next_page(self.cursor.as_deref(), self.page_size)
                .await?;
            if (page.len() as i64) < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = Some(last.identifier.clone());
            }
            self.buf.extend(
                page.into_iter()
                    .filter(|r| r.is_checkable() && !self.exclusions.is_permanent(&r.owner_id)),
            );
            // A fully filtered page loops around for the next one.
        }
    }
}

// ---------------------------------------------------------------------------
// Merge-join
// ---------------------------------------------------------------------------

/// Reconcile with the default page size.
pub async fn reconcile_table(
    store: &dyn LinkStore,
    source: &dyn IdentifierSource,
    exclusions: &ExclusionSets,
) -> Result<ReconcileStats> {
    reconcile_table_paged(store, source, exclusions, PAGE_SIZE).await
}

/// Merge-join both streams pairwise by identifier head.
pub async fn reconcile_table_paged(
    store: &dyn LinkStore,
    source: &dyn IdentifierSource,
    exclusions: &ExclusionSets,
    page_size: i64,
) -> Result<ReconcileStats> {
    let mut stats = ReconcileStats::default();

    let mut local = LocalStream::new(store, page_size);
    let mut remote = SourceStream::new(source, exclusions, page_size);

    let mut l = local.next().await?;
    let mut s = remote.next().await?;

    loop {
        // Which head advances this iteration. Equal advances both.
        let order = match (&l, &s) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(lrow), Some(srow)) => lrow.identifier.cmp(&srow.identifier),
        };

        match order {
            Ordering::Less => {
                if let Some(lrow) = l.take() {
                    delete_row(store, &mut stats, &lrow.identifier).await;
                }
                l = local.next().await?;
            }
            Ordering::Greater => {
                if let Some(srow) = s.take() {
                    insert_row(store, &mut stats, &srow).await;
                }
                s = remote.next().await?;
            }
            Ordering::Equal => {
                if let (Some(mut lrow), Some(srow)) = (l.take(), s.take()) {
                    if lrow.owner_id != srow.owner_id || lrow.target != srow.target {
                        retarget_row(store, &mut stats, &mut lrow, &srow).await;
                    } else {
                        stats.unchanged += 1;
                    }
                }
                l = local.next().await?;
                s = remote.next().await?;
            }
        }
    }

    Ok(stats)
}

async fn insert_row(store: &dyn LinkStore, stats: &mut ReconcileStats, srow: &SourceRow) {
    let row = LinkRow::new(&srow.identifier, &srow.owner_id, &srow.target);
    match store.insert_row(&row).await {
        Ok(()) => stats.inserted += 1,
        Err(e) => {
            warn!(identifier = %srow.identifier, error = %format!("{e:#}"), "reconcile insert failed; skipping row");
            stats.row_errors += 1;
        }
    }
}

async fn delete_row(store: &dyn LinkStore, stats: &mut ReconcileStats, identifier: &str) {
    match store.delete_row(identifier).await {
        Ok(()) => stats.deleted += 1,
        Err(e) => {
            warn!(identifier = %identifier, error = %format!("{e:#}"), "reconcile delete failed; skipping row");
            stats.row_errors += 1;
        }
    }
}

async fn retarget_row(
    store: &dyn LinkStore,
    stats: &mut ReconcileStats,
    lrow: &mut LinkRow,
    srow: &SourceRow,
) {
    lrow.retarget(&srow.owner_id, &srow.target);
    match store.update_row(lrow).await {
        Ok(()) => stats.retargeted += 1,
        Err(e) => {
            warn!(identifier = %lrow.identifier, error = %format!("{e:#}"), "reconcile retarget failed; skipping row");
            stats.row_errors += 1;
        }
    }
}
