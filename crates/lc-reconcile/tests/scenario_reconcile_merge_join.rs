//! Scenario: table reconciliation against the authoritative store.
//!
//! # Invariants under test
//!
//! 1. After a cycle, tracked identifiers equal the filtered source set.
//! 2. Source-only identifiers are inserted unvisited with empty history.
//! 3. Checker-only identifiers are deleted.
//! 4. An (owner, target) change rewrites the row, clears history, and
//!    reverts it to unvisited.
//! 5. Identical rows are untouched and counted as unchanged.
//! 6. Running twice with no source change is a no-op.
//! 7. Non-public / test / default-target / permanently-excluded rows are
//!    never tracked, and lose their row if they stop being checkable.
//! 8. A per-row persistence error is skipped; the cycle completes.
//! 9. A paging failure aborts the cycle with an error.
//! 10. Bounded paging walks the full table across page boundaries.

use std::collections::BTreeSet;

use lc_db::mem::{MemIdentifierSource, MemLinkStore};
use lc_db::LinkStore;
use lc_exclusions::ExclusionSets;
use lc_reconcile::{reconcile_table, reconcile_table_paged};
use lc_schemas::{LinkRow, SourceRow, VerdictEntry};

fn src(id: &str, owner: &str, target: &str) -> SourceRow {
    SourceRow {
        identifier: id.to_string(),
        owner_id: owner.to_string(),
        username: format!("user-{owner}"),
        target: target.to_string(),
        is_public: true,
        is_test: false,
        is_default_target: false,
    }
}

fn visited_row(id: &str, owner: &str, target: &str) -> LinkRow {
    let mut r = LinkRow::new(id, owner, target);
    r.record_probe(
        VerdictEntry {
            checked_at: 1_700_000_000,
            return_code: 500,
            detail: "server error".to_string(),
        },
        8,
    );
    r
}

fn tracked_ids(store: &MemLinkStore) -> BTreeSet<String> {
    store.snapshot().into_iter().map(|r| r.identifier).collect()
}

#[tokio::test]
async fn inserts_deletes_and_leaves_matches_alone() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    store.seed([
        LinkRow::new("id:gone", "o1", "https://example.org/gone"),
        LinkRow::new("id:kept", "o1", "https://example.org/kept"),
    ]);
    source.seed([
        src("id:kept", "o1", "https://example.org/kept"),
        src("id:new", "o2", "https://example.org/new"),
    ]);

    let stats = reconcile_table(&store, &source, &excl).await.unwrap();

    assert_eq!(stats.inserted, 1);
    assert_eq!(stats.deleted, 1);
    assert_eq!(stats.unchanged, 1);
    assert_eq!(stats.retargeted, 0);
    assert_eq!(stats.row_errors, 0);

    assert_eq!(
        tracked_ids(&store),
        BTreeSet::from(["id:kept".to_string(), "id:new".to_string()])
    );

    let new_row = store.get_row("id:new").await.unwrap().unwrap();
    assert!(!new_row.is_visited());
    assert!(new_row.history.is_empty());
}

#[tokio::test]
async fn target_change_clears_history_and_unvisits() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    store.seed([visited_row("id:a", "o1", "https://example.org/old")]);
    source.seed([src("id:a", "o1", "https://example.org/new")]);

    let stats = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(stats.retargeted, 1);

    let row = store.get_row("id:a").await.unwrap().unwrap();
    assert_eq!(row.target, "https://example.org/new");
    assert!(row.history.is_empty());
    assert!(!row.is_visited());
}

#[tokio::test]
async fn owner_change_alone_also_rewrites() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    store.seed([visited_row("id:a", "o1", "https://example.org/a")]);
    source.seed([src("id:a", "o2", "https://example.org/a")]);

    let stats = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(stats.retargeted, 1);
    let row = store.get_row("id:a").await.unwrap().unwrap();
    assert_eq!(row.owner_id, "o2");
}

#[tokio::test]
async fn second_run_with_no_source_change_is_noop() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    source.seed([
        src("id:a", "o1", "https://example.org/a"),
        src("id:b", "o2", "https://example.org/b"),
    ]);

    let first = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(first.inserted, 2);

    let before = store.snapshot();
    let second = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(second.inserted, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(second.retargeted, 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(store.snapshot(), before);
}

#[tokio::test]
async fn uncheckable_and_permanently_excluded_rows_are_filtered() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();

    let mut hidden = src("id:hidden", "o1", "https://example.org/h");
    hidden.is_public = false;
    let mut test = src("id:test", "o1", "https://example.org/t");
    test.is_test = true;
    let mut default = src("id:default", "o1", "https://example.org/d");
    default.is_default_target = true;
    let banned = src("id:banned", "o-banned", "https://example.org/b");

    source.seed([
        hidden,
        test,
        default,
        banned,
        src("id:ok", "o1", "https://example.org/ok"),
    ]);

    let mut excl = ExclusionSets::empty();
    excl.add_permanent("o-banned");

    let stats = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(stats.inserted, 1);
    assert_eq!(tracked_ids(&store), BTreeSet::from(["id:ok".to_string()]));
}

#[tokio::test]
async fn row_that_stops_being_checkable_is_deleted() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    store.seed([visited_row("id:a", "o1", "https://example.org/a")]);
    let mut withdrawn = src("id:a", "o1", "https://example.org/a");
    withdrawn.is_public = false;
    source.seed([withdrawn]);

    let stats = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(stats.deleted, 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn per_row_error_is_skipped_and_cycle_completes() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    source.seed([
        src("id:a", "o1", "https://example.org/a"),
        src("id:b", "o1", "https://example.org/b"),
        src("id:c", "o1", "https://example.org/c"),
    ]);
    store.fail_writes_for("id:b");

    let stats = reconcile_table(&store, &source, &excl).await.unwrap();
    assert_eq!(stats.inserted, 2);
    assert_eq!(stats.row_errors, 1);
    assert_eq!(
        tracked_ids(&store),
        BTreeSet::from(["id:a".to_string(), "id:c".to_string()])
    );
}

#[tokio::test]
async fn paging_failure_aborts_the_cycle() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    source.seed([src("id:a", "o1", "https://example.org/a")]);
    source.fail_paging();

    assert!(reconcile_table(&store, &source, &excl).await.is_err());
    assert!(store.is_empty(), "aborted cycle must not have inserted");
}

#[tokio::test]
async fn bounded_paging_walks_the_whole_table() {
    let store = MemLinkStore::new();
    let source = MemIdentifierSource::new();
    let excl = ExclusionSets::empty();

    let rows: Vec<SourceRow> = (0..25)
        .map(|i| src(&format!("id:{i:04}"), "o1", &format!("https://example.org/{i}")))
        .collect();
    source.seed(rows);

    // Page size far below the row count forces several cursor-keyed pages.
    let stats = reconcile_table_paged(&store, &source, &excl, 4).await.unwrap();
    assert_eq!(stats.inserted, 25);
    assert_eq!(store.len(), 25);

    // And the second paged run agrees with the unpaged one.
    let stats = reconcile_table_paged(&store, &source, &excl, 4).await.unwrap();
    assert_eq!(stats.unchanged, 25);
}
