//! lc-testkit
//!
//! End-to-end harness for the scenario tests: a full [`Checker`] wired onto
//! in-memory stores, with fast-interval configuration and row builders.
//! Scenario tests pair this with an `httpmock` server (or a raw socket for
//! truncation cases) so no real database or network is touched.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lc_config::CheckerConfig;
use lc_db::mem::{MemIdentifierSource, MemLinkStore, MemOwnerResolver};
use lc_db::{IdentifierSource, LinkStore};
use lc_exclusions::ExclusionRegistry;
use lc_runtime::Checker;
use lc_schemas::{LinkRow, SourceRow, VerdictEntry};

/// Epoch anchor used by fixtures so tests compare against stable numbers.
pub const T0: i64 = 1_700_000_000;

pub const DAY: i64 = 86_400;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestHarness {
    pub store: Arc<MemLinkStore>,
    pub source: Arc<MemIdentifierSource>,
    pub resolver: Arc<MemOwnerResolver>,
    pub exclusions: Arc<ExclusionRegistry>,
}

impl TestHarness {
    /// Harness without an exclusion file (sets stay empty).
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Harness watching `path`, with the stat debounce removed so mid-round
    /// edits take effect at the next dispatch.
    pub fn with_exclusion_file(path: PathBuf) -> Self {
        Self::build(Some(path))
    }

    fn build(path: Option<PathBuf>) -> Self {
        let store = Arc::new(MemLinkStore::new());
        let source = Arc::new(MemIdentifierSource::new());
        let resolver = Arc::new(MemOwnerResolver::new());
        let exclusions = Arc::new(ExclusionRegistry::with_debounce(
            path,
            Arc::clone(&resolver) as Arc<dyn lc_db::OwnerResolver>,
            Duration::ZERO,
        ));
        Self {
            store,
            source,
            resolver,
            exclusions,
        }
    }

    /// A checker over this harness's stores with a 10 ms empty-workset sleep.
    pub fn checker(&self, config: CheckerConfig) -> Checker {
        Checker::new(
            config,
            Arc::clone(&self.store) as Arc<dyn LinkStore>,
            Arc::clone(&self.source) as Arc<dyn IdentifierSource>,
            Arc::clone(&self.exclusions),
        )
        .with_empty_workset_sleep(Duration::from_millis(10))
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Config with production-scale waits collapsed for tests: everything is
/// immediately eligible and re-eligible, one-second fetch budget aside.
pub fn quick_config() -> CheckerConfig {
    CheckerConfig {
        table_update_cycle: 1,
        good_recheck_min_interval: 0,
        bad_recheck_min_interval: 0,
        owner_revisit_min_interval: 0,
        num_workers: 4,
        workset_owner_max_links: 10,
        check_timeout: 5,
        user_agent: "linkcheck-testkit/0".to_string(),
        max_read: 64 * 1024,
        notify_failure_threshold: 3,
        notify_min_span: 0,
    }
}

// ---------------------------------------------------------------------------
// Row builders
// ---------------------------------------------------------------------------

pub fn source_row(id: &str, owner: &str, username: &str, target: &str) -> SourceRow {
    SourceRow {
        identifier: id.to_string(),
        owner_id: owner.to_string(),
        username: username.to_string(),
        target: target.to_string(),
        is_public: true,
        is_test: false,
        is_default_target: false,
    }
}

pub fn unvisited_row(id: &str, owner: &str, target: &str) -> LinkRow {
    LinkRow::new(id, owner, target)
}

pub fn good_row(id: &str, owner: &str, target: &str, checked_at: i64) -> LinkRow {
    let mut r = LinkRow::new(id, owner, target);
    r.record_probe(
        VerdictEntry {
            checked_at,
            return_code: 200,
            detail: "text/html".to_string(),
        },
        8,
    );
    r
}

pub fn bad_row(id: &str, owner: &str, target: &str, checked_at: i64) -> LinkRow {
    let mut r = LinkRow::new(id, owner, target);
    r.record_probe(
        VerdictEntry {
            checked_at,
            return_code: 500,
            detail: "server error".to_string(),
        },
        8,
    );
    r
}
