//! lc-exclusions
//!
//! Owner exclusion registry. Operators maintain a line-oriented file mapping
//! usernames to an exclusion kind; the registry reloads it when its mtime
//! changes, resolving usernames to owner ids through the identifier store.
//!
//! `refresh` is cheap enough to call at every scheduling decision (a stat at
//! most once per debounce window), so exclusions take effect mid-round
//! without a restart.
//!
//! Reload error semantics: a malformed line, an unknown username, or a
//! resolver failure aborts the reload, the previous sets are retained, and
//! the stored mtime is advanced to the offending file's mtime so the
//! registry does not re-parse a broken file on every call.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{anyhow, bail, Context, Result};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use lc_db::OwnerResolver;

/// Minimum gap between file stats.
pub const REFRESH_DEBOUNCE: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// ExclusionSets
// ---------------------------------------------------------------------------

/// Immutable snapshot of both exclude sets. Swapped wholesale on reload;
/// readers hold an `Arc` and never observe a partial update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExclusionSets {
    permanent: BTreeSet<String>,
    temporary: BTreeSet<String>,
}

impl ExclusionSets {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Excluded at reconcile time: no row is ever created for these owners.
    pub fn is_permanent(&self, owner_id: &str) -> bool {
        self.permanent.contains(owner_id)
    }

    /// Excluded from workset construction and dispatch only.
    pub fn is_temporary(&self, owner_id: &str) -> bool {
        self.temporary.contains(owner_id)
    }

    /// In either set; such owners are never dispatched.
    pub fn is_excluded(&self, owner_id: &str) -> bool {
        self.is_permanent(owner_id) || self.is_temporary(owner_id)
    }

    pub fn is_empty(&self) -> bool {
        self.permanent.is_empty() && self.temporary.is_empty()
    }

    pub fn add_permanent(&mut self, owner_id: impl Into<String>) {
        self.permanent.insert(owner_id.into());
    }

    pub fn add_temporary(&mut self, owner_id: impl Into<String>) {
        self.temporary.insert(owner_id.into());
    }

    pub fn permanent_len(&self) -> usize {
        self.permanent.len()
    }

    pub fn temporary_len(&self) -> usize {
        self.temporary.len()
    }
}

// ---------------------------------------------------------------------------
// ExclusionRegistry
// ---------------------------------------------------------------------------

struct Inner {
    sets: Arc<ExclusionSets>,
    file_mtime: Option<SystemTime>,
    last_stat: Option<Instant>,
}

/// Process-wide exclusion state with debounced file reload.
pub struct ExclusionRegistry {
    path: Option<PathBuf>,
    resolver: Arc<dyn OwnerResolver>,
    debounce: Duration,
    inner: RwLock<Inner>,
}

impl ExclusionRegistry {
    /// `path = None` runs with permanently empty sets (no exclusion file
    /// configured on the command line).
    pub fn new(path: Option<PathBuf>, resolver: Arc<dyn OwnerResolver>) -> Self {
        Self::with_debounce(path, resolver, REFRESH_DEBOUNCE)
    }

    pub fn with_debounce(
        path: Option<PathBuf>,
        resolver: Arc<dyn OwnerResolver>,
        debounce: Duration,
    ) -> Self {
        Self {
            path,
            resolver,
            debounce,
            inner: RwLock::new(Inner {
                sets: Arc::new(ExclusionSets::empty()),
                file_mtime: None,
                last_stat: None,
            }),
        }
    }

    /// Current sets as a cheap lock-free-to-read snapshot.
    pub async fn snapshot(&self) -> Arc<ExclusionSets> {
        Arc::clone(&self.inner.read().await.sets)
    }

    /// Stat the file and reload if its mtime changed. Debounced; errors keep
    /// the previous sets (see module docs).
    pub async fn refresh(&self) {
        let path = match &self.path {
            Some(p) => p.clone(),
            None => return,
        };

        let mut inner = self.inner.write().await;

        if let Some(last) = inner.last_stat {
            if last.elapsed() < self.debounce {
                return;
            }
        }
        inner.last_stat = Some(Instant::now());

        let mtime = match std::fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "exclusion file stat failed; keeping previous sets");
                return;
            }
        };

        if inner.file_mtime == Some(mtime) {
            return;
        }

        match load_sets(&path, self.resolver.as_ref()).await {
            Ok(sets) => {
                info!(
                    path = %path.display(),
                    permanent = sets.permanent.len(),
                    temporary = sets.temporary.len(),
                    "exclusion file reloaded"
                );
                inner.sets = Arc::new(sets);
                inner.file_mtime = Some(mtime);
            }
            Err(e) => {
                // Advance the mtime anyway so a broken file is parsed once,
                // not on every refresh.
                error!(path = %path.display(), error = %e, "exclusion file reload failed; keeping previous sets");
                inner.file_mtime = Some(mtime);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// File parsing
// ---------------------------------------------------------------------------

async fn load_sets(path: &std::path::Path, resolver: &dyn OwnerResolver) -> Result<ExclusionSets> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read exclusion file: {}", path.display()))?;

    let mut sets = ExclusionSets::empty();

    for (idx, line) in text.lines().enumerate() {
        let lineno = idx + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let tokens: Vec<&str> = trimmed.split_whitespace().collect();
        let &[username, kind] = tokens.as_slice() else {
            bail!("line {lineno}: expected '<username> permanent|temporary', got {trimmed:?}");
        };

        let owner_id = resolver
            .owner_for_username(username)
            .await
            .with_context(|| format!("line {lineno}: owner lookup failed for {username:?}"))?
            .ok_or_else(|| anyhow!("line {lineno}: unknown username {username:?}"))?;

        match kind {
            "permanent" => sets.add_permanent(owner_id),
            "temporary" => sets.add_temporary(owner_id),
            other => bail!("line {lineno}: unknown exclusion kind {other:?}"),
        }
    }

    Ok(sets)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
