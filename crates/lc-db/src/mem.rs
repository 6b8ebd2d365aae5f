//! In-memory store fixtures, compiled under the `testkit` feature.
//!
//! Behavior mirrors the Postgres implementations over a `BTreeMap` so paging
//! and ordering semantics are identical. Both fixtures support fault
//! injection so error-path tests (per-row skip, cycle abort) need no real
//! database.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use lc_schemas::{LinkRow, SourceRow};

use crate::store::{IdentifierSource, LinkStore, OwnerResolver, WorksetCandidateKind};

// ---------------------------------------------------------------------------
// MemLinkStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemLinkStore {
    rows: Mutex<BTreeMap<String, LinkRow>>,
    failing: Mutex<BTreeSet<String>>,
}

impl MemLinkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, rows: impl IntoIterator<Item = LinkRow>) {
        let mut map = self.rows.lock().unwrap();
        for r in rows {
            map.insert(r.identifier.clone(), r);
        }
    }

    /// All writes touching this identifier will fail until cleared.
    pub fn fail_writes_for(&self, identifier: &str) {
        self.failing.lock().unwrap().insert(identifier.to_string());
    }

    pub fn snapshot(&self) -> Vec<LinkRow> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, identifier: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(identifier) {
            return Err(anyhow!("injected write failure for {identifier}"));
        }
        Ok(())
    }
}

#[async_trait]
impl LinkStore for MemLinkStore {
    async fn scan_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<LinkRow>> {
        let map = self.rows.lock().unwrap();
        let lower = match after {
            Some(a) => Bound::Excluded(a.to_string()),
            None => Bound::Unbounded,
        };
        Ok(map
            .range((lower, Bound::Unbounded))
            .take(limit.max(0) as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }

    async fn owners(&self) -> Result<Vec<String>> {
        let map = self.rows.lock().unwrap();
        let owners: BTreeSet<String> = map.values().map(|r| r.owner_id.clone()).collect();
        Ok(owners.into_iter().collect())
    }

    async fn workset_candidates(
        &self,
        owner_id: &str,
        kind: WorksetCandidateKind,
        checked_before: i64,
        limit: i64,
    ) -> Result<Vec<LinkRow>> {
        let map = self.rows.lock().unwrap();
        let mut out: Vec<LinkRow> = map
            .values()
            .filter(|r| r.owner_id == owner_id)
            .filter(|r| match kind {
                WorksetCandidateKind::Bad => r.is_bad(),
                WorksetCandidateKind::GoodOrUnvisited => !r.is_bad(),
            })
            .filter(|r| r.last_check_time < checked_before)
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (a.last_check_time, &a.identifier).cmp(&(b.last_check_time, &b.identifier))
        });
        out.truncate(limit.max(0) as usize);
        Ok(out)
    }

    async fn get_row(&self, identifier: &str) -> Result<Option<LinkRow>> {
        Ok(self.rows.lock().unwrap().get(identifier).cloned())
    }

    async fn insert_row(&self, row: &LinkRow) -> Result<()> {
        self.check_writable(&row.identifier)?;
        let mut map = self.rows.lock().unwrap();
        if map.contains_key(&row.identifier) {
            return Err(anyhow!("duplicate identifier {}", row.identifier));
        }
        map.insert(row.identifier.clone(), row.clone());
        Ok(())
    }

    async fn update_row(&self, row: &LinkRow) -> Result<()> {
        self.check_writable(&row.identifier)?;
        let mut map = self.rows.lock().unwrap();
        match map.get_mut(&row.identifier) {
            Some(slot) => {
                *slot = row.clone();
                Ok(())
            }
            None => Err(anyhow!("update of missing identifier {}", row.identifier)),
        }
    }

    async fn delete_row(&self, identifier: &str) -> Result<()> {
        self.check_writable(identifier)?;
        self.rows.lock().unwrap().remove(identifier);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemIdentifierSource
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemIdentifierSource {
    rows: Mutex<BTreeMap<String, SourceRow>>,
    fail_paging: AtomicBool,
}

impl MemIdentifierSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, rows: impl IntoIterator<Item = SourceRow>) {
        let mut map = self.rows.lock().unwrap();
        for r in rows {
            map.insert(r.identifier.clone(), r);
        }
    }

    pub fn remove(&self, identifier: &str) {
        self.rows.lock().unwrap().remove(identifier);
    }

    /// Every subsequent page fetch fails (store paging failure path).
    pub fn fail_paging(&self) {
        self.fail_paging.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentifierSource for MemIdentifierSource {
    async fn next_page(&self, after: Option<&str>, limit: i64) -> Result<Vec<SourceRow>> {
        if self.fail_paging.load(Ordering::SeqCst) {
            return Err(anyhow!("injected paging failure"));
        }
        let map = self.rows.lock().unwrap();
        let lower = match after {
            Some(a) => Bound::Excluded(a.to_string()),
            None => Bound::Unbounded,
        };
        Ok(map
            .range((lower, Bound::Unbounded))
            .take(limit.max(0) as usize)
            .map(|(_, r)| r.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemOwnerResolver
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemOwnerResolver {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemOwnerResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, username: &str, owner_id: &str) {
        self.map
            .lock()
            .unwrap()
            .insert(username.to_string(), owner_id.to_string());
    }
}

#[async_trait]
impl OwnerResolver for MemOwnerResolver {
    async fn owner_for_username(&self, username: &str) -> Result<Option<String>> {
        Ok(self.map.lock().unwrap().get(username).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
