//! lc-scheduler
//!
//! Round-robin, per-owner workset scheduling. One `Scheduler` value is
//! owned by the main loop and shared with workers by reference; all workset
//! state is mutated only under its single mutex, and the critical section
//! never touches I/O.
//!
//! Fairness rules enforced here:
//! - consecutive dispatches rotate across owners; an owner is revisited only
//!   after the cursor has swept every other owner,
//! - at most one in-flight probe per owner (`locked`),
//! - a minimum gap between successive probes of one owner, measured from
//!   probe *completion*,
//! - owners in either exclusion set stop being dispatched mid-round.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;

use lc_db::{LinkStore, WorksetCandidateKind};
use lc_exclusions::ExclusionSets;
use lc_schemas::LinkRow;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The subset of checker configuration the scheduler consumes. Seconds.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workset_owner_max_links: usize,
    pub good_recheck_min_interval: u64,
    pub bad_recheck_min_interval: u64,
    pub owner_revisit_min_interval: u64,
}

// ---------------------------------------------------------------------------
// OwnerWorkset
// ---------------------------------------------------------------------------

/// One owner's bounded slice of links for the current round. Lives only
/// inside the scheduler; discarded at round end.
#[derive(Debug)]
struct OwnerWorkset {
    owner_id: String,
    /// Bad rows first, then good/unvisited; both groups oldest-checked first.
    links: Vec<LinkRow>,
    /// Position of the next undispatched link; `>= links.len()` = finished.
    next_index: usize,
    /// True while a worker is probing one of this owner's links.
    locked: bool,
    /// Completion instant of this owner's most recent probe.
    last_completed: Option<Instant>,
}

impl OwnerWorkset {
    fn is_finished(&self) -> bool {
        self.next_index >= self.links.len()
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Probe this row, then call [`Scheduler::mark_checked`] with `slot`.
    Ready { slot: usize, row: LinkRow },
    /// Undispatched links remain but every owner is locked, cooling down,
    /// or newly excluded. Sleep briefly and retry.
    Wait,
    /// The round is over for this worker.
    Finished,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

struct State {
    worksets: Vec<OwnerWorkset>,
    cursor: usize,
}

pub struct Scheduler {
    config: SchedulerConfig,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State {
                worksets: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Build a fresh round's workset: for every non-excluded owner, up to
    /// `workset_owner_max_links` rows — eligible bads first (outside their
    /// blackout window), topped up with eligible good/unvisited rows.
    ///
    /// The two separate queries guarantee bads cannot be crowded out by an
    /// owner with many eligible goods. Returns the total link count.
    pub async fn load_workset(
        &self,
        store: &dyn LinkStore,
        exclusions: &ExclusionSets,
        now_epoch: i64,
    ) -> Result<usize> {
        let w = self.config.workset_owner_max_links;
        let bad_cutoff = now_epoch - self.config.bad_recheck_min_interval as i64;
        let good_cutoff = now_epoch - self.config.good_recheck_min_interval as i64;

        let mut worksets: Vec<OwnerWorkset> = Vec::new();
        let mut total = 0usize;

        for owner_id in store.owners().await? {
            if exclusions.is_excluded(&owner_id) {
                continue;
            }

            let mut links = store
                .workset_candidates(&owner_id, WorksetCandidateKind::Bad, bad_cutoff, w as i64)
                .await?;
            if links.len() < w {
                let top_up = store
                    .workset_candidates(
                        &owner_id,
                        WorksetCandidateKind::GoodOrUnvisited,
                        good_cutoff,
                        (w - links.len()) as i64,
                    )
                    .await?;
                links.extend(top_up);
            }

            if links.is_empty() {
                continue;
            }
            total += links.len();
            worksets.push(OwnerWorkset {
                owner_id,
                links,
                next_index: 0,
                locked: false,
                last_completed: None,
            });
        }

        let mut st = self.state.lock().unwrap();
        st.worksets = worksets;
        st.cursor = 0;
        Ok(total)
    }

    /// Dispense the next link to probe. Single serialized entry point; the
    /// caller refreshes the exclusion registry and takes a snapshot before
    /// calling, so the critical section is lock-only.
    pub fn next_link(&self, exclusions: &ExclusionSets, now: Instant) -> Dispatch {
        let revisit = Duration::from_secs(self.config.owner_revisit_min_interval);
        let mut st = self.state.lock().unwrap();

        let n = st.worksets.len();
        if n == 0 {
            return Dispatch::Finished;
        }

        let start = st.cursor;
        let mut saw_unfinished_blocked = false;

        loop {
            let i = st.cursor;
            let w = &mut st.worksets[i];

            // Owners excluded mid-round count as finished: their remaining
            // links are skipped for the rest of the round.
            let finished = w.is_finished() || exclusions.is_excluded(&w.owner_id);

            if !finished {
                let cooled = match w.last_completed {
                    Some(t) => now.saturating_duration_since(t) >= revisit,
                    None => true,
                };
                if !w.locked && cooled {
                    w.locked = true;
                    let row = w.links[w.next_index].clone();
                    // Advance past this owner so the next dispatch sweeps
                    // the rest of the rotation before coming back.
                    st.cursor = (i + 1) % n;
                    return Dispatch::Ready { slot: i, row };
                }
                saw_unfinished_blocked = true;
            }

            st.cursor = (i + 1) % n;
            if st.cursor == start {
                return if saw_unfinished_blocked {
                    Dispatch::Wait
                } else {
                    Dispatch::Finished
                };
            }
        }
    }

    /// Probe completion: consume the dispatched link, stamp the owner's
    /// completion time, release the owner lock.
    pub fn mark_checked(&self, slot: usize, now: Instant) {
        let mut st = self.state.lock().unwrap();
        if let Some(w) = st.worksets.get_mut(slot) {
            w.next_index += 1;
            w.last_completed = Some(now);
            w.locked = false;
        }
    }

    /// Links not yet dispatched across all owners (for round logging).
    pub fn remaining_links(&self) -> usize {
        let st = self.state.lock().unwrap();
        st.worksets
            .iter()
            .map(|w| w.links.len().saturating_sub(w.next_index))
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
