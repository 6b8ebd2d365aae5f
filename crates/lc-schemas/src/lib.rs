//! lc-schemas
//!
//! Shared data model for the link checker: the durable per-identifier row,
//! its bounded verdict history, and the authoritative-store projection.
//!
//! Pure types and state transitions only — no I/O, no clocks, no randomness.
//! Callers pass `now` in as epoch seconds.

use serde::{Deserialize, Serialize};

/// Return code recorded for probes that failed without an HTTP status
/// (connect/DNS/TLS/read errors and timeouts).
pub const EXCEPTION_RETURN_CODE: i32 = -1;

/// A probe succeeds iff the final HTTP status is 200, or 401/403.
///
/// 401/403 are deliberate policy: the URL identifies *something* behind an
/// auth wall; credential presence is out of scope for the checker.
pub fn is_success_code(return_code: i32) -> bool {
    matches!(return_code, 200 | 401 | 403)
}

// ---------------------------------------------------------------------------
// VerdictEntry
// ---------------------------------------------------------------------------

/// One probe outcome in a row's bounded history ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictEntry {
    /// Probe completion time, epoch seconds UTC.
    pub checked_at: i64,
    /// Final HTTP status, or [`EXCEPTION_RETURN_CODE`] for exceptional outcomes.
    pub return_code: i32,
    /// MIME type on success; exception string on failure.
    pub detail: String,
}

impl VerdictEntry {
    pub fn is_success(&self) -> bool {
        is_success_code(self.return_code)
    }
}

// ---------------------------------------------------------------------------
// LinkVerdict
// ---------------------------------------------------------------------------

/// Tri-state verdict for a row. `Good` and `Bad` are mutually exclusive by
/// construction; `Unvisited` means no probe has completed since the row was
/// created or last retargeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkVerdict {
    Unvisited,
    Good,
    Bad,
}

impl LinkVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkVerdict::Unvisited => "UNVISITED",
            LinkVerdict::Good => "GOOD",
            LinkVerdict::Bad => "BAD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UNVISITED" => Some(LinkVerdict::Unvisited),
            "GOOD" => Some(LinkVerdict::Good),
            "BAD" => Some(LinkVerdict::Bad),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// LinkRow
// ---------------------------------------------------------------------------

/// The checker's durable record for one tracked identifier.
///
/// Invariants maintained by the transition methods below:
/// - `history.len()` never exceeds the capacity passed to [`record_probe`].
/// - non-empty history ⇒ `is_visited()`.
/// - [`retarget`] ⇒ empty history and `Unvisited`.
///
/// [`record_probe`]: LinkRow::record_probe
/// [`retarget`]: LinkRow::retarget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRow {
    pub identifier: String,
    pub owner_id: String,
    pub target: String,
    /// Epoch seconds of the most recent probe completion; `0` = unvisited.
    pub last_check_time: i64,
    pub verdict: LinkVerdict,
    /// Bounded ring, oldest first.
    pub history: Vec<VerdictEntry>,
}

impl LinkRow {
    /// Fresh unvisited row, as inserted by the reconciler.
    pub fn new(identifier: &str, owner_id: &str, target: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            owner_id: owner_id.to_string(),
            target: target.to_string(),
            last_check_time: 0,
            verdict: LinkVerdict::Unvisited,
            history: Vec::new(),
        }
    }

    pub fn is_visited(&self) -> bool {
        self.last_check_time > 0
    }

    pub fn is_good(&self) -> bool {
        self.verdict == LinkVerdict::Good
    }

    pub fn is_bad(&self) -> bool {
        self.verdict == LinkVerdict::Bad
    }

    /// Append a probe outcome, evicting the oldest entry when the ring is
    /// full, and recompute verdict + last-check time.
    pub fn record_probe(&mut self, entry: VerdictEntry, capacity: usize) {
        self.verdict = if entry.is_success() {
            LinkVerdict::Good
        } else {
            LinkVerdict::Bad
        };
        self.last_check_time = entry.checked_at;

        self.history.push(entry);
        if self.history.len() > capacity {
            let excess = self.history.len() - capacity;
            self.history.drain(..excess);
        }
    }

    /// Rewrite owner/target after the authoritative store moved the
    /// identifier. History is no longer about the current target, so it is
    /// cleared and the row reverts to unvisited.
    pub fn retarget(&mut self, owner_id: &str, target: &str) {
        self.owner_id = owner_id.to_string();
        self.target = target.to_string();
        self.last_check_time = 0;
        self.verdict = LinkVerdict::Unvisited;
        self.history.clear();
    }

    /// Count of trailing consecutive failures in the history ring.
    pub fn consecutive_failures(&self) -> usize {
        self.history
            .iter()
            .rev()
            .take_while(|e| !e.is_success())
            .count()
    }

    /// A row is notification-worthy when its trailing failure count exceeds
    /// `threshold` AND the span from the oldest of those failures to `now`
    /// is at least `min_span_secs`.
    ///
    /// The external notifier consumes this predicate; the checker itself
    /// never emits notifications.
    pub fn is_notification_worthy(&self, threshold: usize, min_span_secs: i64, now: i64) -> bool {
        let failures = self.consecutive_failures();
        if failures <= threshold {
            return false;
        }
        let oldest_failure = &self.history[self.history.len() - failures];
        now - oldest_failure.checked_at >= min_span_secs
    }
}

// ---------------------------------------------------------------------------
// SourceRow
// ---------------------------------------------------------------------------

/// Projection of one identifier from the authoritative store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    pub identifier: String,
    pub owner_id: String,
    /// Account username that minted the identifier; backs exclusion-file
    /// resolution.
    pub username: String,
    pub target: String,
    pub is_public: bool,
    pub is_test: bool,
    /// True when the target is the service-generated placeholder URL.
    pub is_default_target: bool,
}

impl SourceRow {
    /// Whether the checker tracks this identifier at all: public, real
    /// (non-test), and pointing at a user-supplied target.
    pub fn is_checkable(&self) -> bool {
        self.is_public && !self.is_test && !self.is_default_target
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
