//! lc-fetcher
//!
//! One HTTP GET per dispatched link, classified into a probe report, applied
//! to the row's verdict history, and persisted.
//!
//! Classification policy:
//! - 200, 401, 403 are success (401/403: the URL identifies *something*;
//!   credential presence is out of scope).
//! - any other status is a failure carrying that status as return code.
//! - connect/DNS/TLS/read errors and timeouts are failures with return code
//!   −1 and the exception string as detail.
//! - a truncated read of a declared `text/html` response whose partial body
//!   ends in `</html>` (case-insensitive, whitespace tolerated) is
//!   reclassified by status: many servers hold the connection open after
//!   delivering a complete HTML document.
//!
//! The body is retained only up to `max_read` bytes.

use std::time::Duration;

use futures_util::StreamExt;
use tracing::warn;

use lc_db::LinkStore;
use lc_schemas::{is_success_code, LinkRow, VerdictEntry, EXCEPTION_RETURN_CODE};

// ---------------------------------------------------------------------------
// Config + report
// ---------------------------------------------------------------------------

/// The subset of checker configuration the fetcher consumes.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub user_agent: String,
    /// Whole-probe timeout, seconds (connect through last body byte).
    pub check_timeout: u64,
    /// Max bytes of body to retain.
    pub max_read: usize,
}

/// Outcome of one probe. Never an error: every failure mode collapses into
/// a report so the verdict recorder has exactly one shape to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    /// Final HTTP status, or [`EXCEPTION_RETURN_CODE`].
    pub return_code: i32,
    /// MIME type on success; exception string on failure.
    pub detail: String,
    /// Bounded body prefix (empty on transport failure).
    pub body: Vec<u8>,
}

impl ProbeReport {
    pub fn is_success(&self) -> bool {
        is_success_code(self.return_code)
    }

    fn exception(detail: String) -> Self {
        Self {
            return_code: EXCEPTION_RETURN_CODE,
            detail,
            body: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Probe
// ---------------------------------------------------------------------------

/// GET the target once and classify the outcome.
///
/// A fresh client (and therefore a fresh cookie jar) is built per probe;
/// sharing a jar across probes is deliberately avoided.
pub async fn probe(config: &FetchConfig, target: &str) -> ProbeReport {
    let client = match reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .cookie_store(true)
        .timeout(Duration::from_secs(config.check_timeout))
        .build()
    {
        Ok(c) => c,
        Err(e) => return ProbeReport::exception(format!("http client build failed: {e}")),
    };

    let resp = match client
        .get(target)
        .header(reqwest::header::ACCEPT, "*/*")
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => return ProbeReport::exception(exception_string(&e)),
    };

    let status = i32::from(resp.status().as_u16());
    let mime = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    // Bounded, chunk-wise body read so a mid-stream error leaves the
    // delivered prefix in hand.
    let mut body: Vec<u8> = Vec::new();
    let mut read_error: Option<String> = None;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let remaining = config.max_read.saturating_sub(body.len());
                body.extend_from_slice(&bytes[..bytes.len().min(remaining)]);
                if body.len() >= config.max_read {
                    break;
                }
            }
            Err(e) => {
                read_error = Some(exception_string(&e));
                break;
            }
        }
    }

    if let Some(err) = read_error {
        if is_html_mime(&mime) && ends_with_html_close(&body) {
            // Complete-looking HTML document: classify by status as if the
            // read had finished cleanly.
            return ProbeReport {
                return_code: status,
                detail: mime,
                body,
            };
        }
        return ProbeReport::exception(err);
    }

    ProbeReport {
        return_code: status,
        detail: mime,
        body,
    }
}

/// Exception string for the verdict history. Timeouts collapse to the
/// literal "timeout"; everything else carries the full source chain so
/// DNS/TLS causes stay visible.
fn exception_string(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        return "timeout".to_string();
    }
    let mut s = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        s.push_str(": ");
        s.push_str(&inner.to_string());
        source = inner.source();
    }
    s
}

fn is_html_mime(mime: &str) -> bool {
    mime.split(';')
        .next()
        .map(str::trim)
        .is_some_and(|m| m.eq_ignore_ascii_case("text/html"))
}

/// Does the (possibly truncated) body end with a closing `</html>` tag?
/// Case-insensitive; trailing whitespace and whitespace before the `>` are
/// tolerated (`</HTML >` qualifies).
fn ends_with_html_close(body: &[u8]) -> bool {
    let tail_start = body.len().saturating_sub(1024);
    let tail = String::from_utf8_lossy(&body[tail_start..]);
    let Some(before_close) = tail.trim_end().strip_suffix('>') else {
        return false;
    };
    before_close
        .trim_end()
        .to_ascii_lowercase()
        .ends_with("</html")
}

// ---------------------------------------------------------------------------
// Verdict recording
// ---------------------------------------------------------------------------

/// Probe the row's target, fold the outcome into its verdict history, and
/// persist it. A persistence failure is logged and swallowed: the round
/// continues and the next successful write carries the row forward.
pub async fn check_and_record(
    store: &dyn LinkStore,
    config: &FetchConfig,
    row: &mut LinkRow,
    history_capacity: usize,
    now_epoch: i64,
) -> ProbeReport {
    let report = probe(config, &row.target).await;

    row.record_probe(
        VerdictEntry {
            checked_at: now_epoch,
            return_code: report.return_code,
            detail: report.detail.clone(),
        },
        history_capacity,
    );

    if let Err(e) = store.update_row(row).await {
        warn!(
            identifier = %row.identifier,
            error = %format!("{e:#}"),
            "verdict persistence failed; continuing"
        );
    }

    report
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
