//! lc-config
//!
//! Layered YAML configuration for the link checker. Files merge in order
//! (later overrides earlier, objects deep-merged), canonicalize to sorted
//! compact JSON, and hash with SHA-256 so a run can be attributed to an
//! exact configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

/// Merged config plus its canonical form and hash.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_json: Value,
    pub canonical_json: String,
    pub config_hash: String,
}

/// Load + merge YAML files in order, then canonicalize to JSON and hash.
pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut merged = Value::Object(Default::default());

    for p in paths {
        let s = fs::read_to_string(p).with_context(|| format!("read config: {p}"))?;
        let yaml_val: serde_yaml::Value =
            serde_yaml::from_str(&s).with_context(|| format!("parse yaml: {p}"))?;
        let json_val = serde_json::to_value(yaml_val).context("yaml->json conversion failed")?;
        deep_merge(&mut merged, json_val);
    }

    let canonical = canonicalize_json(&merged);

    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    let hash = hex::encode(hasher.finalize());

    Ok(LoadedConfig {
        config_json: serde_json::from_str(&canonical).context("canonical json parse failed")?,
        canonical_json: canonical,
        config_hash: hash,
    })
}

/// Deep-merge: objects merge recursively; arrays replaced; scalars overwritten.
fn deep_merge(dst: &mut Value, src: Value) {
    match (dst, src) {
        (Value::Object(dst_map), Value::Object(src_map)) => {
            for (k, v) in src_map {
                match dst_map.get_mut(&k) {
                    Some(existing) => deep_merge(existing, v),
                    None => {
                        dst_map.insert(k, v);
                    }
                }
            }
        }
        (dst_slot, src_val) => {
            *dst_slot = src_val;
        }
    }
}

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
fn canonicalize_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).unwrap_or_else(|_| "{}".to_string())
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

// ---------------------------------------------------------------------------
// CheckerConfig
// ---------------------------------------------------------------------------

/// Typed checker configuration. All durations are seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Seconds between table reconciliations (one reconciliation cycle).
    pub table_update_cycle: u64,
    /// Blackout window for links whose last probe succeeded.
    pub good_recheck_min_interval: u64,
    /// Shorter blackout window for links whose last probe failed.
    pub bad_recheck_min_interval: u64,
    /// Minimum gap between consecutive probes of one owner's links.
    pub owner_revisit_min_interval: u64,
    /// Parallel worker count.
    pub num_workers: usize,
    /// Max links per owner per round.
    pub workset_owner_max_links: usize,
    /// Per-fetch timeout, seconds.
    pub check_timeout: u64,
    /// Literal User-Agent header value.
    pub user_agent: String,
    /// Max bytes of response body to retain.
    pub max_read: usize,
    /// A link becomes notification-worthy only after strictly more than
    /// this many consecutive failures (the history ring holds one more).
    pub notify_failure_threshold: usize,
    /// Minimum span, seconds, from the oldest trailing failure to now before
    /// a link is notification-worthy.
    pub notify_min_span: i64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            table_update_cycle: 604_800,          // weekly
            good_recheck_min_interval: 2_592_000, // 30 days
            bad_recheck_min_interval: 172_800,    // 2 days
            owner_revisit_min_interval: 5,
            num_workers: 6,
            workset_owner_max_links: 500,
            check_timeout: 30,
            user_agent: "linkcheck/0.0.1".to_string(),
            max_read: 1_048_576, // 1 MiB body prefix
            notify_failure_threshold: 7,
            notify_min_span: 2_592_000, // 30 days
        }
    }
}

impl CheckerConfig {
    /// Deserialize from a merged layered config. Missing keys take defaults;
    /// unknown keys are ignored (layered files may carry sections for other
    /// operational scripts).
    pub fn from_loaded(loaded: &LoadedConfig) -> Result<Self> {
        serde_json::from_value(loaded.config_json.clone())
            .context("checker config deserialization failed")
    }

    /// Load from YAML files in merge order.
    pub fn from_files(paths: &[&str]) -> Result<Self> {
        Self::from_loaded(&load_layered_yaml(paths)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
