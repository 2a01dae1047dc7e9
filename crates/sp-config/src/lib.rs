//! Layered YAML configuration for the settlement engine.
//!
//! Documents are deep-merged in order (later wins), converted to JSON, checked
//! for secret literals and hashed. Typed settings are read from the merged JSON
//! with [`SettlementConfig::from_config_json`]; secrets are resolved from the
//! environment by [`secrets::resolve_ledger_secrets`].

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fs;

pub mod secrets;
mod settlement;

pub use settlement::{LedgerKeysEnv, LedgerSection, SettlementConfig, SettlementSection};

/// Env var holding a comma-separated list of YAML paths.
pub const ENV_CONFIG_PATHS: &str = "SP_CONFIG";

/// Known secret-like prefixes. A leaf string starting with one of these aborts
/// loading with `CONFIG_SECRET_DETECTED`.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",
    "sk_live",
    "sk_test",
    "AKIA",
    "-----BEGIN",
    "ghp_",
    "gho_",
    "glpat-",
    "xoxb-",
    "xoxp-",
    "sEd", // ed25519 family seed
];

const BASE58_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

// ---------------------------------------------------------------------------
// Ledger network
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerNetwork {
    /// In-process deterministic ledger; no network I/O.
    #[default]
    Paper,
    Testnet,
    Mainnet,
}

impl LedgerNetwork {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerNetwork::Paper => "paper",
            LedgerNetwork::Testnet => "testnet",
            LedgerNetwork::Mainnet => "mainnet",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paper" => Ok(LedgerNetwork::Paper),
            "testnet" => Ok(LedgerNetwork::Testnet),
            "mainnet" => Ok(LedgerNetwork::Mainnet),
            other => bail!("invalid ledger network: {other} (expected paper|testnet|mainnet)"),
        }
    }

    /// Public JSON-RPC endpoint used when `ledger.rpc_url` is absent.
    pub fn default_rpc_url(&self) -> Option<&'static str> {
        match self {
            LedgerNetwork::Paper => None,
            LedgerNetwork::Testnet => Some("https://s.altnet.rippletest.net:51234"),
            LedgerNetwork::Mainnet => Some("https://xrplcluster.com"),
        }
    }

    /// Whether submissions from this network move real value.
    pub fn requires_platform_secret(&self) -> bool {
        !matches!(self, LedgerNetwork::Paper)
    }
}

// ---------------------------------------------------------------------------
// Unused-key guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnusedKeyPolicy {
    Warn,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnusedKeyReport {
    pub network: String,
    /// Consumed JSON-pointer prefixes used for this analysis (sorted, unique)
    pub consumed_prefixes: Vec<String>,
    /// Unused leaf pointers (sorted)
    pub unused_leaf_pointers: Vec<String>,
}

impl UnusedKeyReport {
    pub fn is_clean(&self) -> bool {
        self.unused_leaf_pointers.is_empty()
    }
}

/// JSON-pointer prefixes actually read for a given ledger network.
///
/// Keep this in step with `SettlementConfig` and `secrets`: a prefix listed
/// here must have a reader.
pub fn consumed_pointers_for_network(network: LedgerNetwork) -> &'static [&'static str] {
    match network {
        LedgerNetwork::Paper => &[
            "/ledger/network",
            "/ledger/platform_address",
            "/ledger/keys_env/platform_secret",
            "/settlement",
        ],
        LedgerNetwork::Testnet | LedgerNetwork::Mainnet => &[
            "/ledger/network",
            "/ledger/platform_address",
            "/ledger/keys_env/platform_secret",
            "/ledger/rpc_url",
            "/ledger/request_timeout_secs",
            "/ledger/submit_timeout_secs",
            "/ledger/poll_interval_ms",
            "/settlement",
        ],
    }
}

/// Produce an unused-key report for `network`.
/// With [`UnusedKeyPolicy::Fail`] an unclean report is an error.
pub fn report_unused_keys(
    network: LedgerNetwork,
    config_json: &Value,
    policy: UnusedKeyPolicy,
) -> Result<UnusedKeyReport> {
    let consumed: BTreeSet<String> = consumed_pointers_for_network(network)
        .iter()
        .map(|p| normalize_pointer(p))
        .collect();
    let consumed_prefixes: Vec<String> = consumed.into_iter().collect();

    let mut leaves: Vec<String> = Vec::new();
    collect_leaf_pointers(config_json, "", &mut leaves);

    let mut unused: Vec<String> = leaves
        .into_iter()
        .filter(|lp| !consumed_prefixes.iter().any(|cp| is_prefix_pointer(cp, lp)))
        .collect();
    unused.sort();
    unused.dedup();

    let report = UnusedKeyReport {
        network: network.as_str().to_string(),
        consumed_prefixes,
        unused_leaf_pointers: unused,
    };

    if policy == UnusedKeyPolicy::Fail && !report.is_clean() {
        bail!(
            "CONFIG_UNUSED_KEYS (network={}): {} unused config leaf key(s) detected. \
            Remove them or update the consumed registry. First few: {}",
            report.network,
            report.unused_leaf_pointers.len(),
            preview_list(&report.unused_leaf_pointers, 12)
        );
    }

    Ok(report)
}

fn normalize_pointer(p: &str) -> String {
    let mut s = p.trim().to_string();
    if s.is_empty() {
        return "/".to_string();
    }
    if !s.starts_with('/') {
        s.insert(0, '/');
    }
    while s.ends_with('/') && s.len() > 1 {
        s.pop();
    }
    s
}

/// "/a/b" consumes "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if prefix == "/" || leaf == prefix {
        return true;
    }
    leaf.starts_with(prefix) && leaf.as_bytes().get(prefix.len()) == Some(&b'/')
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, escape_pointer_token(k));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                let next = format!("{}/{}", prefix, i);
                collect_leaf_pointers(vv, &next, out);
            }
        }
        _ => {
            let p = if prefix.is_empty() {
                "/".to_string()
            } else {
                prefix.to_string()
            };
            out.push(p);
        }
    }
}

fn escape_pointer_token(s: &str) -> String {
    s.replace('~', "~0").replace('/', "~1")
}

fn preview_list(items: &[String], n: usize) -> String {
    let take = items.iter().take(n).cloned().collect::<Vec<_>>();
    format!("{:?}", take)
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

/// Load from [`ENV_CONFIG_PATHS`]; an unset or blank variable yields the
/// all-defaults (empty) config.
pub fn load_from_env() -> Result<LoadedConfig> {
    let raw = std::env::var(ENV_CONFIG_PATHS).unwrap_or_default();
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paths.is_empty() {
        return load_layered_yaml_from_strings(&[]);
    }
    load_layered_yaml(&paths)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses as null; treat it as "no overrides".
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // Key order is deterministic for a deterministic sequence of input documents.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    for ptr in leaves {
        if let Some(s) = v.pointer(&ptr).and_then(Value::as_str) {
            if looks_like_secret(s) {
                bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", ptr);
            }
        }
    }
    Ok(())
}

fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p)) || looks_like_ledger_seed(t)
}

/// `s` followed by base58, 29..=35 chars total.
fn looks_like_ledger_seed(t: &str) -> bool {
    (29..=35).contains(&t.len())
        && t.starts_with('s')
        && t.chars().all(|c| BASE58_ALPHABET.contains(c))
}
