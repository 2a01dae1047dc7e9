use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::LedgerNetwork;

/// Typed view of the merged config. Every field has a default, so an empty
/// document yields a working paper-ledger setup.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    pub ledger: LedgerSection,
    pub settlement: SettlementSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerSection {
    pub network: LedgerNetwork,
    /// Overrides [`LedgerNetwork::default_rpc_url`].
    pub rpc_url: Option<String>,
    pub request_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Address of the platform account that funds escrows and mints.
    pub platform_address: Option<String>,
    pub keys_env: LedgerKeysEnv,
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            network: LedgerNetwork::Paper,
            rpc_url: None,
            request_timeout_secs: 10,
            submit_timeout_secs: 30,
            poll_interval_ms: 1000,
            platform_address: None,
            keys_env: LedgerKeysEnv::default(),
        }
    }
}

/// Env var NAMES. Values never appear in config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerKeysEnv {
    pub platform_secret: String,
}

impl Default for LedgerKeysEnv {
    fn default() -> Self {
        Self {
            platform_secret: "SP_PLATFORM_SECRET".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementSection {
    /// Sent to a destination that has no account root yet.
    pub activation_reserve_xrp: u32,
    /// Headroom kept for transaction fees when checking the platform balance.
    pub fee_buffer_xrp: u32,
    /// Delay between validation and the earliest escrow release.
    pub escrow_release_delay_secs: i64,
    /// Rate used when neither the request nor the session carries one.
    pub default_hourly_rate: f64,
    pub certificate_taxon: u32,
    /// PENDING intents older than this are abandoned by reconciliation.
    pub intent_stale_after_secs: i64,
}

impl Default for SettlementSection {
    fn default() -> Self {
        Self {
            activation_reserve_xrp: 10,
            fee_buffer_xrp: 5,
            escrow_release_delay_secs: 7 * 24 * 60 * 60,
            default_hourly_rate: 15.0,
            certificate_taxon: 0,
            intent_stale_after_secs: 900,
        }
    }
}

impl SettlementConfig {
    pub fn from_config_json(config_json: &Value) -> Result<Self> {
        let cfg: SettlementConfig = serde_json::from_value(config_json.clone())
            .context("settlement config does not match expected shape")?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let s = &self.settlement;
        if !(s.default_hourly_rate.is_finite() && s.default_hourly_rate > 0.0) {
            bail!("CONFIG_INVALID settlement.default_hourly_rate must be a positive number");
        }
        if s.escrow_release_delay_secs <= 0 {
            bail!("CONFIG_INVALID settlement.escrow_release_delay_secs must be positive");
        }
        if s.intent_stale_after_secs <= 0 {
            bail!("CONFIG_INVALID settlement.intent_stale_after_secs must be positive");
        }
        let l = &self.ledger;
        if l.request_timeout_secs == 0 || l.submit_timeout_secs == 0 || l.poll_interval_ms == 0 {
            bail!("CONFIG_INVALID ledger timeouts and poll interval must be non-zero");
        }
        if l.network != LedgerNetwork::Paper && self.rpc_url().is_none() {
            bail!("CONFIG_INVALID ledger.rpc_url is required for {}", l.network.as_str());
        }
        Ok(())
    }

    /// Explicit `ledger.rpc_url`, else the network's public endpoint.
    pub fn rpc_url(&self) -> Option<String> {
        self.ledger
            .rpc_url
            .clone()
            .or_else(|| self.ledger.network.default_rpc_url().map(str::to_string))
    }
}
