//! Ledger wiring shared by the daemon and the CLI.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use sp_config::secrets::{resolve_ledger_secrets, ResolvedLedgerSecrets};
use sp_config::{LedgerNetwork, LoadedConfig, SettlementConfig, UnusedKeyPolicy};
use sp_ledger::{Credential, LedgerClient, PaperLedger, RpcConfig, RpcLedgerClient};
use tracing::{info, warn};

/// Platform address used on the paper ledger when none is configured.
pub const PAPER_PLATFORM_ADDRESS: &str = "rPaperPlatformAccount111111111111";

/// Starting balance of the paper platform account.
pub const PAPER_PLATFORM_XRP: u32 = 100_000;

/// Typed configuration plus the resolved platform secret.
#[derive(Debug)]
pub struct LoadedSettings {
    pub config_hash: String,
    pub config: SettlementConfig,
    pub secrets: ResolvedLedgerSecrets,
}

/// Load layered config from `SP_CONFIG`, report unused keys, and resolve
/// secrets from the environment.
pub fn load_settings_from_env(policy: UnusedKeyPolicy) -> Result<LoadedSettings> {
    let loaded = sp_config::load_from_env().context("load layered config")?;
    settings_from_loaded(&loaded, policy)
}

pub fn settings_from_loaded(loaded: &LoadedConfig, policy: UnusedKeyPolicy) -> Result<LoadedSettings> {
    let config = SettlementConfig::from_config_json(&loaded.config_json)?;
    let report = sp_config::report_unused_keys(config.ledger.network, &loaded.config_json, policy)?;
    for pointer in &report.unused_leaf_pointers {
        warn!(pointer = %pointer, network = %report.network, "unused config key");
    }
    let secrets = resolve_ledger_secrets(&loaded.config_json)?;
    info!(config_hash = %loaded.config_hash, network = config.ledger.network.as_str(), "config loaded");
    Ok(LoadedSettings {
        config_hash: loaded.config_hash.clone(),
        config,
        secrets,
    })
}

/// A connected ledger client and the platform credential that signs on it.
pub struct LedgerWiring {
    pub ledger: Arc<dyn LedgerClient>,
    pub platform: Credential,
}

/// Build the ledger client for the configured network.
///
/// The paper ledger starts with a funded platform account. Real networks
/// require both `ledger.platform_address` and the secret resolved from the
/// configured environment variable.
pub async fn connect_ledger(cfg: &SettlementConfig, secrets: &ResolvedLedgerSecrets) -> Result<LedgerWiring> {
    match cfg.ledger.network {
        LedgerNetwork::Paper => {
            let address = cfg
                .ledger
                .platform_address
                .clone()
                .unwrap_or_else(|| PAPER_PLATFORM_ADDRESS.to_string());
            let secret = secrets
                .platform_secret
                .clone()
                .unwrap_or_else(|| "paper".to_string());
            let platform = Credential::new(address, secret);

            let paper = PaperLedger::new();
            paper.fund(&platform, PAPER_PLATFORM_XRP);
            warn!(address = platform.address(), "using in-memory paper ledger; nothing is settled");
            Ok(LedgerWiring {
                ledger: Arc::new(paper),
                platform,
            })
        }
        network => {
            let address = cfg
                .ledger
                .platform_address
                .clone()
                .ok_or_else(|| anyhow!("CONFIG_INVALID ledger.platform_address is required for {}", network.as_str()))?;
            let secret = secrets.platform_secret.clone().ok_or_else(|| {
                anyhow!("SECRETS_MISSING {} is not set", secrets.platform_secret_var)
            })?;
            let url = cfg
                .rpc_url()
                .ok_or_else(|| anyhow!("CONFIG_INVALID ledger.rpc_url missing"))?;

            let rpc_cfg = RpcConfig {
                url,
                request_timeout: Duration::from_secs(cfg.ledger.request_timeout_secs),
                submit_timeout: Duration::from_secs(cfg.ledger.submit_timeout_secs),
                poll_interval: Duration::from_millis(cfg.ledger.poll_interval_ms),
            };
            let client = RpcLedgerClient::connect(rpc_cfg)
                .await
                .with_context(|| format!("connect to {} ledger failed", network.as_str()))?;
            info!(network = network.as_str(), address = %address, "platform ledger client ready");
            Ok(LedgerWiring {
                ledger: Arc::new(client),
                platform: Credential::new(address, secret),
            })
        }
    }
}
