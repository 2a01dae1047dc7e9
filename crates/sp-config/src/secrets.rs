//! Runtime secret resolution.
//!
//! # Contract
//! - Config YAML stores only **env var NAMES** (e.g. `"SP_PLATFORM_SECRET"`).
//! - Binaries call [`resolve_ledger_secrets`] once at startup and pass the
//!   result into constructors; nothing else reads secret env vars.
//! - `Debug` output is redacted.
//! - Error messages name the env var, never the value.
//!
//! | Network  | Platform secret |
//! |----------|-----------------|
//! | mainnet  | required        |
//! | testnet  | required        |
//! | paper    | optional        |

use anyhow::{bail, Result};
use serde_json::Value;

use crate::LedgerNetwork;

const DEFAULT_PLATFORM_SECRET_VAR: &str = "SP_PLATFORM_SECRET";

#[derive(Clone)]
pub struct ResolvedLedgerSecrets {
    pub network: LedgerNetwork,
    /// Seed of the platform signing account. `None` if the named env var was
    /// absent or blank (only possible on `paper`).
    pub platform_secret: Option<String>,
    /// The env var name the secret was read from, for diagnostics.
    pub platform_secret_var: String,
}

impl std::fmt::Debug for ResolvedLedgerSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedLedgerSecrets")
            .field("network", &self.network)
            .field(
                "platform_secret",
                &self.platform_secret.as_ref().map(|_| "<REDACTED>"),
            )
            .field("platform_secret_var", &self.platform_secret_var)
            .finish()
    }
}

/// Non-empty trimmed string at `pointer`.
fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// `None` if unset or blank.
fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Resolve the platform signing secret for the network named at
/// `/ledger/network` (default `paper`).
///
/// # Errors
/// `SECRETS_MISSING` naming the env var when a required secret is absent;
/// `SECRETS_UNKNOWN_NETWORK` for an unrecognised network.
pub fn resolve_ledger_secrets(config_json: &Value) -> Result<ResolvedLedgerSecrets> {
    let network_raw =
        read_str_at(config_json, "/ledger/network").unwrap_or_else(|| "paper".to_string());
    let network = match LedgerNetwork::parse(&network_raw) {
        Ok(n) => n,
        Err(_) => bail!(
            "SECRETS_UNKNOWN_NETWORK: unrecognised network '{}'; \
             expected one of: paper | testnet | mainnet",
            network_raw,
        ),
    };

    let var = read_str_at(config_json, "/ledger/keys_env/platform_secret")
        .unwrap_or_else(|| DEFAULT_PLATFORM_SECRET_VAR.to_string());
    let platform_secret = resolve_env(&var);

    if network.requires_platform_secret() && platform_secret.is_none() {
        bail!(
            "SECRETS_MISSING network={}: required env var '{}' \
             (platform secret) is not set or empty",
            network.as_str(),
            var,
        );
    }

    Ok(ResolvedLedgerSecrets {
        network,
        platform_secret,
        platform_secret_var: var,
    })
}
