//! Shift certificates minted on the ledger.
//!
//! Metadata is compact JSON, hex-encoded into the mint URI. The ledger caps
//! the URI at 256 bytes; `job_type` is dropped first when over the cap.

use std::sync::Arc;

use serde::Serialize;
use sp_ledger::{require_success, Credential, Drops, LedgerClient, Transaction, MINT_FLAG_TRANSFERABLE};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SettlementError;
use crate::intent::IntentToken;

pub const MAX_METADATA_BYTES: usize = 256;

/// Facts embedded in a certificate.
#[derive(Debug, Clone, PartialEq)]
pub struct CertificateFacts {
    pub shift_id: Uuid,
    pub worker_id: Uuid,
    pub employer_id: Uuid,
    pub hours: f64,
    /// Same drops value as the escrow.
    pub amount: Drops,
    pub job_type: Option<String>,
}

#[derive(Serialize)]
struct Metadata<'a> {
    shift_id: Uuid,
    worker_id: Uuid,
    employer_id: Uuid,
    hours: f64,
    amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    job_type: Option<&'a str>,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// JSON metadata for `facts`, at most [`MAX_METADATA_BYTES`] long.
pub fn build_metadata(facts: &CertificateFacts) -> Result<String, SettlementError> {
    let mut meta = Metadata {
        shift_id: facts.shift_id,
        worker_id: facts.worker_id,
        employer_id: facts.employer_id,
        hours: round2(facts.hours),
        amount: facts.amount.as_xrp(),
        job_type: facts.job_type.as_deref(),
    };

    let encode = |m: &Metadata<'_>| {
        serde_json::to_string(m)
            .map_err(|e| SettlementError::InvalidInput(format!("certificate metadata: {e}")))
    };

    let mut json = encode(&meta)?;
    if json.len() > MAX_METADATA_BYTES && meta.job_type.is_some() {
        meta.job_type = None;
        json = encode(&meta)?;
    }
    if json.len() > MAX_METADATA_BYTES {
        return Err(SettlementError::InvalidInput(format!(
            "certificate metadata is {} bytes (limit {MAX_METADATA_BYTES})",
            json.len()
        )));
    }
    Ok(json)
}

pub struct CertificateMinter {
    ledger: Arc<dyn LedgerClient>,
    taxon: u32,
}

impl CertificateMinter {
    pub fn new(ledger: Arc<dyn LedgerClient>, taxon: u32) -> Self {
        Self { ledger, taxon }
    }

    /// Mint a certificate from `issuer`; returns the certificate id.
    pub async fn mint(
        &self,
        token: &IntentToken,
        issuer: &Credential,
        facts: &CertificateFacts,
    ) -> Result<String, SettlementError> {
        let json = build_metadata(facts)?;
        if facts.job_type.is_some() && !json.contains("\"job_type\"") {
            warn!(session_id = %facts.shift_id, "job_type dropped from certificate metadata");
        }

        let tx = Transaction::NfTokenMint {
            taxon: self.taxon,
            uri_hex: hex::encode_upper(json.as_bytes()),
            flags: MINT_FLAG_TRANSFERABLE,
        };
        let outcome = require_success(self.ledger.submit(issuer, &tx).await?)?;

        let id = outcome.nftoken_id.ok_or_else(|| {
            SettlementError::LedgerUnreachable(format!(
                "mint {} validated without a certificate id",
                outcome.hash
            ))
        })?;
        info!(
            session_id = %token.session_id(),
            tx_hash = %outcome.hash,
            certificate_id = %id,
            "certificate minted"
        );
        Ok(id)
    }
}
