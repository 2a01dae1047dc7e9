//! Ledger-facing request / response types.
//!
//! These are read-through views of the external ledger. Nothing here is cached
//! beyond the lifetime of a single settlement operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::amount::Drops;

/// Result code the ledger assigns to a successfully applied transaction.
pub const TES_SUCCESS: &str = "tesSUCCESS";

/// Seconds between the unix epoch and the ledger epoch (2000-01-01T00:00:00Z).
pub const LEDGER_EPOCH_OFFSET: i64 = 946_684_800;

/// Mint flag: the certificate may be transferred by its holder.
pub const MINT_FLAG_TRANSFERABLE: u32 = 8;

/// Convert a wall-clock instant into ledger epoch seconds.
pub fn to_ledger_time(t: DateTime<Utc>) -> i64 {
    t.timestamp() - LEDGER_EPOCH_OFFSET
}

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// A signing credential: the account address plus its secret seed.
///
/// **The secret is redacted in `Debug` output** and never leaves this process
/// except inside a submit request to the configured ledger endpoint.
#[derive(Clone)]
pub struct Credential {
    address: String,
    secret: String,
}

impl Credential {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            secret: secret.into(),
        }
    }

    /// The account address this credential signs for.
    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("address", &self.address)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Read views
// ---------------------------------------------------------------------------

/// `account_info` view. An account that does not exist is reported as
/// `LedgerError::AccountNotFound`, never as a zero-balance `AccountInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub address: String,
    pub balance: Drops,
    pub sequence: u32,
}

/// Definitive outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub hash: String,
    pub result_code: String,
    /// Identifier of a minted certificate, when the transaction minted one.
    pub nftoken_id: Option<String>,
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        self.result_code == TES_SUCCESS
    }
}

/// A transaction looked up by hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxLookup {
    pub hash: String,
    /// The account that signed and submitted the transaction.
    pub account: String,
    /// The signer's account sequence consumed by this transaction.
    pub sequence: u32,
    pub transaction_type: String,
    /// `None` while the transaction is not yet in a validated ledger.
    pub result_code: Option<String>,
    pub validated: bool,
    pub raw: Value,
}

/// Owner-directory object kinds the engine lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    Escrow,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Escrow => "escrow",
        }
    }
}

/// An entry in an account's owner directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerObject {
    pub index: String,
    /// Hash of the transaction that last modified this object.
    pub previous_txn_id: Option<String>,
    pub raw: Value,
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// The transactions the settlement engine submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction {
    /// Plain transfer; used to activate an unfunded destination.
    Payment { destination: String, amount: Drops },
    /// Lock `amount` until `finish_after` (ledger epoch seconds).
    EscrowCreate {
        destination: String,
        amount: Drops,
        finish_after: i64,
    },
    /// Release an escrow identified by its creator and the creator's sequence
    /// at creation time.
    EscrowFinish { owner: String, offer_sequence: u32 },
    /// Mint a certificate with a hex-encoded metadata URI.
    NfTokenMint {
        taxon: u32,
        uri_hex: String,
        flags: u32,
    },
}

impl Transaction {
    pub fn type_name(&self) -> &'static str {
        match self {
            Transaction::Payment { .. } => "Payment",
            Transaction::EscrowCreate { .. } => "EscrowCreate",
            Transaction::EscrowFinish { .. } => "EscrowFinish",
            Transaction::NfTokenMint { .. } => "NFTokenMint",
        }
    }

    /// Render the unsigned `tx_json` for `account`. Sequence and fee are filled
    /// in by the signing endpoint.
    pub fn to_tx_json(&self, account: &str) -> Value {
        match self {
            Transaction::Payment {
                destination,
                amount,
            } => json!({
                "TransactionType": "Payment",
                "Account": account,
                "Destination": destination,
                "Amount": amount.get().to_string(),
            }),
            Transaction::EscrowCreate {
                destination,
                amount,
                finish_after,
            } => json!({
                "TransactionType": "EscrowCreate",
                "Account": account,
                "Destination": destination,
                "Amount": amount.get().to_string(),
                "FinishAfter": finish_after,
            }),
            Transaction::EscrowFinish {
                owner,
                offer_sequence,
            } => json!({
                "TransactionType": "EscrowFinish",
                "Account": account,
                "Owner": owner,
                "OfferSequence": offer_sequence,
            }),
            Transaction::NfTokenMint {
                taxon,
                uri_hex,
                flags,
            } => json!({
                "TransactionType": "NFTokenMint",
                "Account": account,
                "NFTokenTaxon": taxon,
                "URI": uri_hex,
                "Flags": flags,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn credential_debug_redacts_secret() {
        let c = Credential::new("rPLATFORM", "sEdSuperSecretSeed");
        let dbg = format!("{c:?}");
        assert!(dbg.contains("rPLATFORM"));
        assert!(!dbg.contains("sEdSuperSecretSeed"));
    }

    #[test]
    fn ledger_time_is_offset_from_2000() {
        let t = Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_ledger_time(t), 0);
    }

    #[test]
    fn escrow_create_amount_is_drops_string() {
        let tx = Transaction::EscrowCreate {
            destination: "rWORKER".to_string(),
            amount: Drops::new(120_000_000).unwrap(),
            finish_after: 42,
        };
        let j = tx.to_tx_json("rPLATFORM");
        assert_eq!(j["Amount"], "120000000");
        assert_eq!(j["FinishAfter"], 42);
        assert_eq!(j["Account"], "rPLATFORM");
    }

    #[test]
    fn escrow_finish_names_owner_and_offer_sequence() {
        let tx = Transaction::EscrowFinish {
            owner: "rPLATFORM".to_string(),
            offer_sequence: 7,
        };
        let j = tx.to_tx_json("rPLATFORM");
        assert_eq!(j["TransactionType"], "EscrowFinish");
        assert_eq!(j["OfferSequence"], 7);
        assert_eq!(j["Owner"], "rPLATFORM");
    }
}
