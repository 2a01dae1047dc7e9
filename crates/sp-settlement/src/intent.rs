//! Write-ahead intents and the capability token that ledger submissions require.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use sp_db::{IntentKind, SessionUpdate};

// ---------------------------------------------------------------------------
// IntentToken
// ---------------------------------------------------------------------------

/// Proof that a settlement intent row was persisted before a ledger call.
///
/// Every submitting method on [`crate::EscrowCoordinator`],
/// [`crate::AccountActivator`] and [`crate::CertificateMinter`] takes
/// `&IntentToken`. The `_priv` field is `pub(crate)`, so code outside this
/// crate cannot build one with a struct literal:
///
/// ```text
/// IntentToken::from_persisted_intent(intent_id, session_id)   // allowed
/// IntentToken { _priv: (), intent_id, session_id }            // private field
/// ```
///
/// Passing ids of an intent that was never inserted breaks the protocol; the
/// partial unique index on open intents is the authoritative guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentToken {
    pub(crate) _priv: (),
    intent_id: Uuid,
    session_id: Uuid,
}

impl IntentToken {
    /// Build a token for an intent the store has just accepted.
    pub fn from_persisted_intent(intent_id: Uuid, session_id: Uuid) -> Self {
        Self {
            _priv: (),
            intent_id,
            session_id,
        }
    }

    pub fn intent_id(&self) -> Uuid {
        self.intent_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }
}

// ---------------------------------------------------------------------------
// IntentPayload
// ---------------------------------------------------------------------------

/// The settlement facts an intent was opened with; enough for reconciliation
/// to finish the status transition without recomputing anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum IntentPayload {
    Validate {
        start_time_utc: DateTime<Utc>,
        end_time_utc: DateTime<Utc>,
        hourly_rate: f64,
        hours: f64,
        amount_drops: i64,
        destination: String,
        release_after_utc: DateTime<Utc>,
    },
    Release {
        escrow_tx: String,
    },
}

impl IntentPayload {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentPayload::Validate { .. } => IntentKind::EscrowCreate,
            IntentPayload::Release { .. } => IntentKind::EscrowFinish,
        }
    }

    /// Ledger transaction type this intent submits.
    pub fn ledger_tx_type(&self) -> &'static str {
        match self {
            IntentPayload::Validate { .. } => "EscrowCreate",
            IntentPayload::Release { .. } => "EscrowFinish",
        }
    }

    /// Fields to write alongside the status change once `tx_hash` is known
    /// to have succeeded.
    pub fn session_update(&self, tx_hash: &str, nft_id: Option<String>) -> SessionUpdate {
        match self {
            IntentPayload::Validate {
                start_time_utc,
                end_time_utc,
                hourly_rate,
                hours,
                amount_drops,
                ..
            } => SessionUpdate {
                start_time_utc: Some(*start_time_utc),
                end_time_utc: Some(*end_time_utc),
                hourly_rate: Some(*hourly_rate),
                hours: Some(*hours),
                amount_total_drops: Some(*amount_drops),
                escrow_tx: Some(tx_hash.to_string()),
                nft_id,
                ..SessionUpdate::default()
            },
            IntentPayload::Release { .. } => SessionUpdate {
                payment_tx: Some(tx_hash.to_string()),
                ..SessionUpdate::default()
            },
        }
    }
}
