//! Escrow creation and release.
//!
//! An open escrow is identified by `(owner, sequence of the creating
//! transaction)`. The sequence is not stored locally; release recovers it by
//! looking up the creation transaction, which is a plain read and may be
//! retried. The submissions themselves are never retried here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sp_ledger::{
    require_success, to_ledger_time, Credential, Drops, LedgerClient, LedgerError, ObjectKind,
    Transaction, TxLookup,
};
use tracing::{info, warn};

use crate::activator::{AccountActivator, Activation};
use crate::error::SettlementError;
use crate::intent::IntentToken;

/// Attempts for the creation-transaction lookup during release.
const LOOKUP_ATTEMPTS: u32 = 3;
const LOOKUP_BACKOFF: Duration = Duration::from_millis(250);

/// Failure of a coordinator step.
///
/// `InDoubt` means a submission left this process and no definitive result
/// came back: the transaction may or may not be on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscrowFailure {
    Definitive(SettlementError),
    InDoubt {
        tx_hash: Option<String>,
        error: SettlementError,
    },
}

impl EscrowFailure {
    pub fn error(&self) -> &SettlementError {
        match self {
            EscrowFailure::Definitive(e) | EscrowFailure::InDoubt { error: e, .. } => e,
        }
    }
}

impl From<SettlementError> for EscrowFailure {
    fn from(e: SettlementError) -> Self {
        EscrowFailure::Definitive(e)
    }
}

/// Map a submit error, keeping the hash when the outcome is unknown.
pub(crate) fn submit_failure(e: LedgerError) -> EscrowFailure {
    if !e.outcome_unknown() {
        return EscrowFailure::Definitive(e.into());
    }
    let tx_hash = match &e {
        LedgerError::Unconfirmed { hash, .. } => hash.clone(),
        _ => None,
    };
    EscrowFailure::InDoubt {
        tx_hash,
        error: e.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowCreated {
    pub tx_hash: String,
    /// The destination had to be activated first.
    pub activated: bool,
}

pub struct EscrowCoordinator {
    ledger: Arc<dyn LedgerClient>,
    activator: AccountActivator,
    fee_buffer: Drops,
}

impl EscrowCoordinator {
    pub fn new(ledger: Arc<dyn LedgerClient>, activation_reserve: Drops, fee_buffer: Drops) -> Self {
        Self {
            activator: AccountActivator::new(ledger.clone(), activation_reserve),
            ledger,
            fee_buffer,
        }
    }

    pub fn activator(&self) -> &AccountActivator {
        &self.activator
    }

    /// Lock `amount` for `destination`, releasable after `release_after`.
    ///
    /// Required balance is `amount + fee buffer`, plus the activation reserve
    /// when the destination does not exist yet.
    pub async fn create(
        &self,
        token: &IntentToken,
        source: &Credential,
        destination: &str,
        amount: Drops,
        release_after: DateTime<Utc>,
    ) -> Result<EscrowCreated, EscrowFailure> {
        if amount == Drops::ZERO {
            return Err(SettlementError::InvalidInput("escrow amount must be positive".to_string()).into());
        }

        let src = self
            .ledger
            .account_info(source.address())
            .await
            .map_err(SettlementError::from)?;
        let dest_active = self.activator.is_active(destination).await?;

        let mut required = amount.saturating_add(self.fee_buffer);
        if !dest_active {
            required = required.saturating_add(self.activator.reserve());
        }
        if src.balance < required {
            let e = LedgerError::InsufficientBalance {
                have: src.balance,
                need: required,
            };
            warn!(
                session_id = %token.session_id(),
                have = src.balance.get(),
                need = required.get(),
                "platform balance too low for escrow"
            );
            return Err(SettlementError::from(e).into());
        }

        let activated = if dest_active {
            false
        } else {
            matches!(
                self.activator.ensure_active(token, source, destination).await?,
                Activation::Activated { .. }
            )
        };

        let tx = Transaction::EscrowCreate {
            destination: destination.to_string(),
            amount,
            finish_after: to_ledger_time(release_after),
        };
        let outcome = self.ledger.submit(source, &tx).await.map_err(submit_failure)?;
        let outcome = require_success(outcome).map_err(|e| EscrowFailure::Definitive(e.into()))?;

        info!(
            session_id = %token.session_id(),
            intent_id = %token.intent_id(),
            destination,
            drops = amount.get(),
            tx_hash = %outcome.hash,
            "escrow created"
        );
        Ok(EscrowCreated {
            tx_hash: outcome.hash,
            activated,
        })
    }

    /// Release the escrow created by `creation_tx`. Returns the release hash.
    pub async fn finish(
        &self,
        token: &IntentToken,
        owner: &Credential,
        creation_tx: &str,
    ) -> Result<String, EscrowFailure> {
        let created = self.lookup_creation(creation_tx).await?;

        if created.account != owner.address() {
            return Err(SettlementError::OwnerMismatch {
                expected: owner.address().to_string(),
                actual: created.account,
            }
            .into());
        }
        if created.transaction_type != "EscrowCreate" {
            return Err(SettlementError::EscrowNotFound(format!(
                "{creation_tx} is a {} transaction",
                created.transaction_type
            ))
            .into());
        }

        self.check_escrow_object(token, owner.address(), creation_tx).await;

        let tx = Transaction::EscrowFinish {
            owner: owner.address().to_string(),
            offer_sequence: created.sequence,
        };
        let outcome = self.ledger.submit(owner, &tx).await.map_err(submit_failure)?;
        let outcome = require_success(outcome).map_err(|e| EscrowFailure::Definitive(e.into()))?;

        info!(
            session_id = %token.session_id(),
            intent_id = %token.intent_id(),
            offer_sequence = created.sequence,
            tx_hash = %outcome.hash,
            "escrow released"
        );
        Ok(outcome.hash)
    }

    /// Sequence recovery: the one retryable read in the release path.
    async fn lookup_creation(&self, creation_tx: &str) -> Result<TxLookup, SettlementError> {
        let mut attempt = 1;
        loop {
            match self.ledger.lookup_transaction(creation_tx).await {
                Ok(tx) => return Ok(tx),
                Err(LedgerError::NetworkUnavailable(e)) if attempt < LOOKUP_ATTEMPTS => {
                    warn!(tx_hash = creation_tx, attempt, error = %e, "creation lookup failed; retrying");
                    attempt += 1;
                    tokio::time::sleep(LOOKUP_BACKOFF).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Cross-check that the escrow object still exists. Never blocks release:
    /// a previous release may have succeeded without being recorded locally,
    /// and the ledger will say so definitively.
    async fn check_escrow_object(&self, token: &IntentToken, owner: &str, creation_tx: &str) {
        match self.ledger.list_objects(owner, ObjectKind::Escrow).await {
            Ok(objects) => {
                let found = objects
                    .iter()
                    .any(|o| o.previous_txn_id.as_deref() == Some(creation_tx));
                if !found {
                    warn!(
                        session_id = %token.session_id(),
                        tx_hash = creation_tx,
                        open_escrows = objects.len(),
                        "no open escrow object matches creation tx"
                    );
                }
            }
            Err(e) => {
                warn!(session_id = %token.session_id(), error = %e, "escrow object check skipped");
            }
        }
    }
}
