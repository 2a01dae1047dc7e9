use std::sync::Arc;

use sp_ledger::{require_success, Credential, Drops, LedgerClient, LedgerError, Transaction};
use tracing::info;

use crate::error::SettlementError;
use crate::escrow::{submit_failure, EscrowFailure};
use crate::intent::IntentToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    AlreadyActive,
    Activated { tx_hash: String },
}

/// Makes sure a destination account exists before it receives an escrow.
pub struct AccountActivator {
    ledger: Arc<dyn LedgerClient>,
    reserve: Drops,
}

impl AccountActivator {
    pub fn new(ledger: Arc<dyn LedgerClient>, reserve: Drops) -> Self {
        Self { ledger, reserve }
    }

    pub fn reserve(&self) -> Drops {
        self.reserve
    }

    pub async fn is_active(&self, address: &str) -> Result<bool, SettlementError> {
        match self.ledger.account_info(address).await {
            Ok(_) => Ok(true),
            Err(LedgerError::AccountNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Fund `address` with the reserve from `funder` if it does not exist yet.
    ///
    /// An existing account is never funded again. The activation transfer is
    /// irreversible; a later failure in the same workflow does not undo it.
    /// A funding payment with no definitive result comes back as
    /// [`EscrowFailure::InDoubt`] so the caller keeps its intent open.
    pub async fn ensure_active(
        &self,
        token: &IntentToken,
        funder: &Credential,
        address: &str,
    ) -> Result<Activation, EscrowFailure> {
        if self.is_active(address).await? {
            return Ok(Activation::AlreadyActive);
        }

        let tx = Transaction::Payment {
            destination: address.to_string(),
            amount: self.reserve,
        };
        let outcome = self.ledger.submit(funder, &tx).await.map_err(submit_failure)?;
        let outcome = require_success(outcome).map_err(|e| EscrowFailure::Definitive(e.into()))?;

        info!(
            session_id = %token.session_id(),
            intent_id = %token.intent_id(),
            destination = address,
            drops = self.reserve.get(),
            tx_hash = %outcome.hash,
            "destination account activated"
        );
        Ok(Activation::Activated {
            tx_hash: outcome.hash,
        })
    }
}
