use sp_ledger::{AmountError, LedgerError};
use uuid::Uuid;

use crate::status::TransitionError;

/// Where to get test-network funds.
pub const TESTNET_FAUCET_URL: &str = "https://xrpl.org/xrp-testnet-faucet.html";

/// Caller-facing failure of a settlement operation.
///
/// Raw ledger result codes never reach callers on their own; they are
/// translated into one of these categories by [`SettlementError::from_ledger_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    InvalidInput(String),
    NotFound(Uuid),
    /// The session is not in a state where the operation applies (already
    /// processed, concurrently processed, or never reached the pre-state).
    PreconditionFailed(String),
    InsufficientFunds(String),
    AccountNotActivated(String),
    LedgerSubmissionRejected { code: String },
    LedgerUnreachable(String),
    OwnerMismatch { expected: String, actual: String },
    EscrowNotFound(String),
    PermissionDenied(String),
    EntryGone(String),
    Storage(String),
}

impl SettlementError {
    /// Stable snake_case category string.
    pub fn category(&self) -> &'static str {
        match self {
            SettlementError::InvalidInput(_) => "invalid_input",
            SettlementError::NotFound(_) => "not_found",
            SettlementError::PreconditionFailed(_) => "precondition_failed",
            SettlementError::InsufficientFunds(_) => "insufficient_funds",
            SettlementError::AccountNotActivated(_) => "account_not_activated",
            SettlementError::LedgerSubmissionRejected { .. } => "ledger_submission_rejected",
            SettlementError::LedgerUnreachable(_) => "ledger_unreachable",
            SettlementError::OwnerMismatch { .. } => "owner_mismatch",
            SettlementError::EscrowNotFound(_) => "escrow_not_found",
            SettlementError::PermissionDenied(_) => "permission_denied",
            SettlementError::EntryGone(_) => "entry_gone",
            SettlementError::Storage(_) => "storage",
        }
    }

    /// Human-readable remediation.
    pub fn hint(&self) -> String {
        match self {
            SettlementError::InvalidInput(_) => {
                "Check the request fields and that both parties have linked a ledger address.".to_string()
            }
            SettlementError::NotFound(_) => "No shift exists with this id.".to_string(),
            SettlementError::PreconditionFailed(_) => {
                "The shift was already processed or is being processed; reload it before retrying.".to_string()
            }
            SettlementError::InsufficientFunds(_) => format!(
                "Fund the platform account, e.g. from the test network faucet: {TESTNET_FAUCET_URL}"
            ),
            SettlementError::AccountNotActivated(_) => {
                "The destination wallet is not activated; send it at least the base reserve first.".to_string()
            }
            SettlementError::LedgerSubmissionRejected { code } if code == "tecDST_TAG_NEEDED" => {
                "The destination wallet requires a destination tag; the worker must link a wallet without one.".to_string()
            }
            SettlementError::LedgerSubmissionRejected { .. } => {
                "The ledger refused the transaction; nothing was changed locally. Retry after checking the account.".to_string()
            }
            SettlementError::LedgerUnreachable(_) => {
                "The ledger could not be reached or did not confirm in time. Run intent reconciliation before retrying.".to_string()
            }
            SettlementError::OwnerMismatch { .. } => {
                "The escrow was created by a different account than the configured platform account.".to_string()
            }
            SettlementError::EscrowNotFound(_) => {
                "The escrow could not be located; its creation reference may be stale.".to_string()
            }
            SettlementError::PermissionDenied(_) => {
                "The escrow cannot be released yet, or the signer is not allowed to release it.".to_string()
            }
            SettlementError::EntryGone(_) => {
                "The escrow was already released or cancelled.".to_string()
            }
            SettlementError::Storage(_) => "Internal storage error; retry later.".to_string(),
        }
    }

    /// Translate a non-success ledger result code.
    pub fn from_ledger_code(code: &str) -> Self {
        match code {
            "tecUNFUNDED" | "tecUNFUNDED_PAYMENT" | "tecINSUFFICIENT_RESERVE" => {
                SettlementError::InsufficientFunds("the funding account cannot cover this transfer".to_string())
            }
            "tecNO_DST" | "tecNO_DST_INSUF_XRP" => {
                SettlementError::AccountNotActivated("the destination account does not exist on the ledger".to_string())
            }
            "tecNO_TARGET" => {
                SettlementError::EscrowNotFound("no escrow matches the recovered sequence".to_string())
            }
            "tecNO_PERMISSION" => {
                SettlementError::PermissionDenied("release not permitted at this time".to_string())
            }
            "tecNO_ENTRY" => SettlementError::EntryGone("escrow no longer exists".to_string()),
            other => SettlementError::LedgerSubmissionRejected {
                code: other.to_string(),
            },
        }
    }

    pub(crate) fn storage(e: anyhow::Error) -> Self {
        SettlementError::Storage(format!("{e:#}"))
    }
}

impl std::fmt::Display for SettlementError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementError::InvalidInput(m) => write!(f, "invalid input: {m}"),
            SettlementError::NotFound(id) => write!(f, "shift not found: {id}"),
            SettlementError::PreconditionFailed(m) => write!(f, "precondition failed: {m}"),
            SettlementError::InsufficientFunds(m) => write!(f, "insufficient funds: {m}"),
            SettlementError::AccountNotActivated(m) => write!(f, "account not activated: {m}"),
            SettlementError::LedgerSubmissionRejected { code } => {
                write!(f, "ledger rejected submission: {code}")
            }
            SettlementError::LedgerUnreachable(m) => write!(f, "ledger unreachable: {m}"),
            SettlementError::OwnerMismatch { expected, actual } => {
                write!(f, "escrow owner mismatch: expected {expected}, found {actual}")
            }
            SettlementError::EscrowNotFound(m) => write!(f, "escrow not found: {m}"),
            SettlementError::PermissionDenied(m) => write!(f, "permission denied: {m}"),
            SettlementError::EntryGone(m) => write!(f, "escrow gone: {m}"),
            SettlementError::Storage(m) => write!(f, "storage error: {m}"),
        }
    }
}

impl std::error::Error for SettlementError {}

impl From<LedgerError> for SettlementError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AccountNotFound(addr) => SettlementError::AccountNotActivated(addr),
            LedgerError::InsufficientBalance { .. } => SettlementError::InsufficientFunds(e.to_string()),
            LedgerError::SubmissionRejected { code } => SettlementError::from_ledger_code(&code),
            LedgerError::TransactionNotFound(hash) => {
                SettlementError::EscrowNotFound(format!("creation transaction {hash} not found"))
            }
            LedgerError::NetworkUnavailable(_) | LedgerError::Unconfirmed { .. } | LedgerError::Malformed(_) => {
                SettlementError::LedgerUnreachable(e.to_string())
            }
        }
    }
}

impl From<TransitionError> for SettlementError {
    fn from(e: TransitionError) -> Self {
        SettlementError::PreconditionFailed(e.to_string())
    }
}

impl From<AmountError> for SettlementError {
    fn from(e: AmountError) -> Self {
        SettlementError::InvalidInput(format!("amount: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_codes_map_to_release_categories() {
        assert_eq!(SettlementError::from_ledger_code("tecNO_TARGET").category(), "escrow_not_found");
        assert_eq!(SettlementError::from_ledger_code("tecNO_PERMISSION").category(), "permission_denied");
        assert_eq!(SettlementError::from_ledger_code("tecNO_ENTRY").category(), "entry_gone");
    }

    #[test]
    fn unfunded_points_at_faucet() {
        let e = SettlementError::from_ledger_code("tecUNFUNDED");
        assert_eq!(e.category(), "insufficient_funds");
        assert!(e.hint().contains(TESTNET_FAUCET_URL));
    }

    #[test]
    fn unknown_code_is_carried_but_translated() {
        let e = SettlementError::from_ledger_code("tecKILLED");
        assert_eq!(e.category(), "ledger_submission_rejected");
        assert!(!e.hint().contains("tecKILLED"));
    }

    #[test]
    fn unconfirmed_is_unreachable() {
        let e: SettlementError = LedgerError::Unconfirmed {
            hash: Some("AB".to_string()),
            detail: "timeout".to_string(),
        }
        .into();
        assert_eq!(e.category(), "ledger_unreachable");
    }

    #[test]
    fn every_category_has_a_hint() {
        let all = [
            SettlementError::InvalidInput(String::new()),
            SettlementError::NotFound(Uuid::nil()),
            SettlementError::PreconditionFailed(String::new()),
            SettlementError::InsufficientFunds(String::new()),
            SettlementError::AccountNotActivated(String::new()),
            SettlementError::LedgerSubmissionRejected { code: "x".to_string() },
            SettlementError::LedgerUnreachable(String::new()),
            SettlementError::OwnerMismatch {
                expected: "a".to_string(),
                actual: "b".to_string(),
            },
            SettlementError::EscrowNotFound(String::new()),
            SettlementError::PermissionDenied(String::new()),
            SettlementError::EntryGone(String::new()),
            SettlementError::Storage(String::new()),
        ];
        for e in all {
            assert!(!e.hint().is_empty(), "{} has no hint", e.category());
        }
    }
}
