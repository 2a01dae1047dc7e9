use crate::amount::Drops;

/// Errors surfaced by a [`crate::LedgerClient`].
///
/// The distinction between [`LedgerError::NetworkUnavailable`] and
/// [`LedgerError::Unconfirmed`] matters to callers: the former guarantees the
/// request never reached the ledger as a submission, the latter means a
/// submission may have been applied and must be reconciled before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The address has no account root on the ledger (not activated).
    AccountNotFound(String),
    /// The source cannot cover the requested transfer plus reserves and fees.
    InsufficientBalance { have: Drops, need: Drops },
    /// The ledger applied or refused the transaction with a non-success code.
    SubmissionRejected { code: String },
    /// The endpoint could not be reached; nothing was submitted.
    NetworkUnavailable(String),
    /// A submission was sent but no definitive result arrived in time.
    Unconfirmed { hash: Option<String>, detail: String },
    /// Lookup by hash found nothing.
    TransactionNotFound(String),
    /// The endpoint answered with something we could not interpret.
    Malformed(String),
}

impl LedgerError {
    /// `true` when a transaction may exist on the ledger despite the error.
    pub fn outcome_unknown(&self) -> bool {
        matches!(self, LedgerError::Unconfirmed { .. })
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::AccountNotFound(addr) => write!(f, "account not found: {addr}"),
            LedgerError::InsufficientBalance { have, need } => write!(
                f,
                "insufficient balance: have {} XRP, need {} XRP",
                have.as_xrp(),
                need.as_xrp()
            ),
            LedgerError::SubmissionRejected { code } => {
                write!(f, "submission rejected by ledger: {code}")
            }
            LedgerError::NetworkUnavailable(msg) => write!(f, "ledger unreachable: {msg}"),
            LedgerError::Unconfirmed {
                hash: Some(h),
                detail,
            } => write!(f, "submission {h} unconfirmed: {detail}"),
            LedgerError::Unconfirmed { hash: None, detail } => {
                write!(f, "submission unconfirmed: {detail}")
            }
            LedgerError::TransactionNotFound(hash) => write!(f, "transaction not found: {hash}"),
            LedgerError::Malformed(msg) => write!(f, "malformed ledger response: {msg}"),
        }
    }
}

impl std::error::Error for LedgerError {}
