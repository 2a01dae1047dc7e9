//! The ledger facade consumed by the settlement engine.

use crate::error::LedgerError;
use crate::types::{AccountInfo, Credential, LedgerObject, ObjectKind, SubmitOutcome, Transaction, TxLookup};

/// Ledger RPC contract.
///
/// Implementations must be `Send + Sync` so a single connected instance can be
/// shared (via `Arc`) by concurrent request-scoped workflows. There is no
/// module-level connection; the owner constructs, shares and drops it.
///
/// # Submission semantics
/// [`LedgerClient::submit`] is **not idempotent** and is never retried by an
/// implementation. It returns only once the ledger reports a definitive result
/// code; a non-success code is returned as `Ok(SubmitOutcome)` so callers can
/// translate it. Lack of a definitive result within the configured bound is
/// reported as [`LedgerError::Unconfirmed`].
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Short identifier for logs (`"rpc"`, `"paper"`).
    fn name(&self) -> &'static str;

    /// Balance and next sequence; [`LedgerError::AccountNotFound`] when the
    /// account has not been activated.
    async fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError>;

    /// Sign `tx` with `signer`, submit it, and wait for a definitive result.
    async fn submit(&self, signer: &Credential, tx: &Transaction) -> Result<SubmitOutcome, LedgerError>;

    /// Look up a transaction by hash.
    async fn lookup_transaction(&self, hash: &str) -> Result<TxLookup, LedgerError>;

    /// List owner-directory objects of `kind` for `owner`.
    async fn list_objects(&self, owner: &str, kind: ObjectKind) -> Result<Vec<LedgerObject>, LedgerError>;

    /// End the connection. Later calls fail with
    /// [`LedgerError::NetworkUnavailable`]; calling it twice is harmless.
    async fn disconnect(&self) {}
}

/// Require a success code, turning anything else into
/// [`LedgerError::SubmissionRejected`].
pub fn require_success(outcome: SubmitOutcome) -> Result<SubmitOutcome, LedgerError> {
    if outcome.is_success() {
        Ok(outcome)
    } else {
        Err(LedgerError::SubmissionRejected {
            code: outcome.result_code,
        })
    }
}
