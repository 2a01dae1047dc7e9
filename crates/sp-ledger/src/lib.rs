//! sp-ledger
//!
//! Ledger facade for the settlement engine: drops arithmetic, transaction
//! types, the [`LedgerClient`] contract, a JSON-RPC implementation and a
//! deterministic in-process paper ledger.

pub mod amount;
pub mod paper;
pub mod rpc;
pub mod types;

mod client;
mod error;

pub use amount::{
    drops_to_xrp, normalize_xrp, settlement_amount, xrp_to_drops, AmountError, Drops,
    DROPS_PER_XRP,
};
pub use client::{require_success, LedgerClient};
pub use error::LedgerError;
pub use paper::PaperLedger;
pub use rpc::{RpcConfig, RpcLedgerClient};
pub use types::{
    to_ledger_time, AccountInfo, Credential, LedgerObject, ObjectKind, SubmitOutcome,
    Transaction, TxLookup, LEDGER_EPOCH_OFFSET, MINT_FLAG_TRANSFERABLE, TES_SUCCESS,
};
