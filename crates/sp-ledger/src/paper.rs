//! Deterministic in-process paper ledger.
//!
//! Models only what the settlement engine touches: account roots with a base
//! reserve, escrows keyed by `(owner, create sequence)`, certificate mints and
//! a transaction index. Hashes are sha256 over a running counter, so two runs
//! with the same inputs produce the same hashes. No network I/O.
//!
//! Fault hooks let tests drive the error paths a live ledger would produce.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::amount::Drops;
use crate::client::LedgerClient;
use crate::error::LedgerError;
use crate::types::{
    to_ledger_time, AccountInfo, Credential, LedgerObject, ObjectKind, SubmitOutcome,
    Transaction, TxLookup, TES_SUCCESS,
};

/// Flat fee charged per applied transaction.
pub const PAPER_FEE_DROPS: i64 = 12;

/// Base reserve every account root must keep.
pub const PAPER_RESERVE_XRP: u32 = 10;

/// Certificate URIs above this many bytes are malformed.
const MAX_URI_BYTES: usize = 256;

#[derive(Debug, Clone)]
struct PaperAccount {
    balance: i64,
    sequence: u32,
    /// `None` for accounts created by an incoming payment; they cannot sign.
    secret: Option<String>,
}

#[derive(Debug, Clone)]
struct PaperEscrow {
    destination: String,
    amount: i64,
    finish_after: i64,
    create_hash: String,
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Unreachable,
    /// Apply the next submission but report it as unconfirmed.
    LoseConfirmation,
}

#[derive(Debug, Default)]
struct PaperState {
    accounts: BTreeMap<String, PaperAccount>,
    escrows: BTreeMap<(String, u32), PaperEscrow>,
    txs: BTreeMap<String, TxLookup>,
    minted: Vec<String>,
    tx_counter: u64,
    clock_offset_secs: i64,
    unreachable: bool,
    next_code: Option<String>,
    next_fault: Option<Fault>,
    submits: BTreeMap<&'static str, usize>,
}

impl PaperState {
    fn now(&self) -> i64 {
        to_ledger_time(Utc::now()) + self.clock_offset_secs
    }

    fn next_hash(&mut self, account: &str, tx: &Transaction) -> String {
        self.tx_counter += 1;
        let mut h = Sha256::new();
        h.update(self.tx_counter.to_be_bytes());
        h.update(account.as_bytes());
        h.update(tx.type_name().as_bytes());
        hex::encode_upper(h.finalize())
    }

    fn reserve() -> i64 {
        Drops::from_whole_xrp(PAPER_RESERVE_XRP).get()
    }

    /// Result code the ledger would assign, with no state change.
    fn evaluate(&self, signer: &str, tx: &Transaction) -> String {
        let Some(src) = self.accounts.get(signer) else {
            return "terNO_ACCOUNT".to_string();
        };
        let spendable = src.balance - PAPER_FEE_DROPS - Self::reserve();

        match tx {
            Transaction::Payment {
                destination,
                amount,
            } => {
                if amount.get() <= 0 {
                    return "temBAD_AMOUNT".to_string();
                }
                if !self.accounts.contains_key(destination) && amount.get() < Self::reserve() {
                    return "tecNO_DST_INSUF_XRP".to_string();
                }
                if spendable < amount.get() {
                    return "tecUNFUNDED_PAYMENT".to_string();
                }
            }
            Transaction::EscrowCreate {
                destination,
                amount,
                finish_after,
            } => {
                if amount.get() <= 0 {
                    return "temBAD_AMOUNT".to_string();
                }
                if *finish_after <= self.now() {
                    return "tecNO_PERMISSION".to_string();
                }
                if !self.accounts.contains_key(destination) {
                    return "tecNO_DST".to_string();
                }
                if spendable < amount.get() {
                    return "tecUNFUNDED".to_string();
                }
            }
            Transaction::EscrowFinish {
                owner,
                offer_sequence,
            } => match self.escrows.get(&(owner.clone(), *offer_sequence)) {
                None => return "tecNO_TARGET".to_string(),
                Some(e) if self.now() <= e.finish_after => {
                    return "tecNO_PERMISSION".to_string();
                }
                Some(e) if !self.accounts.contains_key(&e.destination) => {
                    return "tecNO_DST".to_string();
                }
                Some(_) => {}
            },
            Transaction::NfTokenMint { uri_hex, .. } => {
                if uri_hex.len() / 2 > MAX_URI_BYTES {
                    return "temMALFORMED".to_string();
                }
            }
        }

        TES_SUCCESS.to_string()
    }

    fn apply(&mut self, signer: &str, tx: &Transaction, sequence: u32, hash: &str) -> Option<String> {
        match tx {
            Transaction::Payment {
                destination,
                amount,
            } => {
                self.debit(signer, amount.get());
                self.accounts
                    .entry(destination.clone())
                    .or_insert(PaperAccount {
                        balance: 0,
                        sequence: 1,
                        secret: None,
                    })
                    .balance += amount.get();
                None
            }
            Transaction::EscrowCreate {
                destination,
                amount,
                finish_after,
            } => {
                self.debit(signer, amount.get());
                self.escrows.insert(
                    (signer.to_string(), sequence),
                    PaperEscrow {
                        destination: destination.clone(),
                        amount: amount.get(),
                        finish_after: *finish_after,
                        create_hash: hash.to_string(),
                    },
                );
                None
            }
            Transaction::EscrowFinish {
                owner,
                offer_sequence,
            } => {
                if let Some(e) = self.escrows.remove(&(owner.clone(), *offer_sequence)) {
                    if let Some(dst) = self.accounts.get_mut(&e.destination) {
                        dst.balance += e.amount;
                    }
                }
                None
            }
            Transaction::NfTokenMint { .. } => {
                let mut h = Sha256::new();
                h.update(b"nftoken");
                h.update(hash.as_bytes());
                let id = hex::encode_upper(h.finalize());
                self.minted.push(id.clone());
                Some(id)
            }
        }
    }

    fn debit(&mut self, address: &str, drops: i64) {
        if let Some(a) = self.accounts.get_mut(address) {
            a.balance -= drops;
        }
    }

    fn record(&mut self, hash: &str, signer: &str, sequence: u32, tx: &Transaction, code: &str, nftoken_id: Option<&str>) {
        let mut raw = tx.to_tx_json(signer);
        raw["Sequence"] = json!(sequence);
        raw["Fee"] = json!(PAPER_FEE_DROPS.to_string());
        raw["hash"] = json!(hash);
        raw["validated"] = json!(true);
        raw["meta"] = match nftoken_id {
            Some(id) => json!({ "TransactionResult": code, "nftoken_id": id }),
            None => json!({ "TransactionResult": code }),
        };
        self.txs.insert(
            hash.to_string(),
            TxLookup {
                hash: hash.to_string(),
                account: signer.to_string(),
                sequence,
                transaction_type: tx.type_name().to_string(),
                result_code: Some(code.to_string()),
                validated: true,
                raw,
            },
        );
    }
}

/// See module docs.
#[derive(Debug, Default)]
pub struct PaperLedger {
    state: Mutex<PaperState>,
}

impl PaperLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create (or top up) a signing account holding `xrp`.
    pub fn fund(&self, credential: &Credential, xrp: u32) {
        let mut st = self.lock();
        let acct = st
            .accounts
            .entry(credential.address().to_string())
            .or_insert(PaperAccount {
                balance: 0,
                sequence: 1,
                secret: None,
            });
        acct.balance += Drops::from_whole_xrp(xrp).get();
        acct.secret = Some(credential.secret().to_string());
    }

    /// Create a receive-only account holding `xrp`.
    pub fn activate(&self, address: &str, xrp: u32) {
        let mut st = self.lock();
        st.accounts
            .entry(address.to_string())
            .or_insert(PaperAccount {
                balance: 0,
                sequence: 1,
                secret: None,
            })
            .balance += Drops::from_whole_xrp(xrp).get();
    }

    pub fn balance_of(&self, address: &str) -> Option<Drops> {
        self.lock()
            .accounts
            .get(address)
            .and_then(|a| Drops::new(a.balance).ok())
    }

    pub fn escrow_count(&self) -> usize {
        self.lock().escrows.len()
    }

    pub fn minted_count(&self) -> usize {
        self.lock().minted.len()
    }

    /// Number of submissions seen for a transaction type name
    /// (`"EscrowCreate"`, `"Payment"`, ...), applied or not.
    pub fn submit_count(&self, type_name: &str) -> usize {
        self.lock().submits.get(type_name).copied().unwrap_or(0)
    }

    /// Move ledger time forward.
    pub fn advance_clock(&self, by: chrono::Duration) {
        self.lock().clock_offset_secs += by.num_seconds();
    }

    /// Remove an escrow out from under the engine (someone else finished or
    /// cancelled it).
    pub fn remove_escrow(&self, owner: &str, create_sequence: u32) -> bool {
        self.lock()
            .escrows
            .remove(&(owner.to_string(), create_sequence))
            .is_some()
    }

    /// Every call fails with `NetworkUnavailable` until cleared.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// The next submission returns `code` without applying anything.
    pub fn fail_next_submit(&self, code: &str) {
        self.lock().next_code = Some(code.to_string());
    }

    /// The next submission fails before reaching the ledger.
    pub fn drop_next_submit(&self) {
        self.lock().next_fault = Some(Fault::Unreachable);
    }

    /// The next submission is applied, but the caller sees `Unconfirmed`.
    pub fn lose_next_confirmation(&self) {
        self.lock().next_fault = Some(Fault::LoseConfirmation);
    }
}

#[async_trait::async_trait]
impl LedgerClient for PaperLedger {
    fn name(&self) -> &'static str {
        "paper"
    }

    async fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        let st = self.lock();
        if st.unreachable {
            return Err(LedgerError::NetworkUnavailable("paper ledger offline".to_string()));
        }
        let acct = st
            .accounts
            .get(address)
            .ok_or_else(|| LedgerError::AccountNotFound(address.to_string()))?;
        Ok(AccountInfo {
            address: address.to_string(),
            balance: Drops::new(acct.balance).map_err(|e| LedgerError::Malformed(e.to_string()))?,
            sequence: acct.sequence,
        })
    }

    async fn submit(&self, signer: &Credential, tx: &Transaction) -> Result<SubmitOutcome, LedgerError> {
        let mut st = self.lock();
        *st.submits.entry(tx.type_name()).or_insert(0) += 1;

        if st.unreachable {
            return Err(LedgerError::NetworkUnavailable("paper ledger offline".to_string()));
        }
        let fault = st.next_fault.take();
        if let Some(Fault::Unreachable) = fault {
            return Err(LedgerError::NetworkUnavailable("injected connect failure".to_string()));
        }

        let address = signer.address().to_string();
        let (sequence, authorized) = match st.accounts.get(&address) {
            None => return Err(LedgerError::AccountNotFound(address)),
            Some(a) => (a.sequence, a.secret.as_deref() == Some(signer.secret())),
        };

        let hash = st.next_hash(&address, tx);

        if !authorized {
            return Ok(SubmitOutcome {
                hash,
                result_code: "tefBAD_AUTH".to_string(),
                nftoken_id: None,
            });
        }

        let code = match st.next_code.take() {
            Some(injected) => injected,
            None => st.evaluate(&address, tx),
        };

        // tem/tef/tel/ter never reach a ledger; tec claims the fee and sequence.
        let claims_fee = code == TES_SUCCESS || code.starts_with("tec");
        if !claims_fee {
            return Ok(SubmitOutcome {
                hash,
                result_code: code,
                nftoken_id: None,
            });
        }

        if let Some(a) = st.accounts.get_mut(&address) {
            a.balance -= PAPER_FEE_DROPS;
            a.sequence += 1;
        }
        let nftoken_id = if code == TES_SUCCESS {
            st.apply(&address, tx, sequence, &hash)
        } else {
            None
        };
        st.record(&hash, &address, sequence, tx, &code, nftoken_id.as_deref());

        if let Some(Fault::LoseConfirmation) = fault {
            return Err(LedgerError::Unconfirmed {
                hash: Some(hash),
                detail: "injected confirmation loss".to_string(),
            });
        }

        Ok(SubmitOutcome {
            hash,
            result_code: code,
            nftoken_id,
        })
    }

    async fn lookup_transaction(&self, hash: &str) -> Result<TxLookup, LedgerError> {
        let st = self.lock();
        if st.unreachable {
            return Err(LedgerError::NetworkUnavailable("paper ledger offline".to_string()));
        }
        st.txs
            .get(hash)
            .cloned()
            .ok_or_else(|| LedgerError::TransactionNotFound(hash.to_string()))
    }

    async fn list_objects(&self, owner: &str, kind: ObjectKind) -> Result<Vec<LedgerObject>, LedgerError> {
        let st = self.lock();
        if st.unreachable {
            return Err(LedgerError::NetworkUnavailable("paper ledger offline".to_string()));
        }
        if !st.accounts.contains_key(owner) {
            return Err(LedgerError::AccountNotFound(owner.to_string()));
        }
        match kind {
            ObjectKind::Escrow => Ok(st
                .escrows
                .iter()
                .filter(|((o, _), _)| o == owner)
                .map(|((o, seq), e)| {
                    let mut h = Sha256::new();
                    h.update(o.as_bytes());
                    h.update(seq.to_be_bytes());
                    LedgerObject {
                        index: hex::encode_upper(h.finalize()),
                        previous_txn_id: Some(e.create_hash.clone()),
                        raw: json!({
                            "LedgerEntryType": "Escrow",
                            "Account": o,
                            "Destination": e.destination,
                            "Amount": e.amount.to_string(),
                            "FinishAfter": e.finish_after,
                            "PreviousTxnID": e.create_hash,
                        }),
                    }
                })
                .collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn platform() -> Credential {
        Credential::new("rPLATFORM", "sPlatformSeed")
    }

    fn escrow_to(dest: &str, xrp: u32, ledger: &PaperLedger) -> Transaction {
        let finish_after = ledger.lock().now() + 3600;
        Transaction::EscrowCreate {
            destination: dest.to_string(),
            amount: Drops::from_whole_xrp(xrp),
            finish_after,
        }
    }

    #[tokio::test]
    async fn escrow_to_missing_destination_is_no_dst() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 1_000);
        let tx = escrow_to("rNOBODY", 50, &ledger);
        let out = ledger.submit(&platform(), &tx).await.unwrap();
        assert_eq!(out.result_code, "tecNO_DST");
        assert_eq!(ledger.escrow_count(), 0);
    }

    #[tokio::test]
    async fn escrow_lifecycle_locks_then_releases_after_finish_after() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 1_000);
        ledger.activate("rWORKER", 20);

        let tx = escrow_to("rWORKER", 120, &ledger);
        let created = ledger.submit(&platform(), &tx).await.unwrap();
        assert!(created.is_success());
        assert_eq!(ledger.escrow_count(), 1);

        let lookup = ledger.lookup_transaction(&created.hash).await.unwrap();
        assert_eq!(lookup.account, "rPLATFORM");

        let finish = Transaction::EscrowFinish {
            owner: "rPLATFORM".to_string(),
            offer_sequence: lookup.sequence,
        };
        let early = ledger.submit(&platform(), &finish).await.unwrap();
        assert_eq!(early.result_code, "tecNO_PERMISSION");

        ledger.advance_clock(chrono::Duration::hours(2));
        let done = ledger.submit(&platform(), &finish).await.unwrap();
        assert!(done.is_success());
        assert_eq!(ledger.escrow_count(), 0);
        assert_eq!(ledger.balance_of("rWORKER"), Some(Drops::from_whole_xrp(140)));
    }

    #[tokio::test]
    async fn unknown_escrow_is_no_target() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 100);
        let finish = Transaction::EscrowFinish {
            owner: "rPLATFORM".to_string(),
            offer_sequence: 99,
        };
        let out = ledger.submit(&platform(), &finish).await.unwrap();
        assert_eq!(out.result_code, "tecNO_TARGET");
    }

    #[tokio::test]
    async fn unfunded_escrow_is_rejected_and_claims_fee() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 15);
        ledger.activate("rWORKER", 20);
        let tx = escrow_to("rWORKER", 50, &ledger);
        let out = ledger.submit(&platform(), &tx).await.unwrap();
        assert_eq!(out.result_code, "tecUNFUNDED");
        let info = ledger.account_info("rPLATFORM").await.unwrap();
        assert_eq!(info.balance.get(), 15_000_000 - PAPER_FEE_DROPS);
        assert_eq!(info.sequence, 2);
    }

    #[tokio::test]
    async fn wrong_secret_is_bad_auth_and_not_applied() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 100);
        let imposter = Credential::new("rPLATFORM", "sWrong");
        let tx = Transaction::Payment {
            destination: "rX".to_string(),
            amount: Drops::from_whole_xrp(10),
        };
        let out = ledger.submit(&imposter, &tx).await.unwrap();
        assert_eq!(out.result_code, "tefBAD_AUTH");
        assert!(ledger.balance_of("rX").is_none());
    }

    #[tokio::test]
    async fn lost_confirmation_still_applies() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 100);
        ledger.lose_next_confirmation();
        let tx = Transaction::Payment {
            destination: "rNEW".to_string(),
            amount: Drops::from_whole_xrp(10),
        };
        let err = ledger.submit(&platform(), &tx).await.unwrap_err();
        let hash = match err {
            LedgerError::Unconfirmed { hash: Some(h), .. } => h,
            other => panic!("expected unconfirmed with hash, got {other:?}"),
        };
        let lookup = ledger.lookup_transaction(&hash).await.unwrap();
        assert_eq!(lookup.result_code.as_deref(), Some(TES_SUCCESS));
        assert_eq!(ledger.balance_of("rNEW"), Some(Drops::from_whole_xrp(10)));
    }

    #[tokio::test]
    async fn mint_returns_token_id() {
        let ledger = PaperLedger::new();
        ledger.fund(&platform(), 100);
        let tx = Transaction::NfTokenMint {
            taxon: 0,
            uri_hex: hex::encode_upper(b"{}"),
            flags: 8,
        };
        let out = ledger.submit(&platform(), &tx).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.nftoken_id.map(|s| s.len()), Some(64));
        assert_eq!(ledger.minted_count(), 1);
    }

    #[tokio::test]
    async fn unreachable_ledger_fails_reads() {
        let ledger = PaperLedger::new();
        ledger.set_unreachable(true);
        let err = ledger.account_info("rA").await.unwrap_err();
        assert!(matches!(err, LedgerError::NetworkUnavailable(_)));
    }
}
