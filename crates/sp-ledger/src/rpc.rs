//! JSON-RPC ledger client.
//!
//! Signing is delegated to the configured endpoint (`submit` with `secret` +
//! `tx_json`), which also autofills `Sequence` and `Fee`. The client then polls
//! `tx` until the transaction appears in a validated ledger or the submit bound
//! elapses.
//!
//! The HTTP connection pool lives inside the owned `reqwest::Client`; callers
//! share one `RpcLedgerClient` behind an `Arc`. After
//! [`LedgerClient::disconnect`] every call fails fast with
//! `NetworkUnavailable`; the pool itself is released when the last `Arc` drops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::amount::parse_drops;
use crate::client::LedgerClient;
use crate::error::LedgerError;
use crate::types::{AccountInfo, Credential, LedgerObject, ObjectKind, SubmitOutcome, Transaction, TxLookup};

/// Endpoint and timing bounds for [`RpcLedgerClient`].
#[derive(Debug, Clone)]
pub struct RpcConfig {
    pub url: String,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Upper bound on waiting for a validated result after submission.
    pub submit_timeout: Duration,
    pub poll_interval: Duration,
}

impl RpcConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            request_timeout: Duration::from_secs(10),
            submit_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Failure of a single JSON-RPC call, before mapping into [`LedgerError`].
enum CallError {
    /// The client was disconnected; nothing was sent.
    Closed,
    Transport(reqwest::Error),
    Rpc { error: String, message: String },
    Decode(String),
}

impl CallError {
    /// Mapping for read-only calls: any transport failure is "unavailable".
    fn into_read_error(self) -> LedgerError {
        match self {
            CallError::Closed => LedgerError::NetworkUnavailable("ledger client disconnected".to_string()),
            CallError::Transport(e) => LedgerError::NetworkUnavailable(e.to_string()),
            CallError::Rpc { error, message } => LedgerError::Malformed(format!("{error}: {message}")),
            CallError::Decode(msg) => LedgerError::Malformed(msg),
        }
    }
}

pub struct RpcLedgerClient {
    http: reqwest::Client,
    cfg: RpcConfig,
    closed: AtomicBool,
}

impl RpcLedgerClient {
    /// Build the client and verify the endpoint answers `server_info`.
    pub async fn connect(cfg: RpcConfig) -> Result<Self, LedgerError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| LedgerError::NetworkUnavailable(format!("http client build failed: {e}")))?;

        let client = Self {
            http,
            cfg,
            closed: AtomicBool::new(false),
        };
        let info = client
            .call("server_info", json!({}))
            .await
            .map_err(CallError::into_read_error)?;

        let state = info
            .pointer("/info/server_state")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(url = %client.cfg.url, server_state = state, "ledger connected");
        Ok(client)
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CallError::Closed);
        }
        let body = json!({ "method": method, "params": [params] });
        let resp = self
            .http
            .post(&self.cfg.url)
            .json(&body)
            .send()
            .await
            .map_err(CallError::Transport)?;

        let status = resp.status();
        let payload: Value = resp
            .json()
            .await
            .map_err(|e| CallError::Decode(format!("{method}: response json decode failed: {e}")))?;

        if !status.is_success() {
            return Err(CallError::Decode(format!(
                "{method}: http status {}",
                status.as_u16()
            )));
        }

        let result = payload
            .get("result")
            .cloned()
            .ok_or_else(|| CallError::Decode(format!("{method}: missing result")))?;

        if result.get("status").and_then(Value::as_str) == Some("error") {
            let error = result
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string();
            let message = result
                .get("error_message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(CallError::Rpc { error, message });
        }

        Ok(result)
    }

    async fn await_validated(&self, hash: String) -> Result<SubmitOutcome, LedgerError> {
        let deadline = tokio::time::Instant::now() + self.cfg.submit_timeout;
        loop {
            tokio::time::sleep(self.cfg.poll_interval).await;

            match self.lookup_transaction(&hash).await {
                Ok(tx) if tx.validated => {
                    let result_code = tx.result_code.clone().unwrap_or_default();
                    let nftoken_id = tx
                        .raw
                        .pointer("/meta/nftoken_id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    return Ok(SubmitOutcome {
                        hash,
                        result_code,
                        nftoken_id,
                    });
                }
                Ok(_) | Err(LedgerError::TransactionNotFound(_)) => {
                    debug!(tx_hash = %hash, "awaiting validation");
                }
                Err(LedgerError::NetworkUnavailable(e)) => {
                    warn!(tx_hash = %hash, error = %e, "poll failed; will retry until submit bound");
                }
                Err(other) => {
                    return Err(LedgerError::Unconfirmed {
                        hash: Some(hash),
                        detail: other.to_string(),
                    });
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(LedgerError::Unconfirmed {
                    hash: Some(hash),
                    detail: format!(
                        "no validated result within {}s",
                        self.cfg.submit_timeout.as_secs()
                    ),
                });
            }
        }
    }
}

/// Preliminary codes in these classes are final: the transaction was never
/// applied and will not be.
fn is_final_preliminary(code: &str) -> bool {
    code.starts_with("tem") || code.starts_with("tef") || code.starts_with("tel")
}

fn parse_tx_lookup(hash: &str, result: &Value) -> Result<TxLookup, LedgerError> {
    // API v2 nests the transaction fields under `tx_json`.
    let tx = result.get("tx_json").unwrap_or(result);

    let account = tx
        .get("Account")
        .and_then(Value::as_str)
        .ok_or_else(|| LedgerError::Malformed(format!("tx {hash}: missing Account")))?
        .to_string();
    let sequence = tx
        .get("Sequence")
        .and_then(Value::as_u64)
        .and_then(|s| u32::try_from(s).ok())
        .ok_or_else(|| LedgerError::Malformed(format!("tx {hash}: missing Sequence")))?;
    let transaction_type = tx
        .get("TransactionType")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let result_code = result
        .pointer("/meta/TransactionResult")
        .and_then(Value::as_str)
        .map(str::to_string);
    let validated = result.get("validated").and_then(Value::as_bool).unwrap_or(false);

    Ok(TxLookup {
        hash: hash.to_string(),
        account,
        sequence,
        transaction_type,
        result_code,
        validated,
        raw: result.clone(),
    })
}

#[async_trait::async_trait]
impl LedgerClient for RpcLedgerClient {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(url = %self.cfg.url, "ledger disconnected");
        }
    }

    async fn account_info(&self, address: &str) -> Result<AccountInfo, LedgerError> {
        let params = json!({ "account": address, "ledger_index": "validated" });
        let result = match self.call("account_info", params).await {
            Ok(r) => r,
            Err(CallError::Rpc { error, .. }) if error == "actNotFound" => {
                return Err(LedgerError::AccountNotFound(address.to_string()));
            }
            Err(e) => return Err(e.into_read_error()),
        };

        let data = result
            .get("account_data")
            .ok_or_else(|| LedgerError::Malformed("account_info: missing account_data".to_string()))?;
        let balance = data
            .get("Balance")
            .and_then(Value::as_str)
            .and_then(parse_drops)
            .ok_or_else(|| LedgerError::Malformed("account_info: bad Balance".to_string()))?;
        let sequence = data
            .get("Sequence")
            .and_then(Value::as_u64)
            .and_then(|s| u32::try_from(s).ok())
            .ok_or_else(|| LedgerError::Malformed("account_info: bad Sequence".to_string()))?;

        Ok(AccountInfo {
            address: address.to_string(),
            balance,
            sequence,
        })
    }

    async fn submit(&self, signer: &Credential, tx: &Transaction) -> Result<SubmitOutcome, LedgerError> {
        let params = json!({
            "tx_json": tx.to_tx_json(signer.address()),
            "secret": signer.secret(),
            "fee_mult_max": 1000,
        });

        let result = match self.call("submit", params).await {
            Ok(r) => r,
            Err(CallError::Transport(e)) if e.is_connect() => {
                return Err(LedgerError::NetworkUnavailable(e.to_string()));
            }
            Err(e @ CallError::Closed) => return Err(e.into_read_error()),
            Err(CallError::Transport(e)) => {
                return Err(LedgerError::Unconfirmed {
                    hash: None,
                    detail: e.to_string(),
                });
            }
            Err(CallError::Rpc { error, .. }) if error == "srcActNotFound" => {
                return Err(LedgerError::AccountNotFound(signer.address().to_string()));
            }
            Err(CallError::Rpc { error, .. }) => {
                return Err(LedgerError::SubmissionRejected { code: error });
            }
            Err(CallError::Decode(msg)) => {
                return Err(LedgerError::Unconfirmed {
                    hash: None,
                    detail: msg,
                });
            }
        };

        let engine_result = result
            .get("engine_result")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let hash = result
            .pointer("/tx_json/hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| LedgerError::Unconfirmed {
                hash: None,
                detail: format!("submit returned {engine_result} without a hash"),
            })?;

        info!(
            tx_type = tx.type_name(),
            tx_hash = %hash,
            preliminary = %engine_result,
            "transaction submitted"
        );

        if is_final_preliminary(&engine_result) {
            return Ok(SubmitOutcome {
                hash,
                result_code: engine_result,
                nftoken_id: None,
            });
        }

        self.await_validated(hash).await
    }

    async fn lookup_transaction(&self, hash: &str) -> Result<TxLookup, LedgerError> {
        let params = json!({ "transaction": hash, "binary": false });
        match self.call("tx", params).await {
            Ok(result) => parse_tx_lookup(hash, &result),
            Err(CallError::Rpc { error, .. }) if error == "txnNotFound" => {
                Err(LedgerError::TransactionNotFound(hash.to_string()))
            }
            Err(e) => Err(e.into_read_error()),
        }
    }

    async fn list_objects(&self, owner: &str, kind: ObjectKind) -> Result<Vec<LedgerObject>, LedgerError> {
        let params = json!({
            "account": owner,
            "type": kind.as_str(),
            "ledger_index": "validated",
        });
        let result = match self.call("account_objects", params).await {
            Ok(r) => r,
            Err(CallError::Rpc { error, .. }) if error == "actNotFound" => {
                return Err(LedgerError::AccountNotFound(owner.to_string()));
            }
            Err(e) => return Err(e.into_read_error()),
        };

        let objects = result
            .get("account_objects")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(objects
            .into_iter()
            .map(|raw| LedgerObject {
                index: raw
                    .get("index")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                previous_txn_id: raw
                    .get("PreviousTxnID")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                raw,
            })
            .collect())
    }
}

// -----------------
// Tests (mock HTTP)
// -----------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Drops;
    use httpmock::prelude::*;

    fn fast_cfg(url: String) -> RpcConfig {
        RpcConfig {
            url,
            request_timeout: Duration::from_secs(2),
            submit_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }

    async fn connected(server: &MockServer) -> RpcLedgerClient {
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"server_info\"");
                then.status(200)
                    .json_body(json!({"result": {"status": "success", "info": {"server_state": "full"}}}));
            })
            .await;
        RpcLedgerClient::connect(fast_cfg(server.url("/"))).await.unwrap()
    }

    #[tokio::test]
    async fn account_info_parses_balance_and_sequence() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"account_info\"");
                then.status(200).json_body(json!({"result": {
                    "status": "success",
                    "account_data": {"Account": "rA", "Balance": "250000000", "Sequence": 17}
                }}));
            })
            .await;

        let info = client.account_info("rA").await.unwrap();
        assert_eq!(info.balance, Drops::from_whole_xrp(250));
        assert_eq!(info.sequence, 17);
    }

    #[tokio::test]
    async fn act_not_found_maps_to_account_not_found() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"account_info\"");
                then.status(200).json_body(json!({"result": {
                    "status": "error", "error": "actNotFound", "error_message": "Account not found."
                }}));
            })
            .await;

        let err = client.account_info("rNEW").await.unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound("rNEW".to_string()));
    }

    #[tokio::test]
    async fn malformed_preliminary_code_is_final_without_polling() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"submit\"");
                then.status(200).json_body(json!({"result": {
                    "status": "success", "engine_result": "temBAD_AMOUNT",
                    "tx_json": {"hash": "AB12"}
                }}));
            })
            .await;
        let poll = server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"tx\"");
                then.status(200).json_body(json!({"result": {"status": "success"}}));
            })
            .await;

        let signer = Credential::new("rA", "sSecret");
        let tx = Transaction::Payment {
            destination: "rB".to_string(),
            amount: Drops::from_whole_xrp(10),
        };
        let out = client.submit(&signer, &tx).await.unwrap();
        assert_eq!(out.result_code, "temBAD_AMOUNT");
        assert!(!out.is_success());
        poll.assert_hits_async(0).await;
    }

    #[tokio::test]
    async fn submit_waits_for_validated_result() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"submit\"");
                then.status(200).json_body(json!({"result": {
                    "status": "success", "engine_result": "tesSUCCESS",
                    "tx_json": {"hash": "CAFE"}
                }}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"tx\"");
                then.status(200).json_body(json!({"result": {
                    "status": "success", "validated": true,
                    "Account": "rA", "Sequence": 5, "TransactionType": "NFTokenMint",
                    "meta": {"TransactionResult": "tesSUCCESS", "nftoken_id": "000800AA"}
                }}));
            })
            .await;

        let signer = Credential::new("rA", "sSecret");
        let tx = Transaction::NfTokenMint {
            taxon: 0,
            uri_hex: "7B7D".to_string(),
            flags: 8,
        };
        let out = client.submit(&signer, &tx).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.hash, "CAFE");
        assert_eq!(out.nftoken_id.as_deref(), Some("000800AA"));
    }

    #[tokio::test]
    async fn submit_without_validation_is_unconfirmed_with_hash() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"submit\"");
                then.status(200).json_body(json!({"result": {
                    "status": "success", "engine_result": "terQUEUED",
                    "tx_json": {"hash": "BEEF"}
                }}));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"tx\"");
                then.status(200).json_body(json!({"result": {
                    "status": "error", "error": "txnNotFound"
                }}));
            })
            .await;

        let signer = Credential::new("rA", "sSecret");
        let tx = Transaction::EscrowFinish {
            owner: "rA".to_string(),
            offer_sequence: 5,
        };
        let err = client.submit(&signer, &tx).await.unwrap_err();
        assert!(err.outcome_unknown());
        assert!(matches!(err, LedgerError::Unconfirmed { hash: Some(h), .. } if h == "BEEF"));
    }

    #[tokio::test]
    async fn lookup_reads_v2_tx_json_shape() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"tx\"");
                then.status(200).json_body(json!({"result": {
                    "status": "success", "validated": true,
                    "tx_json": {"Account": "rPLATFORM", "Sequence": 42, "TransactionType": "EscrowCreate"},
                    "meta": {"TransactionResult": "tesSUCCESS"}
                }}));
            })
            .await;

        let tx = client.lookup_transaction("H1").await.unwrap();
        assert_eq!(tx.account, "rPLATFORM");
        assert_eq!(tx.sequence, 42);
        assert_eq!(tx.result_code.as_deref(), Some("tesSUCCESS"));
    }

    #[tokio::test]
    async fn disconnected_client_sends_nothing() {
        let server = MockServer::start_async().await;
        let client = connected(&server).await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST).body_contains("\"method\":\"submit\"");
                then.status(200).json_body(json!({"result": {"status": "success"}}));
            })
            .await;

        client.disconnect().await;
        client.disconnect().await;

        let err = client.account_info("rA").await.unwrap_err();
        assert!(matches!(err, LedgerError::NetworkUnavailable(_)));

        let signer = Credential::new("rA", "sA");
        let tx = Transaction::Payment {
            destination: "rB".to_string(),
            amount: Drops::from_whole_xrp(1),
        };
        let err = client.submit(&signer, &tx).await.unwrap_err();
        assert!(matches!(err, LedgerError::NetworkUnavailable(_)));
        submit.assert_hits_async(0).await;
    }
}
