//! Test doubles and fixtures for settlement scenarios.
//!
//! [`MemorySessionStore`] keeps the same guards as the Postgres store (one
//! blocking intent per session, status compare-and-set, intent start and idle
//! update serialized per session) so scenario tests exercise the engine's
//! concurrency contract without a database.

mod memory_store;

pub use memory_store::MemorySessionStore;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sp_db::{SessionRow, SessionStatus, ShiftAnnotation};
use sp_ledger::{Credential, PaperLedger};
use sp_settlement::{EngineSettings, SettlementEngine};
use uuid::Uuid;

pub const PLATFORM_ADDRESS: &str = "rPLATFORMxxxxxxxxxxxxxxxxxxxxxxxx";
pub const EMPLOYER_ADDRESS: &str = "rEMPLOYERxxxxxxxxxxxxxxxxxxxxxxxx";

pub fn platform_credential() -> Credential {
    Credential::new(PLATFORM_ADDRESS, "sPlatformTestSeed")
}

/// Engine wired to a memory store and a paper ledger.
pub struct Harness {
    pub store: Arc<MemorySessionStore>,
    pub paper: Arc<PaperLedger>,
    pub engine: Arc<SettlementEngine>,
}

impl Harness {
    /// Platform funded with `platform_xrp`; employer account exists.
    pub fn new(platform_xrp: u32) -> Self {
        Self::with_settings(platform_xrp, EngineSettings::default())
    }

    pub fn with_settings(platform_xrp: u32, settings: EngineSettings) -> Self {
        let store = Arc::new(MemorySessionStore::new());
        let paper = Arc::new(PaperLedger::new());
        paper.fund(&platform_credential(), platform_xrp);
        paper.activate(EMPLOYER_ADDRESS, 50);

        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            paper.clone(),
            platform_credential(),
            settings,
        ));
        Self { store, paper, engine }
    }

    /// Insert a session and return its id.
    pub async fn add_session(&self, shift: ShiftBuilder) -> Uuid {
        let row = shift.build();
        let id = row.session_id;
        self.store.insert_session(row).await;
        id
    }
}

/// Builder for stored sessions; defaults to an 8-hour proposed shift at 15/h.
#[derive(Debug, Clone)]
pub struct ShiftBuilder {
    status: SessionStatus,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    hourly_rate: Option<f64>,
    worker_address: Option<String>,
    job_type: Option<String>,
    escrow_tx: Option<String>,
}

impl Default for ShiftBuilder {
    fn default() -> Self {
        let start = Utc::now() - Duration::hours(10);
        Self {
            status: SessionStatus::Proposed,
            start,
            end: Some(start + Duration::hours(8)),
            hourly_rate: Some(15.0),
            worker_address: Some(format!("rWORKER{}", &Uuid::new_v4().simple().to_string()[..20])),
            job_type: None,
            escrow_tx: None,
        }
    }
}

impl ShiftBuilder {
    pub fn proposed() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn hours(mut self, hours: f64) -> Self {
        self.end = Some(self.start + Duration::milliseconds((hours * 3_600_000.0) as i64));
        self
    }

    pub fn started_at(mut self, start: DateTime<Utc>) -> Self {
        self.start = start;
        self
    }

    pub fn no_end(mut self) -> Self {
        self.end = None;
        self
    }

    pub fn rate(mut self, rate: Option<f64>) -> Self {
        self.hourly_rate = rate;
        self
    }

    pub fn worker(mut self, address: impl Into<String>) -> Self {
        self.worker_address = Some(address.into());
        self
    }

    pub fn no_worker_address(mut self) -> Self {
        self.worker_address = None;
        self
    }

    pub fn job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn escrow_tx(mut self, tx: impl Into<String>) -> Self {
        self.escrow_tx = Some(tx.into());
        self
    }

    pub fn build(self) -> SessionRow {
        SessionRow {
            session_id: Uuid::new_v4(),
            worker_id: Uuid::new_v4(),
            employer_id: Uuid::new_v4(),
            worker_address: self.worker_address,
            employer_address: Some(EMPLOYER_ADDRESS.to_string()),
            start_time_utc: self.start,
            end_time_utc: self.end,
            hourly_rate: self.hourly_rate,
            hours: None,
            amount_total_drops: None,
            status: self.status,
            escrow_tx: self.escrow_tx,
            nft_id: None,
            payment_tx: None,
            analysis: self.job_type.map(|j| ShiftAnnotation {
                version: 1,
                body: serde_json::json!({ "job_type": j }),
            }),
            updated_at_utc: Utc::now(),
        }
    }
}
