//! Shift settlement: status machine, escrow lifecycle, account activation,
//! certificates and the write-ahead intent protocol tying them together.

pub mod bootstrap;
pub mod status;

mod activator;
mod certificate;
mod engine;
mod error;
mod escrow;
mod intent;
mod store;

pub use activator::{AccountActivator, Activation};
pub use certificate::{build_metadata, CertificateFacts, CertificateMinter, MAX_METADATA_BYTES};
pub use engine::{
    CheckOutOutcome, EngineSettings, ReconcileReport, RefuseOutcome, ReleaseOutcome, SettlementEngine,
    ValidateOutcome, ValidateRequest,
};
pub use error::{SettlementError, TESTNET_FAUCET_URL};
pub use escrow::{EscrowCoordinator, EscrowCreated, EscrowFailure};
pub use intent::{IntentPayload, IntentToken};
pub use status::{is_terminal, required_status, transition, SessionAction, SessionStatus, TransitionError};
pub use store::{PgSessionStore, SessionStore};
