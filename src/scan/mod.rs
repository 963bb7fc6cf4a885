//! Budget-aware background scan scheduler.
//!
//! A profile scan opens a batch, the expansion planner enqueues tasks for it,
//! and the executor drains them within the daily call budget while the
//! aggregator folds results into the profile's progress.

pub mod aggregator;
pub mod budget_ledger;
pub mod credentials;
pub mod error;
pub mod executor;
pub mod expansion;
pub mod key_pool;
pub mod manager;
pub mod models;
pub mod retry_policy;
mod schema;
pub mod store;
pub mod time;

pub use aggregator::ProgressAggregator;
pub use budget_ledger::BudgetLedger;
pub use credentials::{CredentialCipher, PlaintextCredentialCipher, RsaCredentialCipher};
pub use error::{ScanError, ScanResult};
pub use executor::TaskExecutor;
pub use expansion::ExpansionRequest;
pub use key_pool::{KeyPool, SharedCredential};
pub use manager::{NewCredential, NewProfile, ScanManager};
pub use models::*;
pub use retry_policy::RetryPolicy;
pub use store::{BeginBatchOutcome, ScanStore, SqliteScanStore};
pub use time::{ManualTimeProvider, SystemTimeProvider, TimeProvider};
