//! Daily call budget per (API, credential, UTC day).

use super::error::ScanError;
use super::models::BudgetDecision;
use super::store::ScanStore;
use super::time::{budget_date, TimeProvider};
use crate::server::metrics;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ledger key of the shared default credential.
pub const SHARED_CREDENTIAL_KEY: &str = "";

/// Admission control over the daily call budget.
///
/// Check and increment happen in one storage statement, so concurrent callers
/// never jointly admit more than the limit. If the ledger itself cannot be
/// reached the call is admitted (fail open) and the failure is counted.
pub struct BudgetLedger {
    store: Arc<dyn ScanStore>,
    clock: Arc<dyn TimeProvider>,
}

impl BudgetLedger {
    pub fn new(store: Arc<dyn ScanStore>, clock: Arc<dyn TimeProvider>) -> Self {
        Self { store, clock }
    }

    /// Count one call against the budget if there is room.
    ///
    /// `credential_id` None is the shared default credential. `daily_limit`
    /// None is unlimited: the call is admitted and still counted.
    pub fn try_consume(
        &self,
        api_name: &str,
        credential_id: Option<&str>,
        daily_limit: Option<i64>,
    ) -> BudgetDecision {
        let key = credential_id.unwrap_or(SHARED_CREDENTIAL_KEY);
        let day = budget_date(self.clock.today());

        let decision = match self.store.try_consume_budget(
            api_name,
            key,
            &day,
            daily_limit,
            self.clock.now(),
        ) {
            Ok(Some(used)) => BudgetDecision {
                allowed: true,
                remaining: daily_limit.map_or(i64::MAX, |limit| (limit - used).max(0)),
                used,
            },
            Ok(None) => BudgetDecision {
                allowed: false,
                remaining: 0,
                used: daily_limit.unwrap_or(0).max(0),
            },
            Err(e) => {
                warn!(
                    "{}, admitting call for {}/{:?}",
                    ScanError::LedgerUnavailable(format!("{:#}", e)),
                    api_name,
                    credential_id
                );
                metrics::record_ledger_failure();
                return BudgetDecision {
                    allowed: true,
                    remaining: 0,
                    used: 0,
                };
            }
        };

        debug!(
            "Budget {} for {}/{:?} on {}: used {}, remaining {}",
            if decision.allowed { "admitted" } else { "denied" },
            api_name,
            credential_id,
            day,
            decision.used,
            decision.remaining
        );
        metrics::record_budget_decision(api_name, decision.allowed);
        decision
    }

    /// Calls left today without consuming any. Unlimited credentials report
    /// `i64::MAX`. A ledger failure reports the full limit.
    pub fn remaining_calls(
        &self,
        api_name: &str,
        credential_id: Option<&str>,
        daily_limit: Option<i64>,
    ) -> i64 {
        let Some(limit) = daily_limit else {
            return i64::MAX;
        };
        let key = credential_id.unwrap_or(SHARED_CREDENTIAL_KEY);
        let day = budget_date(self.clock.today());

        match self.store.budget_used(api_name, key, &day) {
            Ok(used) => (limit - used).max(0),
            Err(e) => {
                warn!(
                    "{}, assuming full budget for {}/{:?}",
                    ScanError::LedgerUnavailable(format!("{:#}", e)),
                    api_name,
                    credential_id
                );
                metrics::record_ledger_failure();
                limit.max(0)
            }
        }
    }
}
