use super::JobResult;
use std::collections::HashSet;

/// Turns search results into business signals for a profile.
pub trait SignalSink: Send + Sync {
    /// Returns the number of signals generated.
    fn signals_for(&self, profile_id: &str, results: &[JobResult]) -> i64;
}

/// One hiring signal per distinct company in the results.
pub struct DistinctCompanySignals;

impl DistinctCompanySignals {
    pub fn distinct_companies(results: &[JobResult]) -> i64 {
        results
            .iter()
            .map(|r| r.company.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect::<HashSet<_>>()
            .len() as i64
    }
}

impl SignalSink for DistinctCompanySignals {
    fn signals_for(&self, _profile_id: &str, results: &[JobResult]) -> i64 {
        Self::distinct_companies(results)
    }
}
