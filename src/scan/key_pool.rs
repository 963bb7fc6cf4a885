//! Chooses which credential an owner spends budget against.

use super::budget_ledger::BudgetLedger;
use super::credentials::CredentialCipher;
use super::models::CredentialInfo;
use super::store::ScanStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, warn};

/// The credential every owner may fall back to.
#[derive(Debug, Clone)]
pub struct SharedCredential {
    /// Plaintext key, None if the search API needs no key
    pub api_key: Option<String>,
    /// None is unlimited
    pub daily_limit: Option<i64>,
}

pub struct KeyPool {
    store: Arc<dyn ScanStore>,
    ledger: Arc<BudgetLedger>,
    cipher: Arc<dyn CredentialCipher>,
    shared: SharedCredential,
}

impl KeyPool {
    pub fn new(
        store: Arc<dyn ScanStore>,
        ledger: Arc<BudgetLedger>,
        cipher: Arc<dyn CredentialCipher>,
        shared: SharedCredential,
    ) -> Self {
        Self {
            store,
            ledger,
            cipher,
            shared,
        }
    }

    pub fn ledger(&self) -> &Arc<BudgetLedger> {
        &self.ledger
    }

    /// First of the owner's active credentials (oldest first) that still has
    /// budget today, else the shared default if it has budget, else None.
    ///
    /// Budget is checked, not consumed. A credential that fails to decrypt is
    /// skipped.
    pub fn next_available_key(
        &self,
        owner_id: &str,
        api_name: &str,
    ) -> Result<Option<CredentialInfo>> {
        for credential in self.store.active_credentials_for_owner(owner_id, api_name)? {
            let limit = credential.effective_limit();
            if !credential.is_unlimited
                && self
                    .ledger
                    .remaining_calls(api_name, Some(&credential.id), limit)
                    <= 0
            {
                continue;
            }

            match self.cipher.decrypt(&credential.encrypted_key) {
                Ok(api_key) => {
                    debug!("Using credential {} for owner {}", credential.id, owner_id);
                    return Ok(Some(CredentialInfo {
                        credential_id: Some(credential.id),
                        api_key: Some(api_key),
                        daily_limit: limit,
                    }));
                }
                Err(e) => {
                    warn!("Skipping credential {}: {:#}", credential.id, e);
                }
            }
        }

        if self
            .ledger
            .remaining_calls(api_name, None, self.shared.daily_limit)
            > 0
        {
            debug!("Using shared credential for owner {}", owner_id);
            return Ok(Some(CredentialInfo {
                credential_id: None,
                api_key: self.shared.api_key.clone(),
                daily_limit: self.shared.daily_limit,
            }));
        }

        Ok(None)
    }

    /// Profiles an owner may scan concurrently: one on the shared credential
    /// plus one per active owned credential.
    pub fn allowed_profile_slots(&self, owner_id: &str, api_name: &str) -> Result<usize> {
        Ok(1 + self
            .store
            .active_credentials_for_owner(owner_id, api_name)?
            .len())
    }

    /// Budget left today across every active credential and the shared one.
    pub fn pool_remaining(&self, api_name: &str) -> Result<i64> {
        let mut total = self
            .ledger
            .remaining_calls(api_name, None, self.shared.daily_limit);
        for credential in self.store.active_credentials(api_name)? {
            total = total.saturating_add(self.ledger.remaining_calls(
                api_name,
                Some(&credential.id),
                credential.effective_limit(),
            ));
        }
        Ok(total)
    }
}
