//! Persisted session identity

use crate::{CoreError, CoreResult, Database};
use kotak_api::{Account, MailboxService};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Fixed key the account record lives under
pub const ACCOUNT_KEY: &str = "kotak.session.account";

/// Owns the locally remembered account
///
/// Keeps an in-memory copy alongside the durable record; both are replaced
/// together on [`SessionStore::save`] and dropped together on
/// [`SessionStore::clear`].
pub struct SessionStore {
    db: Arc<Database>,
    current: Option<Account>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db, current: None }
    }

    /// Account held in memory, if any
    pub fn current(&self) -> Option<&Account> {
        self.current.as_ref()
    }

    /// Read the persisted account
    ///
    /// Never fails: unreadable storage counts as no account, and a record
    /// that does not parse is discarded.
    pub async fn load(&mut self) -> Option<Account> {
        let raw = match self.db.get_item(ACCOUNT_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No persisted account");
                self.current = None;
                return None;
            }
            Err(e) => {
                warn!("Failed to read persisted account: {}", e);
                self.current = None;
                return None;
            }
        };

        match serde_json::from_str::<Account>(&raw) {
            Ok(account) => {
                debug!("Loaded persisted account {}", account.account_id);
                self.current = Some(account.clone());
                Some(account)
            }
            Err(e) => {
                warn!("Discarding malformed persisted account: {}", e);
                if let Err(e) = self.db.remove_item(ACCOUNT_KEY).await {
                    warn!("Failed to discard malformed account: {}", e);
                }
                self.current = None;
                None
            }
        }
    }

    /// Persist `account`, replacing any previous one
    pub async fn save(&mut self, account: &Account) -> CoreResult<()> {
        self.current = Some(account.clone());
        let json = serde_json::to_string(account)
            .map_err(|e| CoreError::DatabaseError(format!("Failed to serialize account: {}", e)))?;
        self.db.set_item(ACCOUNT_KEY, &json).await?;

        info!("Persisted account {} <{}>", account.account_id, account.email);
        Ok(())
    }

    /// Forget the persisted account
    pub async fn clear(&mut self) -> CoreResult<()> {
        if let Some(account) = self.current.take() {
            info!("Clearing account {}", account.account_id);
        }
        self.db.remove_item(ACCOUNT_KEY).await
    }

    /// Ask the mailbox service whether `account_id` still exists
    ///
    /// Transport failures count as "does not exist": the caller discards the
    /// local account either way.
    pub async fn validate(service: &dyn MailboxService, account_id: &str) -> bool {
        match service.account_exists(account_id).await {
            Ok(exists) => {
                debug!("Account {} exists={}", account_id, exists);
                exists
            }
            Err(e) => {
                warn!("Account check for {} failed: {}", account_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, FakeMailbox};

    async fn store() -> (Arc<Database>, SessionStore) {
        let db = Arc::new(Database::open_memory().await.unwrap());
        (db.clone(), SessionStore::new(db))
    }

    #[tokio::test]
    async fn test_save_then_load_round_trip() {
        let (db, mut store) = store().await;
        let a = account("x1");
        store.save(&a).await.unwrap();

        // A fresh store over the same database sees the same record
        let mut reopened = SessionStore::new(db);
        assert_eq!(reopened.load().await, Some(a.clone()));
        assert_eq!(reopened.current(), Some(&a));
    }

    #[tokio::test]
    async fn test_save_replaces_previous() {
        let (_db, mut store) = store().await;
        store.save(&account("x1")).await.unwrap();
        store.save(&account("x2")).await.unwrap();

        assert_eq!(store.load().await.map(|a| a.account_id), Some("x2".to_string()));
    }

    #[tokio::test]
    async fn test_malformed_record_is_discarded() {
        let (db, mut store) = store().await;
        db.set_item(ACCOUNT_KEY, "{not json").await.unwrap();

        assert_eq!(store.load().await, None);
        assert_eq!(db.get_item(ACCOUNT_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear() {
        let (db, mut store) = store().await;
        store.save(&account("x1")).await.unwrap();
        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(store.current().is_none());
        assert_eq!(db.get_item(ACCOUNT_KEY).await.unwrap(), None);
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn test_validate() {
        let mailbox = FakeMailbox::new();
        mailbox.set_exists("x1", true);
        mailbox.set_exists("gone", false);
        mailbox.fail_exists("flaky");

        assert!(SessionStore::validate(&mailbox, "x1").await);
        assert!(!SessionStore::validate(&mailbox, "gone").await);
        assert!(!SessionStore::validate(&mailbox, "flaky").await);
    }
}
