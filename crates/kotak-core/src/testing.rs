//! In-memory mailbox service for tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use kotak_api::{Account, ApiError, ApiResult, MailboxService, Message};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    NotFound,
    Network,
}

impl Failure {
    fn into_error(self, key: &str) -> ApiError {
        match self {
            Failure::NotFound => ApiError::NotFound(key.to_string()),
            Failure::Network => ApiError::ApiError {
                status: 503,
                body: "unavailable".to_string(),
            },
        }
    }
}

#[derive(Default)]
struct FakeState {
    /// `None` simulates a transport failure
    exists: HashMap<String, Option<bool>>,
    created: VecDeque<Account>,
    lists: HashMap<String, Result<Vec<Message>, Failure>>,
    details: HashMap<(String, String), Result<Message, Failure>>,
    holds: HashMap<String, Arc<Notify>>,
    calls: Vec<String>,
    completed: Vec<String>,
}

/// Scriptable [`MailboxService`]
///
/// Requests are recorded under keys such as `list:x1` or `detail:x1:m1`.
/// A held key blocks the next matching request until released.
#[derive(Default)]
pub(crate) struct FakeMailbox {
    state: Mutex<FakeState>,
    changed: Notify,
}

impl FakeMailbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut FakeState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub(crate) fn set_exists(&self, account_id: &str, exists: bool) {
        self.with_state(|s| s.exists.insert(account_id.to_string(), Some(exists)));
    }

    pub(crate) fn fail_exists(&self, account_id: &str) {
        self.with_state(|s| s.exists.insert(account_id.to_string(), None));
    }

    pub(crate) fn push_account(&self, account: Account) {
        self.with_state(|s| s.created.push_back(account));
    }

    pub(crate) fn set_list(&self, account_id: &str, messages: Vec<Message>) {
        self.with_state(|s| s.lists.insert(account_id.to_string(), Ok(messages)));
    }

    pub(crate) fn fail_list(&self, account_id: &str, failure: Failure) {
        self.with_state(|s| s.lists.insert(account_id.to_string(), Err(failure)));
    }

    pub(crate) fn set_detail(&self, account_id: &str, message: Message) {
        self.with_state(|s| {
            s.details
                .insert((account_id.to_string(), message.id.clone()), Ok(message))
        });
    }

    pub(crate) fn fail_detail(&self, account_id: &str, message_id: &str, failure: Failure) {
        self.with_state(|s| {
            s.details.insert(
                (account_id.to_string(), message_id.to_string()),
                Err(failure),
            )
        });
    }

    /// Block the next request recorded under `key`
    pub(crate) fn hold(&self, key: &str) {
        self.with_state(|s| s.holds.insert(key.to_string(), Arc::new(Notify::new())));
    }

    /// Let a held request complete
    pub(crate) fn release(&self, key: &str) {
        if let Some(gate) = self.with_state(|s| s.holds.remove(key)) {
            gate.notify_one();
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.with_state(|s| s.calls.clone())
    }

    pub(crate) fn count(&self, key: &str) -> usize {
        self.with_state(|s| s.calls.iter().filter(|c| c.as_str() == key).count())
    }

    /// Wait until `key` has been requested `n` times
    pub(crate) async fn wait_called(&self, key: &str, n: usize) {
        loop {
            let notified = self.changed.notified();
            if self.count(key) >= n {
                return;
            }
            notified.await;
        }
    }

    /// Wait until a request for `key` has returned to its caller
    pub(crate) async fn wait_completed(&self, key: &str) {
        loop {
            let notified = self.changed.notified();
            if self.with_state(|s| s.completed.iter().any(|c| c == key)) {
                return;
            }
            notified.await;
        }
    }

    async fn enter(&self, key: &str) {
        let gate = self.with_state(|s| {
            s.calls.push(key.to_string());
            s.holds.get(key).cloned()
        });
        self.changed.notify_waiters();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn leave(&self, key: &str) {
        self.with_state(|s| s.completed.push(key.to_string()));
        self.changed.notify_waiters();
    }
}

#[async_trait]
impl MailboxService for FakeMailbox {
    async fn account_exists(&self, account_id: &str) -> ApiResult<bool> {
        let key = format!("exists:{account_id}");
        self.enter(&key).await;
        let result = match self.with_state(|s| s.exists.get(account_id).copied()) {
            Some(Some(exists)) => Ok(exists),
            Some(None) => Err(Failure::Network.into_error(&key)),
            None => Ok(false),
        };
        self.leave(&key);
        result
    }

    async fn create_account(&self) -> ApiResult<Account> {
        let key = "create";
        self.enter(key).await;
        let result = self
            .with_state(|s| s.created.pop_front())
            .ok_or_else(|| Failure::Network.into_error(key));
        self.leave(key);
        result
    }

    async fn list_emails(&self, account_id: &str) -> ApiResult<Vec<Message>> {
        let key = format!("list:{account_id}");
        self.enter(&key).await;
        let result = match self.with_state(|s| s.lists.get(account_id).cloned()) {
            Some(Ok(messages)) => Ok(messages),
            Some(Err(failure)) => Err(failure.into_error(&key)),
            None => Ok(Vec::new()),
        };
        self.leave(&key);
        result
    }

    async fn get_email(&self, account_id: &str, email_id: &str) -> ApiResult<Message> {
        let key = format!("detail:{account_id}:{email_id}");
        self.enter(&key).await;
        let result = match self.with_state(|s| {
            s.details
                .get(&(account_id.to_string(), email_id.to_string()))
                .cloned()
        }) {
            Some(Ok(message)) => Ok(message),
            Some(Err(failure)) => Err(failure.into_error(&key)),
            None => Err(Failure::NotFound.into_error(&key)),
        };
        self.leave(&key);
        result
    }
}

pub(crate) fn account(id: &str) -> Account {
    Account {
        account_id: id.to_string(),
        email: format!("{id}@ex.com"),
        created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
    }
}

pub(crate) fn message(id: &str, subject: &str, body: &str) -> Message {
    Message {
        id: id.to_string(),
        from: "sender@example.com".to_string(),
        to: "x1@ex.com".to_string(),
        subject: subject.to_string(),
        body: body.to_string(),
        received_at: Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
    }
}
