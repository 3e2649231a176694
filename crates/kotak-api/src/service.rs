use crate::error::ApiResult;
use crate::types::{Account, Message};
use async_trait::async_trait;

/// Operations consumed from the remote mailbox service
///
/// Implemented over HTTP by [`crate::MailboxClient`]; the session core only
/// depends on this trait.
#[async_trait]
pub trait MailboxService: Send + Sync {
    /// Existence check. `Ok(false)` for any non-success status.
    async fn account_exists(&self, account_id: &str) -> ApiResult<bool>;

    /// Create a fresh disposable account
    async fn create_account(&self) -> ApiResult<Account>;

    /// Full message list, in service order
    async fn list_emails(&self, account_id: &str) -> ApiResult<Vec<Message>>;

    /// Full content of one message
    async fn get_email(&self, account_id: &str, email_id: &str) -> ApiResult<Message>;
}
