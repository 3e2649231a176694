use crate::error::{ApiError, ApiResult};
use crate::service::MailboxService;
use crate::types::*;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tracing::{debug, info};
use url::Url;

/// HTTP client for the temporary mailbox API
#[derive(Debug, Clone)]
pub struct MailboxClient {
    client: reqwest::Client,
    base: Url,
}

impl MailboxClient {
    /// Create a client rooted at `base_url` (e.g. `http://localhost:8080/api`)
    pub fn new(base_url: &str) -> ApiResult<Self> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> ApiResult<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Build an endpoint URL, percent-encoding each segment
    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Map non-success statuses onto the error taxonomy
    ///
    /// A 404 is `NotFound` only for requests naming an existing resource
    /// (`missing`); elsewhere it is an ordinary API failure.
    async fn ensure_success(
        response: reqwest::Response,
        missing: Option<&str>,
    ) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let (StatusCode::NOT_FOUND, Some(what)) = (status, missing) {
            return Err(ApiError::NotFound(what.to_string()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::ApiError {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MailboxService for MailboxClient {
    async fn account_exists(&self, account_id: &str) -> ApiResult<bool> {
        let url = self.endpoint(&["accounts", account_id])?;
        debug!("Mailbox: checking account {}", account_id);

        let response = self.client.get(url).send().await?;
        let exists = response.status().is_success();
        if !exists {
            debug!("Mailbox: account {} check returned {}", account_id, response.status());
        }
        Ok(exists)
    }

    async fn create_account(&self) -> ApiResult<Account> {
        let url = self.endpoint(&["accounts"])?;
        debug!("Mailbox: creating account");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;
        let response = Self::ensure_success(response, None).await?;

        let account: Account = response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        info!("Mailbox: created account {} <{}>", account.account_id, account.email);
        Ok(account)
    }

    async fn list_emails(&self, account_id: &str) -> ApiResult<Vec<Message>> {
        let url = self.endpoint(&["accounts", account_id, "emails"])?;
        debug!("Mailbox: listing emails for {}", account_id);

        let response = self.client.get(url).send().await?;
        let missing = format!("account {account_id}");
        let response = Self::ensure_success(response, Some(&missing)).await?;

        let list: EmailListResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        let emails = list.emails.unwrap_or_default();
        debug!("Mailbox: got {} emails for {}", emails.len(), account_id);
        Ok(emails)
    }

    async fn get_email(&self, account_id: &str, email_id: &str) -> ApiResult<Message> {
        let url = self.endpoint(&["accounts", account_id, "emails", email_id])?;
        debug!("Mailbox: fetching email {} for {}", email_id, account_id);

        let response = self.client.get(url).send().await?;
        let missing = format!("email {email_id}");
        let response = Self::ensure_success(response, Some(&missing)).await?;

        let detail: EmailDetailResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        debug!("Mailbox: got email {} ({} bytes)", email_id, detail.email.body.len());
        Ok(detail.email)
    }
}
