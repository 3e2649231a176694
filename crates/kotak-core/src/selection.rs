//! Message selection and on-demand detail retrieval

use crate::session::SessionCommand;
use crate::{CoreError, CoreResult};
use kotak_api::{MailboxService, Message};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How a message body should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Render with structural interpretation
    Markup,
    /// Render verbatim
    Text,
}

impl BodyKind {
    /// Markup iff the body, ignoring leading whitespace, opens with `<` and
    /// contains a `>` somewhere. Text that happens to start with `<` is
    /// classified as markup too.
    pub fn classify(body: &str) -> Self {
        if body.trim_start().starts_with('<') && body.contains('>') {
            BodyKind::Markup
        } else {
            BodyKind::Text
        }
    }

    pub fn of(message: &Message) -> Self {
        Self::classify(&message.body)
    }
}

/// Tracks the selected message and the detail request issued for it
#[derive(Debug, Default)]
pub struct SelectionController {
    selected: Option<String>,
    /// (account, message) of the latest detail request
    pending: Option<(String, String)>,
}

impl SelectionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select a message. No network effect by itself.
    pub fn select(&mut self, message_id: impl Into<String>) {
        let message_id = message_id.into();
        debug!("Selected message {}", message_id);
        self.selected = Some(message_id);
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Record a detail request for the current selection under `account_id`
    ///
    /// Returns the message id to fetch, or `None` when nothing is selected.
    pub(crate) fn begin_fetch(&mut self, account_id: &str) -> Option<String> {
        let message_id = self.selected.clone()?;
        self.pending = Some((account_id.to_string(), message_id.clone()));
        Some(message_id)
    }

    /// Whether a detail response still matches the latest request
    ///
    /// Accepting consumes the pending request; a response for an earlier
    /// selection or account is refused.
    pub(crate) fn accept(&mut self, account_id: &str, message_id: &str) -> bool {
        let current = matches!(
            &self.pending,
            Some((a, m)) if a == account_id && m == message_id
        ) && self.selected() == Some(message_id);

        if current {
            self.pending = None;
        } else {
            debug!(
                "Discarding detail for {}/{}, selection moved on",
                account_id, message_id
            );
        }
        current
    }

    /// Forget any outstanding request, keeping the selection itself
    pub(crate) fn cancel_fetch(&mut self) {
        self.pending = None;
    }

    /// Retrieve the full content of a message
    pub async fn fetch_detail(
        service: &dyn MailboxService,
        account_id: &str,
        message_id: &str,
    ) -> CoreResult<Message> {
        service.get_email(account_id, message_id).await.map_err(|e| {
            warn!("Failed to load message {} for {}: {}", message_id, account_id, e);
            CoreError::from(e)
        })
    }

    pub(crate) fn spawn_fetch(
        service: Arc<dyn MailboxService>,
        account_id: String,
        message_id: String,
        command_tx: mpsc::Sender<SessionCommand>,
    ) {
        tokio::spawn(async move {
            let result = Self::fetch_detail(service.as_ref(), &account_id, &message_id).await;
            let _ = command_tx
                .send(SessionCommand::DetailFetched {
                    account_id,
                    message_id,
                    result,
                })
                .await;
        });
    }
}
