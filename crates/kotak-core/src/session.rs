//! Session orchestration
//!
//! A single task owns every piece of session state. Network calls run on
//! spawned tasks and report back through the same command channel, tagged
//! with the account (and message) they were issued for. Results whose tags
//! no longer match the current state are dropped.

use crate::selection::SelectionController;
use crate::store::SessionStore;
use crate::sync::{InboxSynchronizer, DEFAULT_REFRESH_INTERVAL};
use crate::{CoreError, CoreResult};
use kotak_api::{Account, MailboxService, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const REFRESH_FAILED: &str = "Failed to fetch emails. Please try refreshing.";
pub const GENERATE_FAILED: &str = "Failed to generate email address. Please try again.";
pub const SESSION_EXPIRED: &str = "This address has expired. Generate a new one.";
pub const DETAIL_FAILED: &str = "Error loading email details. Please try again.";
pub const DETAIL_NOT_FOUND: &str = "Could not load this message.";

/// Lifecycle of the anonymous session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    NoSession,
    /// A restored account is being checked against the mailbox service
    Validating,
    /// A new account is being created
    Creating,
    Active,
}

/// Detail view for the selected message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DetailView {
    #[default]
    Empty,
    Loading,
    Loaded(Message),
    Failed(String),
}

/// State exposed to the presentation layer
#[derive(Debug, Clone, Default)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub account: Option<Account>,
    /// `None` until the first refresh of the session lands
    pub messages: Option<Vec<Message>>,
    pub selected_id: Option<String>,
    pub detail: DetailView,
    pub loading: bool,
    pub error: Option<String>,
    /// Whether the refresh schedule is running
    pub syncing: bool,
}

impl SessionSnapshot {
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active && self.account.is_some()
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.as_deref().unwrap_or_default()
    }
}

/// Tunables for [`SessionController`]
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub refresh_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Commands handled by the session task
///
/// The first group comes from [`SessionController`]; the rest are reports
/// from background work.
pub(crate) enum SessionCommand {
    Generate {
        reply: oneshot::Sender<CoreResult<Account>>,
    },
    Refresh {
        reply: oneshot::Sender<CoreResult<()>>,
    },
    Select {
        message_id: String,
    },
    Revalidate {
        reply: oneshot::Sender<CoreResult<bool>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,

    Validated {
        account_id: String,
        exists: bool,
        reply: Option<oneshot::Sender<CoreResult<bool>>>,
    },
    Created {
        result: CoreResult<Account>,
    },
    RefreshDue {
        account_id: String,
    },
    Refreshed {
        account_id: String,
        result: CoreResult<Vec<Message>>,
    },
    DetailFetched {
        account_id: String,
        message_id: String,
        result: CoreResult<Message>,
    },
}

/// Owner of all session state; runs on its own task
struct SessionEngine {
    service: Arc<dyn MailboxService>,
    store: SessionStore,
    synchronizer: InboxSynchronizer,
    selection: SelectionController,
    snapshot: SessionSnapshot,
    state_tx: watch::Sender<SessionSnapshot>,
    /// Weak so the task ends once every [`SessionController`] is dropped
    command_tx: mpsc::WeakSender<SessionCommand>,
    command_rx: mpsc::Receiver<SessionCommand>,
    /// Caller waiting on an account creation
    creating: Option<oneshot::Sender<CoreResult<Account>>>,
    /// Generation requested while a restored account was being validated
    deferred_generate: Option<oneshot::Sender<CoreResult<Account>>>,
}

impl SessionEngine {
    async fn run(mut self) {
        info!("Session controller started");

        while let Some(command) = self.command_rx.recv().await {
            if let SessionCommand::Shutdown = command {
                info!("Session controller shutting down");
                break;
            }
            self.handle_command(command).await;
            self.publish();
        }

        self.synchronizer.stop();
        info!("Session controller stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Generate { reply } => self.generate(reply),
            SessionCommand::Refresh { reply } => match self.active_account_id() {
                Some(account_id) => self.issue_refresh(account_id, Some(reply)),
                None => {
                    let _ = reply.send(Err(CoreError::NoSession));
                }
            },
            SessionCommand::Select { message_id } => {
                self.selection.select(message_id.clone());
                self.snapshot.selected_id = Some(message_id);
                self.resolve_selection();
            }
            SessionCommand::Revalidate { reply } => match self.active_account_id() {
                Some(account_id) => self.spawn_validation(account_id, Some(reply)),
                None => {
                    let _ = reply.send(Err(CoreError::NoSession));
                }
            },
            SessionCommand::Snapshot { reply } => {
                self.derive();
                let _ = reply.send(self.snapshot.clone());
            }
            SessionCommand::Shutdown => {}
            SessionCommand::Validated {
                account_id,
                exists,
                reply,
            } => self.on_validated(account_id, exists, reply).await,
            SessionCommand::Created { result } => self.on_created(result).await,
            SessionCommand::RefreshDue { account_id } => {
                let scheduled = self.synchronizer.account_id() == Some(account_id.as_str());
                if scheduled && self.active_account_id().as_deref() == Some(account_id.as_str()) {
                    self.issue_refresh(account_id, None);
                } else {
                    debug!("Ignoring refresh tick for stale account {}", account_id);
                }
            }
            SessionCommand::Refreshed { account_id, result } => {
                self.on_refreshed(account_id, result).await
            }
            SessionCommand::DetailFetched {
                account_id,
                message_id,
                result,
            } => self.on_detail_fetched(account_id, message_id, result),
        }
    }

    /// Account id while the session is active
    fn active_account_id(&self) -> Option<String> {
        if self.snapshot.phase != SessionPhase::Active {
            return None;
        }
        self.snapshot.account.as_ref().map(|a| a.account_id.clone())
    }

    /// Sender for background work to report on; `None` once every handle is gone
    fn reporter(&self) -> Option<mpsc::Sender<SessionCommand>> {
        self.command_tx.upgrade()
    }

    fn current_account_id(&self) -> Option<&str> {
        self.snapshot.account.as_ref().map(|a| a.account_id.as_str())
    }

    fn generate(&mut self, reply: oneshot::Sender<CoreResult<Account>>) {
        if self.creating.is_some() || self.deferred_generate.is_some() {
            let _ = reply.send(Err(CoreError::GenerationInProgress));
            return;
        }

        if self.snapshot.phase == SessionPhase::Validating {
            debug!("Deferring address generation until validation completes");
            self.deferred_generate = Some(reply);
            return;
        }

        let Some(command_tx) = self.reporter() else {
            let _ = reply.send(Err(CoreError::Shutdown));
            return;
        };

        // An active session keeps syncing until its replacement exists
        if self.snapshot.phase == SessionPhase::NoSession {
            self.snapshot.phase = SessionPhase::Creating;
        }
        self.snapshot.error = None;
        self.creating = Some(reply);

        info!("Generating a new address");
        let service = self.service.clone();
        tokio::spawn(async move {
            let result = service.create_account().await.map_err(CoreError::from);
            let _ = command_tx.send(SessionCommand::Created { result }).await;
        });
    }

    async fn on_created(&mut self, result: CoreResult<Account>) {
        let Some(reply) = self.creating.take() else {
            warn!("Account creation result with no pending request");
            return;
        };

        match result {
            Ok(account) => {
                if let Err(e) = self.store.save(&account).await {
                    warn!("Failed to persist account {}: {}", account.account_id, e);
                }
                self.start_session(account.clone());
                let _ = reply.send(Ok(account));
            }
            Err(e) => {
                warn!("Failed to generate address: {}", e);
                if self.snapshot.phase == SessionPhase::Creating {
                    self.snapshot.phase = SessionPhase::NoSession;
                }
                self.snapshot.error = Some(GENERATE_FAILED.to_string());
                let _ = reply.send(Err(e));
            }
        }
    }

    fn spawn_validation(
        &self,
        account_id: String,
        reply: Option<oneshot::Sender<CoreResult<bool>>>,
    ) {
        let Some(command_tx) = self.reporter() else {
            return;
        };
        let service = self.service.clone();
        tokio::spawn(async move {
            let exists = SessionStore::validate(service.as_ref(), &account_id).await;
            let _ = command_tx
                .send(SessionCommand::Validated {
                    account_id,
                    exists,
                    reply,
                })
                .await;
        });
    }

    async fn on_validated(
        &mut self,
        account_id: String,
        exists: bool,
        reply: Option<oneshot::Sender<CoreResult<bool>>>,
    ) {
        let outcome = if self.current_account_id() != Some(account_id.as_str()) {
            debug!("Ignoring validation of stale account {}", account_id);
            Err(CoreError::SessionChanged)
        } else if exists {
            if self.snapshot.phase == SessionPhase::Validating {
                if let Some(account) = self.snapshot.account.clone() {
                    info!("Restored account {} is live", account_id);
                    self.start_session(account);
                }
            }
            Ok(true)
        } else {
            info!("Account {} no longer exists", account_id);
            // A stale restored account is dropped silently
            let message = if self.snapshot.phase == SessionPhase::Validating {
                None
            } else {
                Some(SESSION_EXPIRED)
            };
            self.expire(message).await;
            Ok(false)
        };

        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }

        if self.snapshot.phase != SessionPhase::Validating {
            if let Some(deferred) = self.deferred_generate.take() {
                self.generate(deferred);
            }
        }
    }

    /// Make `account` the active session and start its refresh schedule
    fn start_session(&mut self, account: Account) {
        self.synchronizer.stop();

        self.snapshot.account = Some(account.clone());
        self.snapshot.phase = SessionPhase::Active;
        self.snapshot.messages = None;
        self.snapshot.error = None;

        self.synchronizer.start(&account, self.command_tx.clone());
        self.resolve_selection();
    }

    /// Leave the active session and forget its account
    async fn expire(&mut self, error: Option<&str>) {
        // Schedule goes first: nothing may refresh a cleared account
        self.synchronizer.stop();

        if let Err(e) = self.store.clear().await {
            warn!("Failed to clear persisted account: {}", e);
        }
        self.selection.cancel_fetch();

        self.snapshot.account = None;
        self.snapshot.phase = if self.creating.is_some() {
            SessionPhase::Creating
        } else {
            SessionPhase::NoSession
        };
        self.snapshot.messages = None;
        self.snapshot.detail = DetailView::Empty;
        self.snapshot.error = error.map(str::to_string);
    }

    fn issue_refresh(
        &mut self,
        account_id: String,
        waiter: Option<oneshot::Sender<CoreResult<()>>>,
    ) {
        let Some(command_tx) = self.reporter() else {
            return;
        };
        if self.synchronizer.begin_refresh(&account_id, waiter) {
            InboxSynchronizer::spawn_refresh(self.service.clone(), account_id, command_tx);
        }
    }

    async fn on_refreshed(&mut self, account_id: String, result: CoreResult<Vec<Message>>) {
        let tracked = self.synchronizer.finish_refresh(&account_id, &result);

        if self.active_account_id().as_deref() != Some(account_id.as_str()) {
            debug!("Discarding inbox of {} (tracked={}), session moved on", account_id, tracked);
            return;
        }

        match result {
            Ok(messages) => {
                self.snapshot.messages = Some(messages);
                self.snapshot.error = None;
            }
            Err(CoreError::NotFound(_)) => {
                warn!("Account {} vanished from the mailbox service", account_id);
                self.expire(Some(SESSION_EXPIRED)).await;
            }
            Err(_) => {
                self.snapshot.error = Some(REFRESH_FAILED.to_string());
            }
        }
    }

    /// Fetch the detail of the selected message for the active account
    fn resolve_selection(&mut self) {
        let Some(account_id) = self.active_account_id() else {
            self.selection.cancel_fetch();
            self.snapshot.detail = DetailView::Empty;
            return;
        };

        let Some(command_tx) = self.reporter() else {
            return;
        };
        if let Some(message_id) = self.selection.begin_fetch(&account_id) {
            self.snapshot.detail = DetailView::Loading;
            SelectionController::spawn_fetch(
                self.service.clone(),
                account_id,
                message_id,
                command_tx,
            );
        }
    }

    fn on_detail_fetched(
        &mut self,
        account_id: String,
        message_id: String,
        result: CoreResult<Message>,
    ) {
        if self.active_account_id().as_deref() != Some(account_id.as_str())
            || !self.selection.accept(&account_id, &message_id)
        {
            return;
        }

        self.snapshot.detail = match result {
            Ok(message) => DetailView::Loaded(message),
            Err(CoreError::NotFound(_)) => DetailView::Failed(DETAIL_NOT_FOUND.to_string()),
            Err(_) => DetailView::Failed(DETAIL_FAILED.to_string()),
        };
    }

    /// Recompute the fields that mirror component state
    fn derive(&mut self) {
        self.snapshot.syncing = self.synchronizer.is_running();
        let refreshing = self
            .active_account_id()
            .is_some_and(|id| self.synchronizer.is_refreshing(&id));
        self.snapshot.loading = self.creating.is_some() || refreshing;
    }

    fn publish(&mut self) {
        self.derive();
        self.state_tx.send_replace(self.snapshot.clone());
    }
}

/// Handle to the session task
///
/// Cheap to clone. The task runs until [`SessionController::shutdown`] or
/// until the last handle is dropped.
#[derive(Clone)]
pub struct SessionController {
    command_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionController {
    /// Restore any persisted account and spawn the session task
    ///
    /// A restored account is validated in the background; with nothing
    /// persisted no request is made.
    pub async fn start(
        service: Arc<dyn MailboxService>,
        mut store: SessionStore,
        options: SessionOptions,
    ) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(100);

        let mut snapshot = SessionSnapshot::default();
        let restored = store.load().await;
        if let Some(account) = &restored {
            info!("Restored account {} <{}>, validating", account.account_id, account.email);
            snapshot.phase = SessionPhase::Validating;
            snapshot.account = Some(account.clone());
        }

        let (state_tx, state_rx) = watch::channel(snapshot.clone());
        let engine = SessionEngine {
            service,
            store,
            synchronizer: InboxSynchronizer::new(options.refresh_interval),
            selection: SelectionController::new(),
            snapshot,
            state_tx,
            command_tx: command_tx.downgrade(),
            command_rx,
            creating: None,
            deferred_generate: None,
        };

        if let Some(account) = restored {
            engine.spawn_validation(account.account_id, None);
        }
        let handle = tokio::spawn(engine.run());

        (Self { command_tx, state_rx }, handle)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> CoreResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(make(reply_tx))
            .await
            .map_err(|_| CoreError::Shutdown)?;
        reply_rx.await.map_err(|_| CoreError::Shutdown)
    }

    /// Create a new address and make it the active session
    pub async fn generate(&self) -> CoreResult<Account> {
        self.request(|reply| SessionCommand::Generate { reply }).await?
    }

    /// Refresh the inbox now, sharing any refresh already in flight
    pub async fn refresh(&self) -> CoreResult<()> {
        self.request(|reply| SessionCommand::Refresh { reply }).await?
    }

    /// Select a message; its detail is fetched in the background
    pub async fn select(&self, message_id: impl Into<String>) -> CoreResult<()> {
        self.command_tx
            .send(SessionCommand::Select {
                message_id: message_id.into(),
            })
            .await
            .map_err(|_| CoreError::Shutdown)
    }

    /// Re-check that the active account still exists; expires it if not
    pub async fn revalidate(&self) -> CoreResult<bool> {
        self.request(|reply| SessionCommand::Revalidate { reply }).await?
    }

    /// State after every previously sent command has been handled
    pub async fn snapshot(&self) -> CoreResult<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot { reply }).await
    }

    /// Most recently published state
    pub fn state(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    /// Wait for startup validation to settle
    pub async fn ready(&self) -> CoreResult<SessionSnapshot> {
        let mut state_rx = self.subscribe();
        let snapshot = state_rx
            .wait_for(|s| s.phase != SessionPhase::Validating)
            .await
            .map_err(|_| CoreError::Shutdown)?;
        Ok(snapshot.clone())
    }

    pub async fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown).await;
    }
}
