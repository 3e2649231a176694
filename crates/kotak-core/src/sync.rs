//! Periodic inbox synchronization

use crate::session::SessionCommand;
use crate::{CoreError, CoreResult};
use kotak_api::{Account, MailboxService, Message};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// How often the inbox is re-fetched while a session is active
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Handle to a running refresh schedule
struct SyncWorker {
    account_id: String,
    /// Channel to send shutdown signal
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the refresh schedule for the active account
///
/// The schedule itself only requests refreshes; the session task decides
/// whether to issue them. Refreshes for one account never overlap: a request
/// that arrives while one is outstanding is coalesced onto it.
pub struct InboxSynchronizer {
    interval: Duration,
    worker: Option<SyncWorker>,
    /// Account the outstanding refresh was issued for
    in_flight: Option<String>,
    /// Manual refresh callers waiting on the outstanding refresh
    waiters: Vec<oneshot::Sender<CoreResult<()>>>,
}

impl InboxSynchronizer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            worker: None,
            in_flight: None,
            waiters: Vec::new(),
        }
    }

    /// Start the recurring schedule for `account`, replacing any prior one
    ///
    /// The first tick fires immediately. The schedule holds only a weak
    /// sender and ends once the session's channel closes.
    pub(crate) fn start(
        &mut self,
        account: &Account,
        command_tx: mpsc::WeakSender<SessionCommand>,
    ) {
        self.stop();

        let account_id = account.account_id.clone();
        info!("Starting inbox sync for {} every {:?}", account_id, self.interval);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let interval = self.interval;
        let worker_account = account_id.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        debug!("Inbox sync schedule for {} cancelled", worker_account);
                        break;
                    }
                    _ = ticker.tick() => {
                        let due = SessionCommand::RefreshDue {
                            account_id: worker_account.clone(),
                        };
                        let sent = match command_tx.upgrade() {
                            Some(tx) => tx.send(due).await.is_ok(),
                            None => false,
                        };
                        if !sent {
                            debug!("Session gone, ending sync schedule for {}", worker_account);
                            break;
                        }
                    }
                }
            }
        });

        self.worker = Some(SyncWorker {
            account_id,
            shutdown_tx,
            task,
        });
    }

    /// Cancel the recurring schedule. Safe to call when nothing is running.
    ///
    /// A refresh already on the wire is left to complete; its result is
    /// dropped by the session because the account no longer matches.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            info!("Stopping inbox sync for {}", worker.account_id);
            let _ = worker.shutdown_tx.send(());
            drop(worker.task);
        }
        self.in_flight = None;
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(Err(CoreError::SessionChanged));
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Account the schedule is running for
    pub fn account_id(&self) -> Option<&str> {
        self.worker.as_ref().map(|w| w.account_id.as_str())
    }

    /// Whether a refresh for `account_id` is outstanding
    pub fn is_refreshing(&self, account_id: &str) -> bool {
        self.in_flight.as_deref() == Some(account_id)
    }

    /// Record a refresh request for `account_id`
    ///
    /// Returns `true` when the caller must issue a new request, `false` when
    /// the request was coalesced onto the outstanding one.
    pub(crate) fn begin_refresh(
        &mut self,
        account_id: &str,
        waiter: Option<oneshot::Sender<CoreResult<()>>>,
    ) -> bool {
        self.waiters.extend(waiter);
        if self.is_refreshing(account_id) {
            debug!("Refresh for {} already in flight, coalescing", account_id);
            return false;
        }
        self.in_flight = Some(account_id.to_string());
        true
    }

    /// Settle the outstanding refresh for `account_id` and answer its waiters
    ///
    /// Returns `false` for a refresh that is no longer tracked.
    pub(crate) fn finish_refresh(
        &mut self,
        account_id: &str,
        result: &CoreResult<Vec<Message>>,
    ) -> bool {
        if !self.is_refreshing(account_id) {
            return false;
        }
        self.in_flight = None;
        for waiter in self.waiters.drain(..) {
            let reply = match result {
                Ok(_) => Ok(()),
                Err(CoreError::NotFound(what)) => Err(CoreError::NotFound(what.clone())),
                Err(e) => Err(CoreError::Network(e.to_string())),
            };
            let _ = waiter.send(reply);
        }
        true
    }

    /// Fetch the current message list for `account_id`, verbatim
    pub async fn refresh_once(
        service: &dyn MailboxService,
        account_id: &str,
    ) -> CoreResult<Vec<Message>> {
        match service.list_emails(account_id).await {
            Ok(messages) => {
                debug!("Refreshed inbox for {}: {} messages", account_id, messages.len());
                Ok(messages)
            }
            Err(e) => {
                warn!("Inbox refresh for {} failed: {}", account_id, e);
                Err(e.into())
            }
        }
    }

    /// Run [`Self::refresh_once`] in the background and report back tagged
    /// with the account it was issued for
    pub(crate) fn spawn_refresh(
        service: Arc<dyn MailboxService>,
        account_id: String,
        command_tx: mpsc::Sender<SessionCommand>,
    ) {
        tokio::spawn(async move {
            let result = Self::refresh_once(service.as_ref(), &account_id).await;
            let _ = command_tx
                .send(SessionCommand::Refreshed { account_id, result })
                .await;
        });
    }
}

impl Drop for InboxSynchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{account, message, Failure, FakeMailbox};

    fn due_for(command: SessionCommand) -> String {
        match command {
            SessionCommand::RefreshDue { account_id } => account_id,
            _ => panic!("expected RefreshDue"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate_then_every_interval() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sync = InboxSynchronizer::new(DEFAULT_REFRESH_INTERVAL);
        sync.start(&account("x1"), tx.downgrade());

        assert_eq!(due_for(rx.recv().await.unwrap()), "x1");

        let before = tokio::time::Instant::now();
        assert_eq!(due_for(rx.recv().await.unwrap()), "x1");
        assert_eq!(before.elapsed(), DEFAULT_REFRESH_INTERVAL);

        sync.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_supersedes_previous_schedule() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sync = InboxSynchronizer::new(Duration::from_secs(30));
        sync.start(&account("a"), tx.downgrade());
        assert_eq!(due_for(rx.recv().await.unwrap()), "a");

        sync.start(&account("b"), tx.downgrade());
        assert_eq!(sync.account_id(), Some("b"));

        // Only the new schedule keeps ticking
        for _ in 0..3 {
            assert_eq!(due_for(rx.recv().await.unwrap()), "b");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sync = InboxSynchronizer::new(Duration::from_secs(30));
        sync.stop();
        assert!(!sync.is_running());

        sync.start(&account("x1"), tx.downgrade());
        assert!(sync.is_running());
        rx.recv().await.unwrap();

        sync.stop();
        sync.stop();
        assert!(!sync.is_running());
        assert_eq!(sync.account_id(), None);

        // No further ticks once stopped
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.try_recv().is_err());
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_ends_when_session_channel_closes() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut sync = InboxSynchronizer::new(Duration::from_secs(30));
        sync.start(&account("x1"), tx.downgrade());
        assert_eq!(due_for(rx.recv().await.unwrap()), "x1");

        drop(tx);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(rx.recv().await.is_none());
        let worker = sync.worker.as_ref().unwrap();
        assert!(worker.task.is_finished());
    }

    #[tokio::test]
    async fn test_refreshes_coalesce_per_account() {
        let mut sync = InboxSynchronizer::new(DEFAULT_REFRESH_INTERVAL);
        let (manual_tx, manual_rx) = oneshot::channel();

        assert!(sync.begin_refresh("x1", None));
        assert!(!sync.begin_refresh("x1", Some(manual_tx)));
        assert!(sync.is_refreshing("x1"));

        // A different account is never blocked by a stale request
        assert!(!sync.finish_refresh("other", &Ok(vec![])));
        assert!(sync.finish_refresh("x1", &Ok(vec![message("m1", "Hi", "hello")])));
        assert!(!sync.is_refreshing("x1"));
        assert!(manual_rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stop_releases_waiters() {
        let mut sync = InboxSynchronizer::new(DEFAULT_REFRESH_INTERVAL);
        let (manual_tx, manual_rx) = oneshot::channel();
        assert!(sync.begin_refresh("x1", Some(manual_tx)));

        sync.stop();
        assert!(matches!(manual_rx.await.unwrap(), Err(CoreError::SessionChanged)));
        assert!(sync.begin_refresh("x1", None));
    }

    #[tokio::test]
    async fn test_refresh_once() {
        let mailbox = FakeMailbox::new();
        mailbox.set_list("x1", vec![message("2", "b", ""), message("1", "a", "")]);
        mailbox.fail_list("gone", Failure::NotFound);
        mailbox.fail_list("flaky", Failure::Network);

        let ids: Vec<_> = InboxSynchronizer::refresh_once(&mailbox, "x1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["2", "1"]);

        // No messages yet is a valid, empty answer
        assert!(InboxSynchronizer::refresh_once(&mailbox, "empty")
            .await
            .unwrap()
            .is_empty());

        assert!(matches!(
            InboxSynchronizer::refresh_once(&mailbox, "gone").await,
            Err(CoreError::NotFound(_))
        ));
        assert!(matches!(
            InboxSynchronizer::refresh_once(&mailbox, "flaky").await,
            Err(CoreError::Network(_))
        ));
    }
}
