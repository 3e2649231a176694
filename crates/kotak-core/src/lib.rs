//! Core session logic for Kotak
//!
//! Provides the session controller, inbox synchronizer, message selection,
//! and local persistence of the anonymous account.

mod config;
mod database;
mod error;
mod selection;
mod session;
mod store;
mod sync;
#[cfg(test)]
mod testing;

pub use config::ClientConfig;
pub use database::Database;
pub use error::{CoreError, CoreResult};
pub use selection::{BodyKind, SelectionController};
pub use session::{
    DetailView, SessionController, SessionOptions, SessionPhase, SessionSnapshot,
    DETAIL_FAILED, DETAIL_NOT_FOUND, GENERATE_FAILED, REFRESH_FAILED, SESSION_EXPIRED,
};
pub use store::{SessionStore, ACCOUNT_KEY};
pub use sync::{InboxSynchronizer, DEFAULT_REFRESH_INTERVAL};

/// Re-export models for convenience
pub mod models {
    pub use kotak_api::{Account, Message, NO_SUBJECT};
}
