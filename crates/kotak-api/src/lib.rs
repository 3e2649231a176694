pub mod client;
pub mod error;
pub mod service;
pub mod types;

pub use client::MailboxClient;
pub use error::{ApiError, ApiResult};
pub use service::MailboxService;
pub use types::*;
