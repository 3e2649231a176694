//! Kotak - disposable email from the terminal
//!
//! Thin front end over the session controller in `kotak-core`.

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use kotak_api::{MailboxClient, MailboxService};
use kotak_core::{ClientConfig, Database, SessionController, SessionStore};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output stays pipeable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("kotak=info".parse()?))
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    tracing::debug!("Using mailbox service at {}", config.base_url());

    let db_path = config.database_path();
    let db = Database::open(&db_path)
        .await
        .with_context(|| format!("Failed to open database at {}", db_path.display()))?;
    let db = Arc::new(db);

    let service: Arc<dyn MailboxService> = Arc::new(MailboxClient::new(&config.base_url())?);
    let (controller, handle) = SessionController::start(
        service,
        SessionStore::new(db),
        config.session_options(),
    )
    .await;

    let result = match cli.command {
        Command::New => commands::new(&controller).await,
        Command::Status => commands::status(&controller).await,
        Command::Inbox => commands::inbox(&controller).await,
        Command::Read { id } => commands::read(&controller, id).await,
        Command::Watch => commands::watch(&controller).await,
    };

    controller.shutdown().await;
    let _ = handle.await;
    result
}
