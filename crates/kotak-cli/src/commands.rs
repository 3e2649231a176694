//! Subcommand handlers

use anyhow::{bail, Context, Result};
use kotak_core::models::{Account, Message};
use kotak_core::{BodyKind, DetailView, SessionController, SessionPhase, SessionSnapshot};
use std::collections::HashSet;

fn print_account(account: &Account) {
    println!("Address: {}", account.email);
    println!("Account: {}", account.account_id);
    println!(
        "Created: {}",
        account.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn print_summary(message: &Message) {
    println!(
        "{:>8}  {}  {:<30}  {}",
        message.id,
        message.received_at.format("%Y-%m-%d %H:%M"),
        message.from,
        message.display_subject()
    );
}

/// Startup state with a usable session, or an error telling the user what to do
async fn require_session(controller: &SessionController) -> Result<SessionSnapshot> {
    let snapshot = controller.ready().await?;
    if !snapshot.is_active() {
        if let Some(error) = &snapshot.error {
            bail!("{}", error);
        }
        bail!("No active address. Run `kotak new` to generate one.");
    }
    Ok(snapshot)
}

pub async fn new(controller: &SessionController) -> Result<()> {
    controller.ready().await?;
    let account = controller
        .generate()
        .await
        .context("Failed to generate email address")?;
    print_account(&account);
    Ok(())
}

pub async fn status(controller: &SessionController) -> Result<()> {
    let snapshot = controller.ready().await?;
    match &snapshot.account {
        Some(account) if snapshot.phase == SessionPhase::Active => print_account(account),
        _ => println!("No active address. Run `kotak new` to generate one."),
    }
    Ok(())
}

pub async fn inbox(controller: &SessionController) -> Result<()> {
    require_session(controller).await?;

    if let Err(e) = controller.refresh().await {
        let snapshot = controller.snapshot().await?;
        match snapshot.error {
            Some(error) => bail!("{}", error),
            None => return Err(e.into()),
        }
    }

    let snapshot = controller.snapshot().await?;
    let messages = snapshot.messages();
    if messages.is_empty() {
        println!("Inbox is empty");
        return Ok(());
    }
    for message in messages {
        print_summary(message);
    }
    Ok(())
}

/// Whether `read` has an answer for `id`: its detail resolved, or the
/// session it was requested under is gone
fn detail_settled(snapshot: &SessionSnapshot, id: &str) -> bool {
    if !snapshot.is_active() {
        return true;
    }
    snapshot.selected_id.as_deref() == Some(id)
        && matches!(snapshot.detail, DetailView::Loaded(_) | DetailView::Failed(_))
}

pub async fn read(controller: &SessionController, id: String) -> Result<()> {
    require_session(controller).await?;

    let mut state_rx = controller.subscribe();
    controller.select(id.clone()).await?;

    let snapshot = state_rx
        .wait_for(|s| detail_settled(s, &id))
        .await?
        .clone();

    if !snapshot.is_active() {
        match snapshot.error {
            Some(error) => bail!("{}", error),
            None => bail!("The address is no longer available"),
        }
    }

    match snapshot.detail {
        DetailView::Loaded(message) => {
            println!("From:    {}", message.from);
            println!("To:      {}", message.to);
            println!("Subject: {}", message.display_subject());
            println!("Date:    {}", message.received_at.format("%Y-%m-%d %H:%M:%S UTC"));
            if BodyKind::of(&message) == BodyKind::Markup {
                println!("Format:  HTML");
            }
            println!();
            println!("{}", message.body);
            Ok(())
        }
        DetailView::Failed(error) => bail!("{}", error),
        DetailView::Empty | DetailView::Loading => bail!("Message {} was not loaded", id),
    }
}

pub async fn watch(controller: &SessionController) -> Result<()> {
    let snapshot = controller.ready().await?;
    if !snapshot.is_active() {
        let account = controller.generate().await?;
        println!("Generated {}", account.email);
    } else if let Some(account) = &snapshot.account {
        println!("Watching {}", account.email);
    }
    println!("Waiting for mail (Ctrl-C to stop)");

    let mut state_rx = controller.subscribe();
    let mut seen: HashSet<String> = HashSet::new();
    let mut last_error: Option<String> = None;

    loop {
        {
            let snapshot = state_rx.borrow_and_update();
            for message in snapshot.messages() {
                if seen.insert(message.id.clone()) {
                    print_summary(message);
                }
            }

            if snapshot.error != last_error {
                if let Some(error) = &snapshot.error {
                    eprintln!("{}", error);
                }
                last_error = snapshot.error.clone();
            }

            if snapshot.phase == SessionPhase::NoSession {
                bail!("The address is no longer available");
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nReceived signal, shutting down...");
                return Ok(());
            }
            changed = state_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
        }
    }
}
