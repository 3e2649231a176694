use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "kotak", version, about = "Disposable email inbox in your terminal")]
pub struct Cli {
    /// Config file (default: {user_config_dir}/kotak/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a new address, replacing the current one
    New,

    /// Show the current address
    Status,

    /// Refresh and list received messages
    Inbox,

    /// Show a single message
    Read {
        /// Message id as listed by `kotak inbox`
        id: String,
    },

    /// Keep the inbox in sync and print new messages until Ctrl-C
    Watch,
}
