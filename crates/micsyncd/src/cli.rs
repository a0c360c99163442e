use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Keep a wireless-microphone inventory synchronized with vendor APIs.
#[derive(Debug, Parser)]
#[command(name = "micsyncd", version, about, propagate_version = true)]
pub struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, short = 'c', env = "MICSYNCD_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Poll every enabled vendor on a schedule until interrupted (default).
    Run,

    /// Synchronize once and print the results as JSON.
    Sync {
        /// Only this vendor code.
        vendor: Option<String>,
    },

    /// Print, add or remove a vendor's discovery candidates.
    Discovery {
        /// Vendor code.
        vendor: String,

        /// Address to add (repeatable).
        #[arg(long = "add", value_name = "IP")]
        add: Vec<String>,

        /// Address to remove (repeatable).
        #[arg(long = "remove", value_name = "IP")]
        remove: Vec<String>,
    },

    /// Write a starter config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}
