//! CLI module for Dirigent.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Dirigent - Transcription Job Orchestrator
///
/// Coordinates audio transcription on GPU compute endpoints and AI content
/// generation jobs, with durable job records and owner event streams. The
/// name is the Norwegian word for a conductor.
#[derive(Parser, Debug)]
#[command(name = "dirigent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration and verify the environment
    Init,

    /// Check configuration, credentials, and compute endpoint health
    Doctor,

    /// Run the orchestration API server
    Serve {
        /// Host address to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// List jobs for an owner
    Jobs {
        /// Owner id whose jobs to list
        owner: String,
    },
}
