use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "dustbin")]
#[command(about = "A command-line trash can", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List every trashed item across all trash directories
    List,
    /// Move files or directories into the trash
    Put { paths: Vec<PathBuf> },
    /// Restore a trashed item (by address) to its original location
    Restore { address: String },
    /// Permanently delete a trashed item (by address)
    Delete { address: String },
    /// Permanently delete everything in every trash directory
    Empty,
    /// Show per-trash disk usage and partition capacity
    Size,
    /// Print configuration values
    PrintConfig,
}
