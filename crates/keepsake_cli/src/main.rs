//! Keepsake CLI
//!
//! Command-line tools for Keepsake store administration.
//!
//! # Commands
//!
//! - `inspect` - Display schema version, collections and journal size
//! - `init` - Create a store with the standard collections
//! - `users` - List, add and remove user profiles
//! - `whoami` - Show the acting user
//! - `use-user` - Switch the acting user
//! - `compact` - Rewrite the journal as a snapshot

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Keepsake store administration tools.
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    /// Output format
    #[arg(global = true, short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// How results are printed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// Pretty-printed JSON
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Display schema version, collections and journal size
    Inspect,

    /// Create a store with the standard collections
    Init {
        /// Name of the default user to seed
        #[arg(long, default_value = "Me")]
        user: String,
    },

    /// Manage user profiles
    Users {
        #[command(subcommand)]
        action: UsersAction,
    },

    /// Show the acting user
    Whoami,

    /// Switch the acting user
    UseUser {
        /// Id of the user to act as
        id: String,
    },

    /// Rewrite the journal as a snapshot
    Compact {
        /// Only compact past the configured size threshold
        #[arg(long)]
        if_needed: bool,
    },
}

#[derive(Subcommand)]
enum UsersAction {
    /// List user profiles
    List {
        /// Include removed users
        #[arg(short, long)]
        all: bool,
    },

    /// Add a user profile
    Add {
        /// Display name
        name: String,

        /// Make the new user the default
        #[arg(long)]
        default: bool,
    },

    /// Remove a user and their records
    Remove {
        /// Id of the user to remove
        id: String,

        /// Delete records permanently instead of marking them deleted
        #[arg(long)]
        hard: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let path = cli.path.ok_or("Store path required (--path)")?;
    let format = cli.format;

    match cli.command {
        Commands::Inspect => commands::inspect::run(&path, format)?,
        Commands::Init { user } => commands::init::run(&path, &user, format)?,
        Commands::Users { action } => match action {
            UsersAction::List { all } => commands::users::list(&path, all, format)?,
            UsersAction::Add { name, default } => commands::users::add(&path, &name, default, format)?,
            UsersAction::Remove { id, hard } => commands::users::remove(&path, &id, hard, format)?,
        },
        Commands::Whoami => commands::session::whoami(&path, format)?,
        Commands::UseUser { id } => commands::session::use_user(&path, &id, format)?,
        Commands::Compact { if_needed } => commands::compact::run(&path, if_needed, format)?,
    }

    Ok(())
}
