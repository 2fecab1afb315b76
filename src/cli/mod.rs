//! Command-line interface for warden, parsed with clap.

pub mod commands;

use clap::{Parser, Subcommand};

/// Warden - session security service
#[derive(Parser)]
#[command(name = "warden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the HTTP server with background maintenance (default)
    Serve,

    /// Create the default config file and the database schema
    #[command(alias = "--init")]
    Init,

    /// Delete stale sessions, used reset tokens and old audit entries
    Cleanup {
        /// Remove sessions expired or revoked longer than this many days
        #[arg(long)]
        sessions_days: Option<i64>,

        /// Remove audit entries older than this many days
        #[arg(long)]
        audit_days: Option<i64>,
    },

    /// Create an administrator, or promote an existing account.
    /// The password is read from WARDEN_ADMIN_PASSWORD.
    CreateAdmin {
        #[arg(long)]
        email: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cleanup_flags() {
        let cli = Cli::parse_from([
            "warden",
            "cleanup",
            "--sessions-days",
            "7",
            "--audit-days",
            "30",
        ]);
        assert_eq!(
            cli.command,
            Some(Commands::Cleanup {
                sessions_days: Some(7),
                audit_days: Some(30),
            })
        );
    }

    #[test]
    fn parses_create_admin() {
        let cli = Cli::parse_from(["warden", "create-admin", "--email", "root@example.com"]);
        assert_eq!(
            cli.command,
            Some(Commands::CreateAdmin {
                email: "root@example.com".to_string()
            })
        );
    }

    #[test]
    fn no_subcommand_is_allowed() {
        let cli = Cli::parse_from(["warden"]);
        assert!(cli.command.is_none());
    }
}
