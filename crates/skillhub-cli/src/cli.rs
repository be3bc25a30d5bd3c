//! CLI argument definitions for SkillHub.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use skillhub_adapters::config::DEFAULT_CONFIG_PATH;

/// SkillHub -- user storage administration.
#[derive(Parser)]
#[command(
    name = "skillhub",
    version,
    about = "SkillHub -- inspect and manage stored users",
    long_about = "Reads and writes SkillHub users through whichever storage backend is \
                  configured: the embedded local store, a MongoDB database, or the REST API. \
                  Results are printed as JSON."
)]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Backend to use instead of the configured one
    /// (indexeddb, firebase, backend).
    #[arg(long, short, global = true)]
    pub backend: Option<String>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show which backend is active and how many users it holds.
    Status,

    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Manage a user's technologies.
    Tech {
        #[command(subcommand)]
        action: TechAction,
    },

    /// Print every user and technology row.
    Dump,

    /// Delete every record (local store only).
    Clear {
        /// Confirm the wipe.
        #[arg(long)]
        yes: bool,
    },
}

/// Actions for managing user accounts.
#[derive(Subcommand)]
pub enum UserAction {
    /// Create a new user.
    Create {
        /// Login email; must be unique.
        #[arg(long, short)]
        email: String,
        /// Credential stored as given.
        #[arg(long, short)]
        password: String,
        /// Name shown to other users.
        #[arg(long, short)]
        display_name: String,
        /// Role tag, e.g. student or mentor.
        #[arg(long, short, default_value = "student")]
        role: String,
        /// Mark the email as verified.
        #[arg(long)]
        email_verified: bool,
        /// Profile fields as a JSON object, e.g. '{"bio": "..."}'.
        #[arg(long)]
        profile: Option<String>,
    },
    /// Show one user by id or email.
    Get {
        /// The user id.
        #[arg(required_unless_present = "email", conflicts_with = "email")]
        id: Option<String>,
        /// Look the user up by email instead.
        #[arg(long, short)]
        email: Option<String>,
    },
    /// List all users.
    List,
    /// Change fields of an existing user.
    Update(UpdateArgs),
    /// Delete a user and their technologies.
    Delete {
        /// The user id.
        id: String,
    },
}

/// Fields accepted by `user update`.  Omitted flags leave the stored
/// value unchanged.
#[derive(Args)]
pub struct UpdateArgs {
    /// The user id.
    pub id: String,
    #[arg(long, short)]
    pub email: Option<String>,
    #[arg(long, short)]
    pub password: Option<String>,
    #[arg(long, short)]
    pub display_name: Option<String>,
    #[arg(long, short)]
    pub role: Option<String>,
    #[arg(long)]
    pub email_verified: Option<bool>,
    /// Set the last login time to now.
    #[arg(long)]
    pub touch_login: bool,
    /// Profile fields to overwrite, as a JSON object.
    #[arg(long)]
    pub profile: Option<String>,
}

/// Actions for managing technologies.
#[derive(Subcommand)]
pub enum TechAction {
    /// Add one or more technologies to a user.
    Add {
        user_id: String,
        #[arg(required = true)]
        technologies: Vec<String>,
    },
    /// Remove a technology from a user.
    Remove { user_id: String, technology: String },
    /// List a user's technologies.
    List { user_id: String },
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_follow_subcommands() {
        let cli = Cli::try_parse_from([
            "skillhub", "user", "list", "--backend", "backend", "-v", "--config", "x.toml",
        ])
        .unwrap();
        assert_eq!(cli.backend.as_deref(), Some("backend"));
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("x.toml"));
        assert!(matches!(
            cli.command,
            Commands::User {
                action: UserAction::List
            }
        ));
    }

    #[test]
    fn config_defaults_to_config_dir() {
        let cli = Cli::try_parse_from(["skillhub", "status"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("config/default.toml"));
        assert!(cli.backend.is_none());
    }

    #[test]
    fn get_needs_id_or_email() {
        assert!(Cli::try_parse_from(["skillhub", "user", "get"]).is_err());
        assert!(Cli::try_parse_from(["skillhub", "user", "get", "u1", "--email", "a@x.com"]).is_err());

        let cli = Cli::try_parse_from(["skillhub", "user", "get", "--email", "a@x.com"]).unwrap();
        match cli.command {
            Commands::User {
                action: UserAction::Get { id, email },
            } => {
                assert!(id.is_none());
                assert_eq!(email.as_deref(), Some("a@x.com"));
            }
            _ => panic!("expected user get"),
        }
    }

    #[test]
    fn tech_add_takes_several_names() {
        let cli = Cli::try_parse_from(["skillhub", "tech", "add", "u1", "Rust", "Go"]).unwrap();
        match cli.command {
            Commands::Tech {
                action: TechAction::Add {
                    user_id,
                    technologies,
                },
            } => {
                assert_eq!(user_id, "u1");
                assert_eq!(technologies, vec!["Rust".to_string(), "Go".to_string()]);
            }
            _ => panic!("expected tech add"),
        }
        assert!(Cli::try_parse_from(["skillhub", "tech", "add", "u1"]).is_err());
    }
}
