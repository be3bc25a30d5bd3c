//! CLI entry point for SkillHub.
//!
//! This binary provides the `skillhub` command for inspecting and editing
//! stored users through the configured storage backend.

mod cli;
mod helpers;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tracing::{debug, info};

use skillhub_adapters::{BackendKind, Storage, StorageConfig, StorageSelector};

use crate::cli::{Cli, Commands, TechAction, UserAction};
use crate::helpers::{init_tracing, new_user, print_json, user_patch};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    let mut config = StorageConfig::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(tag) = &cli.backend {
        config.backend = BackendKind::from_tag(tag);
    }
    debug!(backend = %config.backend, "configuration loaded");

    let selector = StorageSelector::new(config);
    let storage = selector
        .initialize_configured()
        .await
        .context("failed to initialize storage")?;

    match cli.command {
        Commands::Status => cmd_status(&selector, storage).await,
        Commands::User { action } => cmd_user(action, storage).await,
        Commands::Tech { action } => cmd_tech(action, storage).await,
        Commands::Dump => print_json(&storage.debug_database().await?),
        Commands::Clear { yes } => cmd_clear(yes, storage).await,
    }
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

async fn cmd_status(selector: &StorageSelector, storage: Arc<dyn Storage>) -> Result<()> {
    let users = storage.get_all_users().await?;
    print_json(&json!({
        "requested": selector.config().backend,
        "active": selector.active_backend(),
        "fallback": selector.active_backend() != selector.config().backend,
        "users": users.len(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// Subcommand: user
// ---------------------------------------------------------------------------

async fn cmd_user(action: UserAction, storage: Arc<dyn Storage>) -> Result<()> {
    match action {
        UserAction::Create {
            email,
            password,
            display_name,
            role,
            email_verified,
            profile,
        } => {
            let new = new_user(
                email,
                password,
                display_name,
                role,
                email_verified,
                profile.as_deref(),
            )?;
            let user = storage.create_user(new).await?;
            info!(user_id = %user.id, "user created");
            print_json(&user)
        }
        UserAction::Get { id, email } => {
            let user = match (id, email) {
                (Some(id), _) => storage.get_user_by_id(&id).await?,
                (None, Some(email)) => storage.get_user_by_email(&email).await?,
                (None, None) => bail!("either an id or --email is required"),
            };
            match user {
                Some(user) => print_json(&user),
                None => bail!("user not found"),
            }
        }
        UserAction::List => print_json(&storage.get_all_users().await?),
        UserAction::Update(args) => {
            let id = args.id.clone();
            let patch = user_patch(args)?;
            if patch.is_empty() {
                bail!("nothing to update; pass at least one field flag");
            }
            print_json(&storage.update_user(&id, patch).await?)
        }
        UserAction::Delete { id } => {
            storage.delete_user(&id).await?;
            print_json(&json!({ "deleted": id }))
        }
    }
}

// ---------------------------------------------------------------------------
// Subcommand: tech
// ---------------------------------------------------------------------------

async fn cmd_tech(action: TechAction, storage: Arc<dyn Storage>) -> Result<()> {
    let user_id = match &action {
        TechAction::Add { user_id, .. }
        | TechAction::Remove { user_id, .. }
        | TechAction::List { user_id } => user_id.clone(),
    };

    match action {
        TechAction::Add { technologies, .. } => {
            for technology in &technologies {
                storage.add_technology(&user_id, technology).await?;
            }
        }
        TechAction::Remove { technology, .. } => {
            storage.remove_technology(&user_id, &technology).await?;
        }
        TechAction::List { .. } => {}
    }

    let technologies = storage.get_user_technologies(&user_id).await?;
    print_json(&json!({ "userId": user_id, "technologies": technologies }))
}

// ---------------------------------------------------------------------------
// Subcommand: clear
// ---------------------------------------------------------------------------

async fn cmd_clear(yes: bool, storage: Arc<dyn Storage>) -> Result<()> {
    if !yes {
        bail!("refusing to delete every record without --yes");
    }
    storage.clear().await?;
    info!(backend = %storage.backend(), "storage cleared");
    print_json(&json!({ "cleared": storage.backend() }))
}
