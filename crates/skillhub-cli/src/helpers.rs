//! Shared helpers for the CLI: tracing setup, JSON output and argument
//! conversion.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use skillhub_store::{NewUser, UserPatch, UserProfile};

use crate::cli::UpdateArgs;

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Initialize the global tracing subscriber, writing to stderr so stdout
/// stays pure JSON.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Print `value` as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Argument conversion
// ---------------------------------------------------------------------------

/// Parse a `--profile` JSON object.
pub fn parse_profile(raw: Option<&str>) -> Result<UserProfile> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("--profile must be a JSON object"),
        None => Ok(UserProfile::default()),
    }
}

pub fn new_user(
    email: String,
    password: String,
    display_name: String,
    role: String,
    email_verified: bool,
    profile: Option<&str>,
) -> Result<NewUser> {
    Ok(NewUser {
        email,
        password,
        display_name,
        role,
        email_verified,
        profile: parse_profile(profile)?,
    })
}

/// Build a patch from `user update` flags.
pub fn user_patch(args: UpdateArgs) -> Result<UserPatch> {
    Ok(UserPatch {
        profile: parse_profile(args.profile.as_deref())?,
        email: args.email,
        password: args.password,
        display_name: args.display_name,
        role: args.role,
        email_verified: args.email_verified,
        last_login_at: args.touch_login.then(chrono::Utc::now),
    })
}

// ── tests ────────────────────────────────────────────────────────────
