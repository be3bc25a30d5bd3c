//! User records as seen by every storage backend.
//!
//! The serialized form is camelCase JSON, which is what the REST API speaks
//! and what the document store persists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// A stored user account, with its technologies assembled from the
/// user ↔ technology relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Backend-assigned identifier.
    pub id: String,
    /// Unique login email.
    pub email: String,
    /// Opaque credential; hashing is the caller's business.
    pub password: String,
    pub display_name: String,
    /// Opaque role tag.
    pub role: String,
    #[serde(default)]
    pub email_verified: bool,
    /// Pass-through profile payload.
    #[serde(flatten)]
    pub profile: UserProfile,
    /// Set of technologies; order carries no meaning.
    #[serde(default)]
    pub technologies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// Optional profile fields.  Nothing in the storage layer interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "photoURL", default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experience_level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interests: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_experience: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub education: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub social_links: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentor_info: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_info: Option<Value>,
}

/// Input to `create_user`: a user without identity, timestamps or
/// technologies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: String,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(flatten)]
    pub profile: UserProfile,
}

/// A partial update.  `None` leaves the stored value untouched.
///
/// Serializes to exactly the fields that are present, so it can be sent
/// as-is as a REST body or a `$set` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub profile: UserProfile,
}

/// One row of the user ↔ technology relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TechnologyRow {
    pub user_id: String,
    pub technology: String,
}

/// Full diagnostic dump returned by `debug_database`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugDump {
    pub users: Vec<User>,
    pub technologies: Vec<TechnologyRow>,
}

// ═══════════════════════════════════════════════════════════════════════
//  Behaviour
// ═══════════════════════════════════════════════════════════════════════

impl User {
    /// Build a freshly created record: both timestamps set to `now`, no
    /// technologies yet.
    pub fn from_new(id: String, new: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id,
            email: new.email,
            password: new.password,
            display_name: new.display_name,
            role: new.role,
            email_verified: new.email_verified,
            profile: new.profile,
            technologies: Vec::new(),
            created_at: now,
            last_login_at: now,
        }
    }

    /// Merge `patch` into this record.  `id`, `created_at` and
    /// `technologies` are never touched.
    pub fn apply(&mut self, patch: UserPatch) {
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(password) = patch.password {
            self.password = password;
        }
        if let Some(display_name) = patch.display_name {
            self.display_name = display_name;
        }
        if let Some(role) = patch.role {
            self.role = role;
        }
        if let Some(verified) = patch.email_verified {
            self.email_verified = verified;
        }
        if let Some(at) = patch.last_login_at {
            self.last_login_at = at;
        }
        self.profile.merge(patch.profile);
    }

    /// Relation rows for this user's technologies.
    pub fn technology_rows(&self) -> impl Iterator<Item = TechnologyRow> + '_ {
        self.technologies.iter().map(|t| TechnologyRow {
            user_id: self.id.clone(),
            technology: t.clone(),
        })
    }
}

impl UserProfile {
    /// Overwrite every field that is present in `other`.
    pub fn merge(&mut self, other: UserProfile) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.photo_url, other.photo_url);
        take(&mut self.experience_level, other.experience_level);
        take(&mut self.interests, other.interests);
        take(&mut self.bio, other.bio);
        take(&mut self.location, other.location);
        take(&mut self.work_experience, other.work_experience);
        take(&mut self.education, other.education);
        take(&mut self.social_links, other.social_links);
        take(&mut self.stats, other.stats);
        take(&mut self.mentor_info, other.mentor_info);
        take(&mut self.student_info, other.student_info);
    }
}

impl UserPatch {
    /// Whether applying this patch would change nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl DebugDump {
    /// Build a dump from fully assembled users.
    pub fn from_users(users: Vec<User>) -> Self {
        let technologies = users.iter().flat_map(User::technology_rows).collect();
        Self {
            users,
            technologies,
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
