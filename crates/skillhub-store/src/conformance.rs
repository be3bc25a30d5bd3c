//! Backend-agnostic contract checks.
//!
//! Each check drives a [`Storage`] through one property every backend must
//! hold and panics on violation, so it can be called straight from a
//! `#[tokio::test]`.  Checks use their own email addresses and never assume
//! the store starts empty, so they can share one backend.

use std::collections::BTreeSet;

use crate::error::StorageError;
use crate::model::{NewUser, UserPatch, UserProfile};
use crate::traits::Storage;

/// A minimal valid user.
pub fn sample_user(email: &str, display_name: &str) -> NewUser {
    NewUser {
        email: email.to_string(),
        password: "not-hashed-here".to_string(),
        display_name: display_name.to_string(),
        role: "student".to_string(),
        email_verified: false,
        profile: UserProfile::default(),
    }
}

fn as_set(technologies: Vec<String>) -> BTreeSet<String> {
    technologies.into_iter().collect()
}

/// Run every check against `storage`.
pub async fn run_all(storage: &dyn Storage) {
    round_trip(storage).await;
    email_is_unique(storage).await;
    lookup_by_email(storage).await;
    add_technology_is_idempotent(storage).await;
    delete_cascades(storage).await;
    not_found_contract(storage).await;
    update_merges_fields(storage).await;
    listing_assembles_technologies(storage).await;
    lifecycle_scenario(storage).await;
}

/// A created user reads back unchanged.
pub async fn round_trip(storage: &dyn Storage) {
    let mut new = sample_user("roundtrip@conformance.test", "Round Trip");
    new.profile.bio = Some("bio".into());
    new.profile.interests = Some(vec!["systems".into()]);
    new.profile.social_links = Some(serde_json::json!({ "github": "rt" }));

    let created = storage.create_user(new).await.expect("create_user");
    assert!(!created.id.is_empty());
    assert!(created.technologies.is_empty());

    let fetched = storage
        .get_user_by_id(&created.id)
        .await
        .expect("get_user_by_id")
        .expect("created user must be found");
    assert_eq!(fetched, created);
}

/// A second user with the same email is rejected with `Conflict`.
pub async fn email_is_unique(storage: &dyn Storage) {
    storage
        .create_user(sample_user("dup@conformance.test", "First"))
        .await
        .expect("first create");

    let err = storage
        .create_user(sample_user("dup@conformance.test", "Second"))
        .await
        .expect_err("duplicate email must fail");
    assert!(
        matches!(err, StorageError::Conflict(_)),
        "expected Conflict, got: {err}"
    );
}

/// Email lookup finds the user with technologies, and misses cleanly.
pub async fn lookup_by_email(storage: &dyn Storage) {
    let created = storage
        .create_user(sample_user("lookup@conformance.test", "Lookup"))
        .await
        .expect("create_user");
    storage
        .add_technology(&created.id, "TypeScript")
        .await
        .expect("add_technology");

    let found = storage
        .get_user_by_email("lookup@conformance.test")
        .await
        .expect("get_user_by_email")
        .expect("user must be found by email");
    assert_eq!(found.id, created.id);
    assert_eq!(found.technologies, vec!["TypeScript".to_string()]);

    let missing = storage
        .get_user_by_email("nobody@conformance.test")
        .await
        .expect("lookup of unknown email");
    assert!(missing.is_none());
}

/// Adding the same technology twice leaves one entry.
pub async fn add_technology_is_idempotent(storage: &dyn Storage) {
    let user = storage
        .create_user(sample_user("idempotent@conformance.test", "Idem"))
        .await
        .expect("create_user");

    storage.add_technology(&user.id, "Rust").await.expect("first add");
    storage.add_technology(&user.id, "Rust").await.expect("second add");

    let technologies = storage
        .get_user_technologies(&user.id)
        .await
        .expect("get_user_technologies");
    assert_eq!(technologies, vec!["Rust".to_string()]);
}

/// Deleting a user removes it and every technology row it had.
pub async fn delete_cascades(storage: &dyn Storage) {
    let user = storage
        .create_user(sample_user("cascade@conformance.test", "Cascade"))
        .await
        .expect("create_user");
    storage.add_technology(&user.id, "Go").await.expect("add Go");
    storage.add_technology(&user.id, "Zig").await.expect("add Zig");

    storage.delete_user(&user.id).await.expect("delete_user");

    assert!(
        storage
            .get_user_by_id(&user.id)
            .await
            .expect("get_user_by_id")
            .is_none()
    );
    assert!(
        storage
            .get_user_technologies(&user.id)
            .await
            .expect("get_user_technologies")
            .is_empty()
    );
    let dump = storage.debug_database().await.expect("debug_database");
    assert!(dump.technologies.iter().all(|row| row.user_id != user.id));
}

/// Lookups return `None`; mutations of a missing user fail with `NotFound`.
pub async fn not_found_contract(storage: &dyn Storage) {
    let missing = storage
        .get_user_by_id("nonexistent")
        .await
        .expect("lookup must not fail");
    assert!(missing.is_none());

    let err = storage
        .update_user(
            "nonexistent",
            UserPatch {
                display_name: Some("Nobody".into()),
                ..Default::default()
            },
        )
        .await
        .expect_err("update of missing user must fail");
    assert!(
        matches!(err, StorageError::NotFound { .. }),
        "expected NotFound, got: {err}"
    );

    let err = storage
        .delete_user("nonexistent")
        .await
        .expect_err("delete of missing user must fail");
    assert!(
        matches!(err, StorageError::NotFound { .. }),
        "expected NotFound, got: {err}"
    );
}

/// Patched fields change, everything else stays.
pub async fn update_merges_fields(storage: &dyn Storage) {
    let mut new = sample_user("merge@conformance.test", "Before");
    new.profile.location = Some("Lisbon".into());
    let user = storage.create_user(new).await.expect("create_user");
    storage.add_technology(&user.id, "Elixir").await.expect("add");

    let updated = storage
        .update_user(
            &user.id,
            UserPatch {
                display_name: Some("After".into()),
                email_verified: Some(true),
                ..Default::default()
            },
        )
        .await
        .expect("update_user");

    assert_eq!(updated.id, user.id);
    assert_eq!(updated.display_name, "After");
    assert!(updated.email_verified);
    assert_eq!(updated.email, "merge@conformance.test");
    assert_eq!(updated.profile.location.as_deref(), Some("Lisbon"));
    assert_eq!(updated.created_at, user.created_at);
    assert_eq!(updated.technologies, vec!["Elixir".to_string()]);

    let fetched = storage
        .get_user_by_id(&user.id)
        .await
        .expect("get_user_by_id")
        .expect("updated user must exist");
    assert_eq!(fetched, updated);
}

/// Every listed user carries its current technologies.
pub async fn listing_assembles_technologies(storage: &dyn Storage) {
    let a = storage
        .create_user(sample_user("list-a@conformance.test", "A"))
        .await
        .expect("create a");
    let b = storage
        .create_user(sample_user("list-b@conformance.test", "B"))
        .await
        .expect("create b");
    storage.add_technology(&a.id, "Kotlin").await.expect("add");
    storage.add_technology(&b.id, "Swift").await.expect("add");
    storage.add_technology(&b.id, "Kotlin").await.expect("add");

    let users = storage.get_all_users().await.expect("get_all_users");
    let listed_a = users.iter().find(|u| u.id == a.id).expect("a listed");
    let listed_b = users.iter().find(|u| u.id == b.id).expect("b listed");
    assert_eq!(listed_a.technologies, vec!["Kotlin".to_string()]);
    assert_eq!(
        as_set(listed_b.technologies.clone()),
        as_set(vec!["Swift".into(), "Kotlin".into()])
    );

    let dump = storage.debug_database().await.expect("debug_database");
    assert!(dump.users.iter().any(|u| u.id == a.id));
    assert_eq!(
        dump.technologies.iter().filter(|row| row.user_id == b.id).count(),
        2
    );
}

/// Create, add two technologies, remove one, delete.
pub async fn lifecycle_scenario(storage: &dyn Storage) {
    let user = storage
        .create_user(sample_user("a@x.com", "A"))
        .await
        .expect("create_user");
    assert!(!user.id.is_empty());
    assert!(user.technologies.is_empty());

    storage.add_technology(&user.id, "Go").await.expect("add Go");
    storage.add_technology(&user.id, "Rust").await.expect("add Rust");
    let technologies = storage
        .get_user_technologies(&user.id)
        .await
        .expect("get_user_technologies");
    assert_eq!(
        as_set(technologies),
        as_set(vec!["Go".into(), "Rust".into()])
    );

    storage
        .remove_technology(&user.id, "Go")
        .await
        .expect("remove Go");
    let technologies = storage
        .get_user_technologies(&user.id)
        .await
        .expect("get_user_technologies");
    assert_eq!(technologies, vec!["Rust".to_string()]);

    storage.delete_user(&user.id).await.expect("delete_user");
    assert!(
        storage
            .get_user_by_id(&user.id)
            .await
            .expect("get_user_by_id")
            .is_none()
    );
    assert!(
        storage
            .get_user_technologies(&user.id)
            .await
            .expect("get_user_technologies")
            .is_empty()
    );
}

/// `clear()` is refused and leaves data in place.
pub async fn clear_is_unsupported(storage: &dyn Storage) {
    let user = storage
        .create_user(sample_user("keep@conformance.test", "Keep"))
        .await
        .expect("create_user");

    let err = storage.clear().await.expect_err("clear must be refused");
    assert!(
        matches!(err, StorageError::Unsupported { .. }),
        "expected Unsupported, got: {err}"
    );

    assert!(
        storage
            .get_user_by_id(&user.id)
            .await
            .expect("get_user_by_id")
            .is_some()
    );
}
