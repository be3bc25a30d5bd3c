//! Document database backend (MongoDB).
//!
//! Users live in a single `users` collection.  The document `_id` is an
//! `ObjectId` whose hex form is the user id, and technologies are an array
//! field on the user document, so adding and removing one is a single
//! `$addToSet` / `$pull` update and deleting the user drops them with it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, Document, doc, oid::ObjectId};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{
    ClientOptions, FindOneAndUpdateOptions, ReturnDocument, ServerApi, ServerApiVersion,
};
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use skillhub_store::{
    BackendKind, DebugDump, NewUser, Storage, StorageError, StorageResult, User, UserPatch,
    UserProfile,
};

/// Default connection string.
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
/// Default database name.
pub const DEFAULT_DATABASE: &str = "skillhub";

const USERS_COLLECTION: &str = "users";
/// Server code for a unique index violation.
const DUPLICATE_KEY: i32 = 11000;

/// Connection settings for [`DocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentStoreConfig {
    pub uri: String,
    pub database: String,
}

impl Default for DocumentStoreConfig {
    fn default() -> Self {
        Self {
            uri: DEFAULT_MONGODB_URI.to_string(),
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

/// The persisted shape of a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserDocument {
    #[serde(rename = "_id")]
    id: ObjectId,
    email: String,
    password: String,
    display_name: String,
    role: String,
    #[serde(default)]
    email_verified: bool,
    #[serde(flatten)]
    profile: UserProfile,
    #[serde(default)]
    technologies: Vec<String>,
    created_at: DateTime<Utc>,
    last_login_at: DateTime<Utc>,
}

impl UserDocument {
    fn from_new(new: NewUser, now: DateTime<Utc>) -> Self {
        Self {
            id: ObjectId::new(),
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

    fn into_user(self) -> User {
        User {
            id: self.id.to_hex(),
            email: self.email,
            password: self.password,
            display_name: self.display_name,
            role: self.role,
            email_verified: self.email_verified,
            profile: self.profile,
            technologies: self.technologies,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}

/// Build the `$set` body for a patch: exactly the fields that are present.
fn set_document(patch: &UserPatch) -> StorageResult<Document> {
    bson::to_document(patch)
        .map_err(|e| StorageError::Unknown(format!("failed to encode user patch: {e}")))
}

/// Filter matching another user that already holds `email`.
fn email_filter(email: &str, except: Option<ObjectId>) -> Document {
    match except {
        Some(id) => doc! { "email": email, "_id": { "$ne": id } },
        None => doc! { "email": email },
    }
}

/// Array update on the `technologies` field; `operator` is `$addToSet` or
/// `$pull`.
fn technologies_update(operator: &str, technology: &str) -> Document {
    doc! { operator: { "technologies": technology } }
}

/// Parse a user id.  Ids that are not valid `ObjectId`s name no user.
fn object_id(id: &str) -> Option<ObjectId> {
    ObjectId::parse_str(id).ok()
}

/// Translate a driver error into the storage taxonomy.
fn translate(err: MongoError) -> StorageError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            StorageError::Conflict(write.message.clone())
        }
        ErrorKind::Command(command) if command.code == DUPLICATE_KEY => {
            StorageError::Conflict(command.message.clone())
        }
        ErrorKind::ServerSelection { .. }
        | ErrorKind::Io(_)
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::ConnectionPoolCleared { .. } => StorageError::Connectivity(err.to_string()),
        _ => StorageError::Unknown(err.to_string()),
    }
}

/// A [`Storage`] backed by a MongoDB collection.
pub struct DocumentStore {
    users: Collection<UserDocument>,
}

impl DocumentStore {
    /// Build a client for `config`.  The driver connects lazily, so an
    /// unreachable server only surfaces on the first operation.
    pub async fn connect(config: &DocumentStoreConfig) -> StorageResult<Self> {
        let mut options = ClientOptions::parse(&config.uri).await.map_err(|e| {
            StorageError::Connectivity(format!("invalid MongoDB connection string: {e}"))
        })?;
        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        options.app_name = Some("skillhub".to_string());

        let client = Client::with_options(options).map_err(translate)?;
        let users = client
            .database(&config.database)
            .collection::<UserDocument>(USERS_COLLECTION);
        debug!(database = %config.database, "document store client ready");
        Ok(Self { users })
    }

    async fn find_document(&self, filter: Document) -> StorageResult<Option<UserDocument>> {
        self.users.find_one(filter, None).await.map_err(translate)
    }

    /// Fail with `Conflict` when `email` belongs to a user other than
    /// `except`.
    async fn ensure_email_free(&self, email: &str, except: Option<ObjectId>) -> StorageResult<()> {
        if self.find_document(email_filter(email, except)).await?.is_some() {
            return Err(StorageError::Conflict(format!(
                "email already registered: {email}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Storage for DocumentStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Document
    }

    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            backend: "document",
            operation: "clear",
        })
    }

    #[instrument(skip(self, user), fields(email = %user.email))]
    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        self.ensure_email_free(&user.email, None).await?;

        let document = UserDocument::from_new(user, Utc::now());
        self.users
            .insert_one(&document, None)
            .await
            .map_err(translate)?;

        info!(user_id = %document.id, "user created");
        Ok(document.into_user())
    }

    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        let Some(oid) = object_id(id) else {
            return Ok(None);
        };
        Ok(self
            .find_document(doc! { "_id": oid })
            .await?
            .map(UserDocument::into_user))
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        Ok(self
            .find_document(doc! { "email": email })
            .await?
            .map(UserDocument::into_user))
    }

    #[instrument(skip(self, patch))]
    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User> {
        let oid = object_id(id).ok_or_else(|| StorageError::user_not_found(id))?;

        if let Some(email) = &patch.email {
            self.ensure_email_free(email, Some(oid)).await?;
        }

        let set = set_document(&patch)?;
        if set.is_empty() {
            return self
                .get_user_by_id(id)
                .await?
                .ok_or_else(|| StorageError::user_not_found(id));
        }

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .users
            .find_one_and_update(doc! { "_id": oid }, doc! { "$set": set }, options)
            .await
            .map_err(translate)?
            .ok_or_else(|| StorageError::user_not_found(id))?;

        info!("user updated");
        Ok(updated.into_user())
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> StorageResult<()> {
        let oid = object_id(id).ok_or_else(|| StorageError::user_not_found(id))?;
        let result = self
            .users
            .delete_one(doc! { "_id": oid }, None)
            .await
            .map_err(translate)?;
        if result.deleted_count == 0 {
            return Err(StorageError::user_not_found(id));
        }
        info!("user deleted");
        Ok(())
    }

    async fn add_technology(&self, user_id: &str, technology: &str) -> StorageResult<()> {
        let oid = object_id(user_id).ok_or_else(|| StorageError::user_not_found(user_id))?;
        let result = self
            .users
            .update_one(
                doc! { "_id": oid },
                technologies_update("$addToSet", technology),
                None,
            )
            .await
            .map_err(translate)?;
        if result.matched_count == 0 {
            return Err(StorageError::user_not_found(user_id));
        }
        debug!(user_id, technology, "technology added");
        Ok(())
    }

    async fn remove_technology(&self, user_id: &str, technology: &str) -> StorageResult<()> {
        let Some(oid) = object_id(user_id) else {
            return Ok(());
        };
        self.users
            .update_one(
                doc! { "_id": oid },
                technologies_update("$pull", technology),
                None,
            )
            .await
            .map_err(translate)?;
        debug!(user_id, technology, "technology removed");
        Ok(())
    }

    async fn get_user_technologies(&self, user_id: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .get_user_by_id(user_id)
            .await?
            .map(|user| user.technologies)
            .unwrap_or_default())
    }

    async fn get_all_users(&self) -> StorageResult<Vec<User>> {
        let cursor = self.users.find(None, None).await.map_err(translate)?;
        let documents: Vec<UserDocument> = cursor.try_collect().await.map_err(translate)?;
        Ok(documents.into_iter().map(UserDocument::into_user).collect())
    }

    async fn debug_database(&self) -> StorageResult<DebugDump> {
        Ok(DebugDump::from_users(self.get_all_users().await?))
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use mongodb::error::{CommandError, WriteError};

    use super::*;

    fn sample_new() -> NewUser {
        NewUser {
            email: "doc@x.com".into(),
            password: "pw".into(),
            display_name: "Doc".into(),
            role: "mentor".into(),
            email_verified: true,
            profile: UserProfile {
                bio: Some("hello".into()),
                ..Default::default()
            },
        }
    }

    /// A client pointed at a port nothing listens on.  Building it makes no
    /// network calls.
    async fn offline_store() -> DocumentStore {
        DocumentStore::connect(&DocumentStoreConfig {
            uri: "mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=200".into(),
            database: "skillhub_offline".into(),
        })
        .await
        .unwrap()
    }

    #[test]
    fn document_maps_to_user_with_hex_id() {
        let document = UserDocument::from_new(sample_new(), Utc::now());
        let hex = document.id.to_hex();

        let user = document.into_user();
        assert_eq!(user.id, hex);
        assert_eq!(user.role, "mentor");
        assert_eq!(user.profile.bio.as_deref(), Some("hello"));
        assert!(user.technologies.is_empty());
        assert_eq!(user.created_at, user.last_login_at);
    }

    #[test]
    fn persisted_shape_is_camel_case_with_object_id() {
        let document = UserDocument::from_new(sample_new(), Utc::now());
        let encoded = bson::to_document(&document).unwrap();

        assert!(encoded.get_object_id("_id").is_ok());
        assert_eq!(encoded.get_str("displayName").unwrap(), "Doc");
        assert_eq!(encoded.get_str("bio").unwrap(), "hello");
        assert!(encoded.get_array("technologies").unwrap().is_empty());
        assert!(!encoded.contains_key("photoURL"));
    }

    #[test]
    fn persisted_shape_decodes_back() {
        let document = UserDocument::from_new(sample_new(), Utc::now());
        let encoded = bson::to_document(&document).unwrap();
        let decoded: UserDocument = bson::from_document(encoded).unwrap();
        assert_eq!(decoded, document);
    }

    #[test]
    fn set_document_holds_only_present_fields() {
        let patch = UserPatch {
            display_name: Some("New".into()),
            email_verified: Some(false),
            ..Default::default()
        };
        let set = set_document(&patch).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_str("displayName").unwrap(), "New");
        assert!(!set.get_bool("emailVerified").unwrap());

        assert!(set_document(&UserPatch::default()).unwrap().is_empty());
    }

    #[test]
    fn malformed_ids_name_no_user() {
        assert!(object_id("nonexistent").is_none());
        assert!(object_id(&ObjectId::new().to_hex()).is_some());
    }

    #[test]
    fn email_filter_skips_the_user_being_updated() {
        assert_eq!(email_filter("a@x.com", None), doc! { "email": "a@x.com" });

        let oid = ObjectId::new();
        assert_eq!(
            email_filter("a@x.com", Some(oid)),
            doc! { "email": "a@x.com", "_id": { "$ne": oid } }
        );
    }

    #[test]
    fn technology_updates_target_the_array() {
        assert_eq!(
            technologies_update("$addToSet", "Rust"),
            doc! { "$addToSet": { "technologies": "Rust" } }
        );
        assert_eq!(
            technologies_update("$pull", "C#"),
            doc! { "$pull": { "technologies": "C#" } }
        );
    }

    #[test]
    fn duplicate_key_write_is_conflict() {
        let write: WriteError = bson::from_document(doc! {
            "code": DUPLICATE_KEY,
            "errmsg": "E11000 duplicate key error collection: skillhub.users",
        })
        .unwrap();
        let err = translate(MongoError::from(ErrorKind::Write(WriteFailure::WriteError(write))));
        assert!(
            matches!(&err, StorageError::Conflict(m) if m.starts_with("E11000")),
            "got: {err}"
        );
    }

    #[test]
    fn duplicate_key_command_is_conflict() {
        let command: CommandError = bson::from_document(doc! {
            "code": DUPLICATE_KEY,
            "codeName": "DuplicateKey",
            "errmsg": "E11000 duplicate key",
        })
        .unwrap();
        let err = translate(MongoError::from(ErrorKind::Command(command)));
        assert!(matches!(err, StorageError::Conflict(_)), "got: {err}");
    }

    #[test]
    fn other_driver_errors_are_classified() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = translate(MongoError::from(io));
        assert!(err.is_connectivity(), "got: {err}");

        let write: WriteError = bson::from_document(doc! {
            "code": 121,
            "errmsg": "Document failed validation",
        })
        .unwrap();
        let err = translate(MongoError::from(ErrorKind::Write(WriteFailure::WriteError(write))));
        assert!(
            matches!(&err, StorageError::Unknown(m) if m.contains("Document failed validation")),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn invalid_connection_string_is_connectivity() {
        let err = DocumentStore::connect(&DocumentStoreConfig {
            uri: "postgres://nope".into(),
            database: "x".into(),
        })
        .await
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Connectivity(_)), "got: {err}");
    }

    #[tokio::test]
    async fn clear_is_refused_without_a_server() {
        let store = offline_store().await;
        let err = store.clear().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Unsupported {
                backend: "document",
                operation: "clear"
            }
        ));
    }

    #[tokio::test]
    async fn malformed_id_lookup_skips_the_server() {
        let store = offline_store().await;
        assert!(store.get_user_by_id("nonexistent").await.unwrap().is_none());
        assert!(store.get_user_technologies("nonexistent").await.unwrap().is_empty());
        store.remove_technology("nonexistent", "Rust").await.unwrap();

        let err = store.delete_user("nonexistent").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unreachable_server_is_connectivity() {
        let store = offline_store().await;
        let err = store.get_all_users().await.unwrap_err();
        assert!(err.is_connectivity(), "got: {err}");
    }
}
