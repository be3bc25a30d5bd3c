//! REST API backend.
//!
//! Every [`Storage`] operation maps onto one HTTP call against a remote
//! service rooted at a configurable base URL:
//!
//! | Operation              | Request                                   |
//! |------------------------|-------------------------------------------|
//! | `create_user`          | `POST   /users`                           |
//! | `get_user_by_id`       | `GET    /users/{id}`                      |
//! | `get_user_by_email`    | `POST   /login` with `{"email": ...}`     |
//! | `update_user`          | `PUT    /users/{id}`                      |
//! | `delete_user`          | `DELETE /users/{id}`                      |
//! | `get_all_users`        | `GET    /users`                           |
//! | `add_technology`       | `POST   /users/{id}/technologies`         |
//! | `remove_technology`    | `DELETE /users/{id}/technologies/{tech}`  |
//! | `get_user_technologies`| `GET    /users/{id}/technologies`         |
//!
//! Path segments are percent-encoded.  An id or technology that is empty,
//! `.` or `..` names nothing and never reaches the server.  User reads are composed with a
//! technologies fetch, so a listing costs one request per user.

use async_trait::async_trait;
use futures::future::try_join_all;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use skillhub_store::{
    BackendKind, DebugDump, NewUser, Storage, StorageError, StorageResult, User, UserPatch,
};

/// Default root of the remote API.
pub const DEFAULT_API_URL: &str = "http://localhost:3000/api";

/// Connection settings for [`ApiStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiStoreConfig {
    /// Root URL every endpoint path is appended to.
    pub base_url: String,
}

impl Default for ApiStoreConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// Entries of a technologies listing.  Servers answer either with bare
/// names or with relation rows.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TechnologyEntry {
    Name(String),
    Row { technology: String },
}

impl TechnologyEntry {
    fn into_name(self) -> String {
        match self {
            Self::Name(name) | Self::Row { technology: name } => name,
        }
    }
}

/// A [`Storage`] that forwards every operation to a REST service.
pub struct ApiStore {
    base_url: Url,
    client: Client,
}

impl ApiStore {
    /// Build a store for `config.base_url`.  No request is made until
    /// [`Storage::initialize`] or the first operation.
    pub fn new(config: &ApiStoreConfig) -> StorageResult<Self> {
        let raw = config.base_url.trim_end_matches('/');
        let base_url = Url::parse(raw).map_err(|e| {
            StorageError::Connectivity(format!("invalid API base URL `{raw}`: {e}"))
        })?;
        if base_url.cannot_be_a_base() {
            return Err(StorageError::Connectivity(format!(
                "API base URL `{raw}` cannot carry a path"
            )));
        }

        let client = Client::builder()
            .user_agent(concat!("skillhub/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StorageError::Unknown(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { base_url, client })
    }

    /// The root URL requests are made against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // URL construction
    // -----------------------------------------------------------------------

    /// Append `segments` to the base URL, percent-encoding each one.
    ///
    /// Only for fixed segments: `.` and `..` are dropped by URL
    /// normalization, so caller-supplied values go through
    /// [`resource`](Self::resource).
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Like [`endpoint`](Self::endpoint), but `None` when a segment cannot
    /// name a resource (empty, `.` or `..`).
    fn resource(&self, segments: &[&str]) -> Option<Url> {
        if segments.iter().any(|s| !is_addressable(s)) {
            debug!(?segments, "segment cannot be addressed, skipping request");
            return None;
        }
        Some(self.endpoint(segments))
    }

    // -----------------------------------------------------------------------
    // HTTP helpers
    // -----------------------------------------------------------------------

    /// Send a request and return the status with the raw body.  Transport
    /// failures are connectivity errors.
    async fn send(&self, request: RequestBuilder) -> StorageResult<(StatusCode, String)> {
        let response = request.send().await.map_err(|e| {
            StorageError::Connectivity(format!("API request failed: {e}"))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            StorageError::Connectivity(format!("failed to read API response body: {e}"))
        })?;
        debug!(status = status.as_u16(), "API response");
        Ok((status, body))
    }

    /// Send a request that must succeed, translating any other status.
    async fn send_ok(&self, request: RequestBuilder, target: Target<'_>) -> StorageResult<String> {
        let (status, body) = self.send(request).await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(status_error(status, &body, target))
        }
    }

    /// Fetch technologies for one user; an unknown user has none.
    async fn fetch_technologies(&self, user_id: &str) -> StorageResult<Vec<String>> {
        let Some(url) = self.resource(&["users", user_id, "technologies"]) else {
            return Ok(Vec::new());
        };
        let (status, body) = self.send(self.client.get(url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            return Err(status_error(status, &body, Target::User(user_id)));
        }
        let entries: Vec<TechnologyEntry> = decode(&body)?;
        Ok(entries.into_iter().map(TechnologyEntry::into_name).collect())
    }

    /// Replace the technologies on a user read from the server with the
    /// relation's current contents.
    async fn with_technologies(&self, mut user: User) -> StorageResult<User> {
        user.technologies = self.fetch_technologies(&user.id).await?;
        Ok(user)
    }
}

/// Whether `segment` survives URL normalization as its own path segment.
fn is_addressable(segment: &str) -> bool {
    !matches!(segment, "" | "." | "..")
}

/// What a request addressed, for reporting a 404.
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    /// A single user, by id.
    User(&'a str),
    /// A collection route such as `/users`.
    Collection,
}

/// Parse a JSON body.
fn decode<T: DeserializeOwned>(body: &str) -> StorageResult<T> {
    serde_json::from_str(body)
        .map_err(|e| StorageError::Unknown(format!("failed to parse API response as JSON: {e}")))
}

/// Pull a human-readable message out of an error body: the JSON `message`
/// or `error` field, else the raw text.
fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|value| {
        value
            .get("message")
            .or_else(|| value.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
    });
    match from_json {
        Some(message) => message,
        None if body.trim().is_empty() => status.to_string(),
        None => body.trim().to_string(),
    }
}

/// Map a non-success status onto the error taxonomy, keeping the server's
/// message.
fn status_error(status: StatusCode, body: &str, target: Target<'_>) -> StorageError {
    let message = error_message(status, body);
    match (status, target) {
        (StatusCode::NOT_FOUND, Target::User(id)) => StorageError::NotFound {
            entity: "user",
            id: format!("{id} ({message})"),
        },
        (StatusCode::CONFLICT, _) => StorageError::Conflict(message),
        _ => StorageError::Unknown(format!("API returned {}: {message}", status.as_u16())),
    }
}

#[async_trait]
impl Storage for ApiStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Api
    }

    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn initialize(&self) -> StorageResult<()> {
        let url = self.endpoint(&["users"]);
        let (status, _) = self.send(self.client.get(url)).await?;
        if !status.is_success() {
            return Err(StorageError::Connectivity(format!(
                "API health check answered {}",
                status.as_u16()
            )));
        }
        info!("API backend reachable");
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        Err(StorageError::Unsupported {
            backend: "api",
            operation: "clear",
        })
    }

    #[instrument(skip(self, user), fields(email = %user.email))]
    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        let url = self.endpoint(&["users"]);
        let body = self
            .send_ok(self.client.post(url).json(&user), Target::Collection)
            .await?;
        let mut created: User = decode(&body)?;
        created.technologies.clear();
        info!(user_id = %created.id, "user created");
        Ok(created)
    }

    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        let Some(url) = self.resource(&["users", id]) else {
            return Ok(None);
        };
        let (status, body) = self.send(self.client.get(url)).await?;
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, &body, Target::User(id)));
        }
        let user = decode(&body)?;
        self.with_technologies(user).await.map(Some)
    }

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let url = self.endpoint(&["login"]);
        let (status, body) = self
            .send(self.client.post(url).json(&json!({ "email": email })))
            .await?;
        if !status.is_success() {
            if status != StatusCode::NOT_FOUND {
                warn!(
                    status = status.as_u16(),
                    message = %error_message(status, &body),
                    "login lookup failed, treating as not found"
                );
            }
            return Ok(None);
        }
        let user = decode(&body)?;
        self.with_technologies(user).await.map(Some)
    }

    #[instrument(skip(self, patch))]
    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User> {
        let url = self
            .resource(&["users", id])
            .ok_or_else(|| StorageError::user_not_found(id))?;
        let body = self
            .send_ok(self.client.put(url).json(&patch), Target::User(id))
            .await?;
        let user = decode(&body)?;
        let user = self.with_technologies(user).await?;
        info!("user updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> StorageResult<()> {
        let url = self
            .resource(&["users", id])
            .ok_or_else(|| StorageError::user_not_found(id))?;
        self.send_ok(self.client.delete(url), Target::User(id)).await?;
        info!("user deleted");
        Ok(())
    }

    async fn add_technology(&self, user_id: &str, technology: &str) -> StorageResult<()> {
        let url = self
            .resource(&["users", user_id, "technologies"])
            .ok_or_else(|| StorageError::user_not_found(user_id))?;
        let request = self
            .client
            .post(url)
            .json(&json!({ "technology": technology }));
        let (status, body) = self.send(request).await?;
        if status.is_success() || status == StatusCode::CONFLICT {
            debug!(user_id, technology, "technology added");
            return Ok(());
        }
        Err(status_error(status, &body, Target::User(user_id)))
    }

    async fn remove_technology(&self, user_id: &str, technology: &str) -> StorageResult<()> {
        let Some(url) = self.resource(&["users", user_id, "technologies", technology]) else {
            return Ok(());
        };
        let (status, body) = self.send(self.client.delete(url)).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            debug!(user_id, technology, "technology removed");
            return Ok(());
        }
        Err(status_error(status, &body, Target::User(user_id)))
    }

    async fn get_user_technologies(&self, user_id: &str) -> StorageResult<Vec<String>> {
        self.fetch_technologies(user_id).await
    }

    async fn get_all_users(&self) -> StorageResult<Vec<User>> {
        let url = self.endpoint(&["users"]);
        let body = self
            .send_ok(self.client.get(url), Target::Collection)
            .await?;
        let users: Vec<User> = decode(&body)?;
        try_join_all(users.into_iter().map(|user| self.with_technologies(user))).await
    }

    async fn debug_database(&self) -> StorageResult<DebugDump> {
        Ok(DebugDump::from_users(self.get_all_users().await?))
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store(base_url: &str) -> ApiStore {
        ApiStore::new(&ApiStoreConfig {
            base_url: base_url.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn endpoint_appends_to_base_path() {
        let api = store("http://localhost:3000/api/");
        assert_eq!(
            api.endpoint(&["users", "42", "technologies"]).as_str(),
            "http://localhost:3000/api/users/42/technologies"
        );
    }

    #[test]
    fn endpoint_on_bare_host() {
        let api = store("http://localhost:3000");
        assert_eq!(api.endpoint(&["login"]).as_str(), "http://localhost:3000/login");
    }

    #[test]
    fn endpoint_encodes_segments() {
        let api = store("http://localhost:3000/api");
        let url = api.endpoint(&["users", "u1", "technologies", "C# / .NET"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:3000/api/users/u1/technologies/C%23%20%2F%20.NET"
        );
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        let err = ApiStore::new(&ApiStoreConfig {
            base_url: "not a url".into(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Connectivity(_)), "got: {err}");

        let err = ApiStore::new(&ApiStoreConfig {
            base_url: "mailto:ops@example.com".into(),
        })
        .err()
        .unwrap();
        assert!(matches!(err, StorageError::Connectivity(_)), "got: {err}");
    }

    #[test]
    fn resource_refuses_dot_segments() {
        let api = store("http://localhost:3000/api");
        for id in [".", "..", ""] {
            assert!(api.resource(&["users", id]).is_none(), "id {id:?}");
            assert!(api.resource(&["users", "u1", "technologies", id]).is_none());
        }
        assert_eq!(
            api.resource(&["users", ".hidden", "technologies", "..."]).unwrap().as_str(),
            "http://localhost:3000/api/users/.hidden/technologies/..."
        );
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "", Target::User("u1")),
            StorageError::NotFound { entity: "user", .. }
        ));
        assert!(matches!(
            status_error(StatusCode::CONFLICT, r#"{"message":"taken"}"#, Target::User("u1")),
            StorageError::Conflict(m) if m == "taken"
        ));
        assert!(matches!(
            status_error(StatusCode::INTERNAL_SERVER_ERROR, "boom", Target::Collection),
            StorageError::Unknown(m) if m.contains("500") && m.contains("boom")
        ));
    }

    #[test]
    fn not_found_keeps_the_server_message() {
        let err = status_error(
            StatusCode::NOT_FOUND,
            r#"{"message":"account suspended"}"#,
            Target::User("u1"),
        );
        match err {
            StorageError::NotFound { id, .. } => {
                assert!(id.starts_with("u1"), "id: {id}");
                assert!(id.contains("account suspended"), "id: {id}");
            }
            other => panic!("expected NotFound, got {other}"),
        }

        // A missing collection route names no user.
        let err = status_error(StatusCode::NOT_FOUND, "no such route", Target::Collection);
        assert!(
            matches!(&err, StorageError::Unknown(m) if m.contains("404") && m.contains("no such route")),
            "got: {err}"
        );
    }

    #[test]
    fn error_message_prefers_json_fields() {
        let status = StatusCode::BAD_REQUEST;
        assert_eq!(error_message(status, r#"{"message":"bad email"}"#), "bad email");
        assert_eq!(error_message(status, r#"{"error":"nope"}"#), "nope");
        assert_eq!(error_message(status, "plain text"), "plain text");
        assert_eq!(error_message(status, ""), "400 Bad Request");
    }

    #[test]
    fn technology_listing_accepts_names_and_rows() {
        let entries: Vec<TechnologyEntry> =
            serde_json::from_str(r#"["Rust", {"userId": "u1", "technology": "Go"}]"#).unwrap();
        let names: Vec<String> = entries.into_iter().map(TechnologyEntry::into_name).collect();
        assert_eq!(names, vec!["Rust".to_string(), "Go".to_string()]);
    }

    #[tokio::test]
    async fn clear_is_refused_without_a_request() {
        let api = store("http://127.0.0.1:9");
        let err = api.clear().await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::Unsupported {
                backend: "api",
                operation: "clear"
            }
        ));
    }
}
