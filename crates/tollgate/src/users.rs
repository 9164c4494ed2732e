//! In-memory user records and their JSON handlers.
//!
//! | Method | Path | Body | Success |
//! |--------|------|------|---------|
//! | GET | `/users` | - | `200` with every user, ordered by id |
//! | POST | `/create` | `{first_name, last_name, email}` | `201` with the new user |
//! | PUT | `/update` | `{id, first_name?, last_name?, email?}` | `200` with the updated user |
//! | DELETE | `/delete?id=N` | - | `200` with the removed user |
//!
//! Emails are unique. Unknown ids give `404`, duplicate emails `409`,
//! malformed bodies `400`.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::BodyExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tollgate_middleware::{Request, Response};
use tollgate_server::handler::{json, json_error};

use crate::app::query_param;

/// A stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned identifier.
    pub id: u64,
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Email address, unique across users.
    pub email: String,
}

/// Body of `POST /create`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewUser {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Email address.
    pub email: String,
}

/// Body of `PUT /update`. Absent fields are left unchanged.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserUpdate {
    /// User to update.
    pub id: u64,
    /// New given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// New family name.
    #[serde(default)]
    pub last_name: Option<String>,
    /// New email address.
    #[serde(default)]
    pub email: Option<String>,
}

/// User store errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UserError {
    /// No user has this id.
    #[error("user {0} not found")]
    NotFound(u64),

    /// Another user already has this email.
    #[error("email {0} is already registered")]
    DuplicateEmail(String),

    /// A field is empty or malformed.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl UserError {
    /// HTTP status for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateEmail(_) => StatusCode::CONFLICT,
            Self::Invalid { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "USER_NOT_FOUND",
            Self::DuplicateEmail(_) => "DUPLICATE_EMAIL",
            Self::Invalid { .. } => "INVALID_FIELD",
        }
    }

    fn into_response(self) -> Response {
        json_error(self.status(), self.code(), &self.to_string())
    }
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    users: BTreeMap<u64, User>,
}

impl Inner {
    fn email_taken(&self, email: &str, except: Option<u64>) -> bool {
        self.users
            .values()
            .any(|user| Some(user.id) != except && user.email.eq_ignore_ascii_case(email))
    }
}

/// Thread-safe in-memory user store.
///
/// # Example
///
/// ```
/// use tollgate::users::{NewUser, UserStore};
///
/// let store = UserStore::new();
/// let user = store
///     .create(NewUser {
///         first_name: "Ada".into(),
///         last_name: "Lovelace".into(),
///         email: "ada@example.com".into(),
///     })
///     .unwrap();
///
/// assert_eq!(user.id, 1);
/// assert_eq!(store.list().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct UserStore {
    inner: RwLock<Inner>,
}

impl UserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every user, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<User> {
        self.inner.read().users.values().cloned().collect()
    }

    /// Returns one user.
    #[must_use]
    pub fn get(&self, id: u64) -> Option<User> {
        self.inner.read().users.get(&id).cloned()
    }

    /// Adds a user and assigns its id.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::Invalid`] for empty fields and
    /// [`UserError::DuplicateEmail`] when the email is taken.
    pub fn create(&self, new: NewUser) -> Result<User, UserError> {
        let first_name = required("first_name", new.first_name)?;
        let last_name = required("last_name", new.last_name)?;
        let email = email(new.email)?;

        let mut inner = self.inner.write();
        if inner.email_taken(&email, None) {
            return Err(UserError::DuplicateEmail(email));
        }

        inner.next_id += 1;
        let user = User {
            id: inner.next_id,
            first_name,
            last_name,
            email,
        };
        inner.users.insert(user.id, user.clone());
        Ok(user)
    }

    /// Applies the present fields of `update`.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`], [`UserError::Invalid`] or
    /// [`UserError::DuplicateEmail`]. The user is unchanged on error.
    pub fn update(&self, update: UserUpdate) -> Result<User, UserError> {
        let first_name = update
            .first_name
            .map(|v| required("first_name", v))
            .transpose()?;
        let last_name = update
            .last_name
            .map(|v| required("last_name", v))
            .transpose()?;
        let new_email = update.email.map(email).transpose()?;

        let mut inner = self.inner.write();
        if !inner.users.contains_key(&update.id) {
            return Err(UserError::NotFound(update.id));
        }
        if let Some(ref e) = new_email {
            if inner.email_taken(e, Some(update.id)) {
                return Err(UserError::DuplicateEmail(e.clone()));
            }
        }

        let user = inner
            .users
            .get_mut(&update.id)
            .ok_or(UserError::NotFound(update.id))?;
        if let Some(v) = first_name {
            user.first_name = v;
        }
        if let Some(v) = last_name {
            user.last_name = v;
        }
        if let Some(v) = new_email {
            user.email = v;
        }
        Ok(user.clone())
    }

    /// Removes a user.
    ///
    /// # Errors
    ///
    /// Returns [`UserError::NotFound`] when no user has this id.
    pub fn delete(&self, id: u64) -> Result<User, UserError> {
        self.inner
            .write()
            .users
            .remove(&id)
            .ok_or(UserError::NotFound(id))
    }

    /// Returns the number of users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().users.len()
    }

    /// Returns `true` if the store holds no users.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn required(field: &'static str, value: String) -> Result<String, UserError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UserError::Invalid {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

fn email(value: String) -> Result<String, UserError> {
    let value = required("email", value)?;
    match value.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(value),
        _ => Err(UserError::Invalid {
            field: "email",
            reason: format!("'{value}' is not an email address"),
        }),
    }
}

async fn body_bytes(request: Request) -> Bytes {
    match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

async fn parse_body<T: for<'de> Deserialize<'de>>(request: Request) -> Result<T, Response> {
    let bytes = body_bytes(request).await;
    serde_json::from_slice(&bytes).map_err(|e| {
        json_error(
            StatusCode::BAD_REQUEST,
            "INVALID_BODY",
            &format!("Invalid user data: {e}"),
        )
    })
}

fn to_json<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => json(status, &value),
        Err(e) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_ERROR",
            &e.to_string(),
        ),
    }
}

/// `GET /users`
pub async fn list(store: Arc<UserStore>, _request: Request) -> Response {
    to_json(StatusCode::OK, &store.list())
}

/// `POST /create`
pub async fn create(store: Arc<UserStore>, request: Request) -> Response {
    let new = match parse_body::<NewUser>(request).await {
        Ok(new) => new,
        Err(response) => return response,
    };

    match store.create(new) {
        Ok(user) => {
            tracing::info!(user.id = user.id, "User created");
            to_json(StatusCode::CREATED, &user)
        }
        Err(e) => e.into_response(),
    }
}

/// `PUT /update`
pub async fn update(store: Arc<UserStore>, request: Request) -> Response {
    let update = match parse_body::<UserUpdate>(request).await {
        Ok(update) => update,
        Err(response) => return response,
    };

    match store.update(update) {
        Ok(user) => to_json(StatusCode::OK, &user),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /delete?id=N`
pub async fn delete(store: Arc<UserStore>, request: Request) -> Response {
    let Some(id) = query_param(request.uri(), "id").and_then(|id| id.parse::<u64>().ok()) else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "INVALID_ID",
            "Query parameter 'id' must be a positive integer",
        );
    };

    match store.delete(id) {
        Ok(user) => {
            tracing::info!(user.id = id, "User deleted");
            to_json(StatusCode::OK, &user)
        }
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::Full;
    use serde_json::Value;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            first_name: "Grace".to_string(),
            last_name: "Hopper".to_string(),
            email: email.to_string(),
        }
    }

    fn request(method: &str, uri: &str, body: &str) -> Request {
        http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Full::new(Bytes::from(body.to_string())))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_ids_are_sequential() {
        let store = UserStore::new();
        let a = store.create(new_user("a@example.com")).unwrap();
        let b = store.create(new_user("b@example.com")).unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let store = UserStore::new();
        let a = store.create(new_user("a@example.com")).unwrap();
        store.delete(a.id).unwrap();
        let b = store.create(new_user("b@example.com")).unwrap();
        assert_eq!(b.id, 2);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let store = UserStore::new();
        store.create(new_user("a@example.com")).unwrap();

        let err = store.create(new_user("A@Example.com")).unwrap_err();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_fields() {
        let store = UserStore::new();

        let mut blank = new_user("a@example.com");
        blank.first_name = "  ".to_string();
        assert!(matches!(
            store.create(blank),
            Err(UserError::Invalid { field: "first_name", .. })
        ));

        assert!(matches!(
            store.create(new_user("not-an-email")),
            Err(UserError::Invalid { field: "email", .. })
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_update_partial() {
        let store = UserStore::new();
        let user = store.create(new_user("a@example.com")).unwrap();

        let updated = store
            .update(UserUpdate {
                id: user.id,
                first_name: None,
                last_name: Some("Murray".to_string()),
                email: None,
            })
            .unwrap();

        assert_eq!(updated.first_name, "Grace");
        assert_eq!(updated.last_name, "Murray");
        assert_eq!(store.get(user.id), Some(updated));
    }

    #[test]
    fn test_update_keeps_own_email() {
        let store = UserStore::new();
        let user = store.create(new_user("a@example.com")).unwrap();

        let result = store.update(UserUpdate {
            id: user.id,
            first_name: None,
            last_name: None,
            email: Some("a@example.com".to_string()),
        });
        assert!(result.is_ok());
    }

    #[test]
    fn test_update_conflict_leaves_user_unchanged() {
        let store = UserStore::new();
        store.create(new_user("a@example.com")).unwrap();
        let b = store.create(new_user("b@example.com")).unwrap();

        let err = store
            .update(UserUpdate {
                id: b.id,
                first_name: Some("Changed".to_string()),
                last_name: None,
                email: Some("a@example.com".to_string()),
            })
            .unwrap_err();

        assert!(matches!(err, UserError::DuplicateEmail(_)));
        assert_eq!(store.get(b.id), Some(b));
    }

    #[test]
    fn test_missing_user() {
        let store = UserStore::new();
        assert_eq!(store.delete(7), Err(UserError::NotFound(7)));
        assert_eq!(
            store
                .update(UserUpdate {
                    id: 7,
                    first_name: None,
                    last_name: None,
                    email: None,
                })
                .unwrap_err()
                .status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_create_handler() {
        let store = Arc::new(UserStore::new());
        let response = create(
            Arc::clone(&store),
            request(
                "POST",
                "/create",
                r#"{"first_name":"Ada","last_name":"Lovelace","email":"ada@example.com"}"#,
            ),
        )
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["email"], "ada@example.com");
    }

    #[tokio::test]
    async fn test_create_handler_bad_body() {
        let store = Arc::new(UserStore::new());
        let response = create(Arc::clone(&store), request("POST", "/create", "{")).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "INVALID_BODY");
    }

    #[tokio::test]
    async fn test_list_handler() {
        let store = Arc::new(UserStore::new());
        store.create(new_user("b@example.com")).unwrap();
        store.create(new_user("a@example.com")).unwrap();

        let response = list(Arc::clone(&store), request("GET", "/users", "")).await;
        let body = body_json(response).await;

        let ids: Vec<u64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|u| u["id"].as_u64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_delete_handler() {
        let store = Arc::new(UserStore::new());
        store.create(new_user("a@example.com")).unwrap();

        let response = delete(Arc::clone(&store), request("DELETE", "/delete?id=1", "")).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(store.is_empty());

        let response = delete(Arc::clone(&store), request("DELETE", "/delete?id=1", "")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = delete(Arc::clone(&store), request("DELETE", "/delete?id=abc", "")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
