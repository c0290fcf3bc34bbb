//! Request/response client for the Tidepool resource API.
//!
//! Every call is awaited by the caller; nothing is retried or cached here.
//! Failures come back as [`RemoteError`] and callers decide what to do with
//! their local state.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tidepool_core::{ClientIdentity, Room, UserProfile};
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("{verb:?} is not supported on {resource}")]
    Unsupported { resource: Resource, verb: Verb },
    #[error("{0}")]
    Store(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Tasks,
    Rooms,
    User,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::Tasks => "tasks",
            Resource::Rooms => "rooms",
            Resource::User => "user profile",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    List,
    Get,
    Create,
    Update,
    Delete,
}

/// A single call against a named resource.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    resource: Resource,
    verb: Verb,
    id: Option<String>,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

impl RemoteRequest {
    pub fn new(resource: Resource, verb: Verb) -> Self {
        Self {
            resource,
            verb,
            id: None,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body<T: Serialize>(mut self, body: &T) -> Result<Self, RemoteError> {
        self.body = Some(serde_json::to_value(body)?);
        Ok(self)
    }

    fn endpoint(&self) -> Result<(Method, String), RemoteError> {
        let unsupported = || RemoteError::Unsupported {
            resource: self.resource,
            verb: self.verb,
        };
        let with_id = |base: &str| match &self.id {
            Some(id) => format!("{base}/{id}"),
            None => base.to_string(),
        };
        let endpoint = match (self.resource, self.verb) {
            (Resource::Tasks, Verb::List) => (Method::GET, "tasks".to_string()),
            (Resource::Tasks, Verb::Get) => (Method::GET, with_id("tasks")),
            (Resource::Tasks, Verb::Create) => (Method::POST, "tasks".to_string()),
            (Resource::Tasks, Verb::Update) => (Method::PATCH, with_id("tasks")),
            (Resource::Tasks, Verb::Delete) => (Method::DELETE, with_id("tasks")),
            (Resource::Rooms, Verb::List) => (Method::GET, "room".to_string()),
            (Resource::Rooms, Verb::Get) => (Method::GET, with_id("room")),
            (Resource::Rooms, Verb::Create) => (Method::GET, "room/new".to_string()),
            (Resource::User, Verb::Get) => (Method::GET, with_id("user")),
            (Resource::User, Verb::Update) => (Method::POST, "user/name".to_string()),
            _ => return Err(unsupported()),
        };
        Ok(endpoint)
    }
}

#[derive(Clone)]
pub struct RemoteClient {
    http: Client,
    base_url: Url,
}

impl RemoteClient {
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self, RemoteError> {
        let mut base_url = Url::parse(base_url)?;
        // Url::join drops the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            base_url,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Performs the request and decodes the JSON response body.
    pub async fn request<T>(&self, request: RemoteRequest) -> Result<T, RemoteError>
    where
        T: DeserializeOwned,
    {
        let res = self.send(request).await?;
        Ok(res.json::<T>().await?)
    }

    /// Performs the request, discarding any response body.
    pub async fn execute(&self, request: RemoteRequest) -> Result<(), RemoteError> {
        self.send(request).await.map(|_| ())
    }

    async fn send(&self, request: RemoteRequest) -> Result<reqwest::Response, RemoteError> {
        let (method, path) = request.endpoint()?;
        let mut url = self.base_url.join(&path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(request.query.iter());
        }
        debug!(target = "tidepool::remote", method = %method, url = %url, "sending request");

        let mut builder = self.http.request(method, url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let res = builder.send().await?;

        if res.status().is_success() {
            Ok(res)
        } else {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            Err(RemoteError::UnexpectedStatus { status, body })
        }
    }

    pub async fn fetch_user(&self, id: &ClientIdentity) -> Result<UserProfile, RemoteError> {
        self.request(RemoteRequest::new(Resource::User, Verb::Get).with_id(id.as_str()))
            .await
    }

    pub async fn rename_user(
        &self,
        id: &ClientIdentity,
        name: &str,
    ) -> Result<UserProfile, RemoteError> {
        let body = serde_json::json!({ "id": id.as_str(), "name": name });
        self.request(RemoteRequest::new(Resource::User, Verb::Update).with_body(&body)?)
            .await
    }

    pub async fn list_rooms(&self) -> Result<Vec<Room>, RemoteError> {
        self.request(RemoteRequest::new(Resource::Rooms, Verb::List))
            .await
    }

    pub async fn create_room(&self) -> Result<Room, RemoteError> {
        self.request(RemoteRequest::new(Resource::Rooms, Verb::Create))
            .await
    }
}
