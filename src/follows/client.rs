//! Social-graph API client.
//!
//! Talks XRPC to the operator's PDS: creates a session with the app password,
//! then reads the profile and the paginated follows list.

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

/// Upper bound the API accepts for one `getFollows` page.
pub const MAX_PAGE_LIMIT: u8 = 100;
/// Upper bound on `uris` for one `getPosts` call.
pub const MAX_POSTS_PER_REQUEST: usize = 25;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Follow {
    pub did: String,
    #[serde(default)]
    pub handle: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FollowsPage {
    pub follows: Vec<Follow>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// The slice of the social-graph API the follows refresh and feed previews
/// need.
#[async_trait]
pub trait GraphClient: Send + Sync {
    /// Establishes a session, or keeps the current one.
    async fn login(&self) -> Result<(), GraphError>;

    async fn follows_count(&self, actor: &str) -> Result<Option<u64>, GraphError>;

    async fn get_follows(
        &self,
        actor: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<FollowsPage, GraphError>;

    /// Full post views for `uris`, in the order the API returns them.
    async fn get_posts(&self, uris: &[String]) -> Result<Vec<Value>, GraphError>;
}

#[derive(Serialize)]
struct CreateSessionRequest<'a> {
    identifier: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionResponse {
    access_jwt: String,
    did: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileView {
    #[serde(default)]
    follows_count: Option<u64>,
}

#[derive(Deserialize)]
struct PostsView {
    posts: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct XrpcConfig {
    pub service_url: String,
    pub identifier: String,
    pub password: String,
    pub timeout: Duration,
}

pub struct XrpcClient {
    http: Client,
    base_url: String,
    identifier: String,
    password: String,
    access_jwt: Mutex<Option<String>>,
}

impl XrpcClient {
    pub fn new(config: &XrpcConfig) -> Result<Self, GraphError> {
        let http = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            http,
            base_url: config.service_url.trim_end_matches('/').to_string(),
            identifier: config.identifier.clone(),
            password: config.password.clone(),
            access_jwt: Mutex::new(None),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.base_url, method)
    }

    async fn bearer(&self) -> Result<String, GraphError> {
        self.login().await?;
        self.access_jwt
            .lock()
            .await
            .clone()
            .ok_or_else(|| GraphError::Unauthorized("no active session".into()))
    }

    async fn request_posts(&self, uris: &[String]) -> Result<Vec<Value>, GraphError> {
        let token = self.bearer().await?;
        let query: Vec<(&str, &str)> = uris.iter().map(|uri| ("uris", uri.as_str())).collect();

        let response = self
            .http
            .get(self.url("app.bsky.feed.getPosts"))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        let view: PostsView = self.decode(response).await?;
        Ok(view.posts)
    }

    /// Decodes a successful body, or maps the XRPC error envelope. Token
    /// errors drop the cached session so the next call logs in again.
    async fn decode<T: DeserializeOwned>(&self, response: Response) -> Result<T, GraphError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|err| GraphError::Parse(err.to_string()));
        }

        let body: XrpcErrorBody = response.json().await.unwrap_or_default();
        let token_rejected = status == StatusCode::UNAUTHORIZED
            || matches!(body.error.as_deref(), Some("ExpiredToken" | "InvalidToken"));
        let message = body
            .message
            .or(body.error)
            .unwrap_or_else(|| status.to_string());

        if token_rejected {
            self.access_jwt.lock().await.take();
            return Err(GraphError::Unauthorized(message));
        }

        Err(GraphError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl GraphClient for XrpcClient {
    async fn login(&self) -> Result<(), GraphError> {
        let mut session = self.access_jwt.lock().await;
        if session.is_some() {
            return Ok(());
        }

        let response = self
            .http
            .post(self.url("com.atproto.server.createSession"))
            .json(&CreateSessionRequest {
                identifier: &self.identifier,
                password: &self.password,
            })
            .send()
            .await?;

        // Not `decode`: that would try to re-lock the session on auth failure.
        let status = response.status();
        if !status.is_success() {
            let body: XrpcErrorBody = response.json().await.unwrap_or_default();
            let message = body
                .message
                .or(body.error)
                .unwrap_or_else(|| status.to_string());
            return Err(GraphError::Unauthorized(message));
        }

        let created: CreateSessionResponse = response
            .json()
            .await
            .map_err(|err| GraphError::Parse(err.to_string()))?;

        info!("Logged in to {} as {}", self.base_url, created.did);
        *session = Some(created.access_jwt);
        Ok(())
    }

    async fn follows_count(&self, actor: &str) -> Result<Option<u64>, GraphError> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.url("app.bsky.actor.getProfile"))
            .bearer_auth(token)
            .query(&[("actor", actor)])
            .send()
            .await?;

        let profile: ProfileView = self.decode(response).await?;
        Ok(profile.follows_count)
    }

    async fn get_follows(
        &self,
        actor: &str,
        limit: u8,
        cursor: Option<&str>,
    ) -> Result<FollowsPage, GraphError> {
        let token = self.bearer().await?;
        let limit = limit.clamp(1, MAX_PAGE_LIMIT).to_string();

        let mut query = vec![("actor", actor), ("limit", limit.as_str())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        debug!("getFollows actor={actor} cursor={cursor:?}");

        let response = self
            .http
            .get(self.url("app.bsky.graph.getFollows"))
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        self.decode(response).await
    }

    async fn get_posts(&self, uris: &[String]) -> Result<Vec<Value>, GraphError> {
        let mut posts = Vec::with_capacity(uris.len());
        for chunk in uris.chunks(MAX_POSTS_PER_REQUEST) {
            // An expired token clears the session in `decode`; one retry logs in again.
            let fetched = match self.request_posts(chunk).await {
                Err(GraphError::Unauthorized(_)) => self.request_posts(chunk).await?,
                other => other?,
            };
            posts.extend(fetched);
        }
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_page_tolerates_missing_cursor() {
        let page: FollowsPage = serde_json::from_str(
            r#"{"subject": {"did": "did:plc:me"}, "follows": [{"did": "did:plc:a", "handle": "a.test"}]}"#,
        )
        .unwrap();

        assert_eq!(page.cursor, None);
        assert_eq!(page.follows[0].did, "did:plc:a");
    }

    #[test]
    fn page_without_follows_is_rejected() {
        assert!(serde_json::from_str::<FollowsPage>(r#"{"error": "oops"}"#).is_err());
        assert!(serde_json::from_str::<FollowsPage>(r#"{"cursor": "next"}"#).is_err());
    }

    #[test]
    fn base_url_is_normalized() {
        let client = XrpcClient::new(&XrpcConfig {
            service_url: "https://pds.example/".into(),
            identifier: "me.example".into(),
            password: "secret".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        assert_eq!(
            client.url("app.bsky.graph.getFollows"),
            "https://pds.example/xrpc/app.bsky.graph.getFollows"
        );
    }
}
