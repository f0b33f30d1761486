//! REST client for the Parley server.

use std::collections::HashMap;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use parley_shared::constants::{HEADER_TOKEN, QUERY_TOKEN, QUERY_USER_ID};
use parley_shared::{Message, MessageId, UserId, UserProfile};

use crate::error::{ClientError, Result};

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct SessionBody {
    user: UserProfile,
    token: String,
}

#[derive(Deserialize)]
struct UserBody {
    user: UserProfile,
}

/// The sidebar: every other user and the caller's non-zero unseen counts.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sidebar {
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub unseen_messages: HashMap<UserId, u32>,
}

#[derive(Deserialize)]
struct MessagesBody {
    messages: Vec<Message>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentBody {
    new_msg: Message,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileChanges {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    /// `data:<mime>;base64,...`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

/// How the live connection identifies itself to the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectMode {
    /// Clear-text `?userId=`.
    #[default]
    Query,
    /// Signed `?token=`.
    Token,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).map_err(|e| ClientError::InvalidUrl(format!("{base_url}: {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") || base_url.cannot_be_a_base() {
            return Err(ClientError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: None,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// Relay URL for `me`, with the identity carried the way `mode` asks.
    pub fn ws_url(&self, me: &UserId, mode: ConnectMode) -> Result<Url> {
        let (key, value) = match mode {
            ConnectMode::Query => (QUERY_USER_ID, me.as_str()),
            ConnectMode::Token => (QUERY_TOKEN, self.token().ok_or(ClientError::NotAuthenticated)?),
        };

        let mut url = self.endpoint(&["ws"]);
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ClientError::InvalidUrl(url.to_string()))?;
        url.query_pairs_mut().append_pair(key, value);
        Ok(url)
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        // `new` rejects cannot-be-a-base URLs, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let req = self.http.request(method, self.endpoint(segments));
        match &self.token {
            Some(token) => req.header(HEADER_TOKEN, token),
            None => req,
        }
    }

    fn authed(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder> {
        if self.token.is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        Ok(self.request(method, segments))
    }

    async fn send<T: DeserializeOwned>(req: RequestBuilder) -> Result<T> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp
                .json::<ErrorBody>()
                .await
                .map(|b| b.message)
                .unwrap_or_else(|_| status.canonical_reason().unwrap_or("").to_string());
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }

    pub async fn signup(
        &mut self,
        full_name: &str,
        email: &str,
        password: &str,
        bio: &str,
    ) -> Result<UserProfile> {
        let body = serde_json::json!({
            "fullName": full_name,
            "email": email,
            "password": password,
            "bio": bio,
        });
        let session: SessionBody =
            Self::send(self.request(Method::POST, &["api", "auth", "signup"]).json(&body)).await?;
        self.token = Some(session.token);
        Ok(session.user)
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<UserProfile> {
        let body = serde_json::json!({ "email": email, "password": password });
        let session: SessionBody =
            Self::send(self.request(Method::POST, &["api", "auth", "login"]).json(&body)).await?;
        self.token = Some(session.token);
        Ok(session.user)
    }

    /// Validate the stored token. Clears it if the server refuses it.
    pub async fn check(&mut self) -> Result<UserProfile> {
        let result: Result<UserBody> =
            Self::send(self.authed(Method::GET, &["api", "auth", "check"])?).await;
        match result {
            Ok(body) => Ok(body.user),
            Err(ClientError::Api { status, message })
                if status == StatusCode::UNAUTHORIZED.as_u16() =>
            {
                self.token = None;
                Err(ClientError::Api { status, message })
            }
            Err(e) => Err(e),
        }
    }

    pub async fn update_profile(&self, changes: &ProfileChanges) -> Result<UserProfile> {
        let body: UserBody =
            Self::send(self.authed(Method::PUT, &["api", "auth", "update"])?.json(changes)).await?;
        Ok(body.user)
    }

    pub async fn sidebar(&self) -> Result<Sidebar> {
        Self::send(self.authed(Method::GET, &["api", "messages", "users"])?).await
    }

    pub async fn conversation(&self, peer: &UserId) -> Result<Vec<Message>> {
        let req = self.authed(Method::GET, &["api", "messages", peer.as_str()])?;
        let body: MessagesBody = Self::send(req).await?;
        Ok(body.messages)
    }

    pub async fn mark_seen(&self, id: MessageId) -> Result<()> {
        let id = id.to_string();
        let req = self.authed(Method::PUT, &["api", "messages", "mark", &id])?;
        let _: serde_json::Value = Self::send(req).await?;
        Ok(())
    }

    pub async fn send_message(
        &self,
        to: &UserId,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<Message> {
        let body = serde_json::json!({ "text": text, "image": image });
        let req = self.authed(Method::POST, &["api", "messages", "send", to.as_str()])?;
        let sent: SentBody = Self::send(req.json(&body)).await?;
        Ok(sent.new_msg)
    }
}
