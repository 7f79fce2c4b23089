// REST collaborator client
//
// Wraps `reqwest::Client` with bearer auth, base-URL joining and error
// body unwrapping. Supplies paginated conversation snapshots and channel
// metadata to the core; the realtime link lives in `websocket`.

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::http::HttpConfig;
use crate::models::{
    CancelRunRequest, ChannelHistory, ChannelInfo, ChannelMessagesRequest, ChannelRef,
    ConversationPage, ConversationTab, ErrorBody, HistoryQuery, PageRequest, SetUnreadRequest,
    SyncMyRequest,
};

/// HTTP client for the backend's REST API.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a client that authenticates every request with `token`.
    pub fn new(base_url: Url, token: &SecretString, config: &HttpConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
            .map_err(|e| Error::Authentication {
                message: format!("token is not a valid header value: {e}"),
            })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = config.build_client_with_headers(headers)?;
        Ok(Self::with_client(base_url, http))
    }

    /// Create a client around a pre-built `reqwest::Client`.
    ///
    /// The caller is responsible for any auth headers.
    pub fn with_client(base_url: Url, http: reqwest::Client) -> Self {
        Self { http, base_url }
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Fetch one page of conversations for a logical tab.
    pub async fn sync_conversations(
        &self,
        tab: ConversationTab,
        page: PageRequest,
    ) -> Result<ConversationPage, Error> {
        let mut url = self.url(tab.path())?;
        match tab {
            ConversationTab::My => {
                self.post(url, &SyncMyRequest {
                    msg_count: page.msg_count,
                })
                .await
            }
            ConversationTab::All | ConversationTab::Waiting => {
                url.query_pairs_mut()
                    .append_pair("limit", &page.limit.to_string())
                    .append_pair("offset", &page.offset.to_string())
                    .append_pair("msg_count", &page.msg_count.to_string());
                self.post(url, &serde_json::json!({})).await
            }
        }
    }

    /// Fetch channel metadata (tags, presence, display name).
    pub async fn channel_info(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> Result<ChannelInfo, Error> {
        let mut url = self.url("v1/channels/info")?;
        url.query_pairs_mut()
            .append_pair("channel_id", channel_id)
            .append_pair("channel_type", &channel_type.to_string());
        self.get(url).await
    }

    /// Ask the backend to stop generating the reply correlated with
    /// `client_msg_no`. Accepted asynchronously (HTTP 202).
    pub async fn cancel_run(&self, client_msg_no: &str, reason: Option<&str>) -> Result<(), Error> {
        let url = self.url("v1/ai/runs/cancel")?;
        self.send_no_content(self.http.post(url).json(&CancelRunRequest {
            client_msg_no,
            reason,
        }))
        .await
    }

    /// Overwrite the unread counter of a conversation.
    pub async fn set_unread(
        &self,
        channel_id: &str,
        channel_type: u8,
        unread: u32,
    ) -> Result<(), Error> {
        let url = self.url("v1/conversations/unread")?;
        self.send_no_content(self.http.put(url).json(&SetUnreadRequest {
            channel_id,
            channel_type,
            unread,
        }))
        .await
    }

    /// Remove a conversation from the agent's lists. Channel history is kept.
    pub async fn delete_conversation(
        &self,
        channel_id: &str,
        channel_type: u8,
    ) -> Result<(), Error> {
        let url = self.url("v1/conversations")?;
        debug!("DELETE {}", url);
        self.send_no_content(self.http.delete(url).json(&ChannelRef {
            channel_id,
            channel_type,
        }))
        .await
    }

    /// Pull a window of messages for one channel.
    pub async fn sync_channel_messages(
        &self,
        channel_id: &str,
        channel_type: u8,
        query: &HistoryQuery,
    ) -> Result<ChannelHistory, Error> {
        let url = self.url("v1/conversations/messages")?;
        self.post(url, &ChannelMessagesRequest::new(channel_id, channel_type, query))
            .await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        Self::parse(resp).await
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        url: Url,
        body: &B,
    ) -> Result<T, Error> {
        debug!("POST {}", url);
        let resp = self.http.post(url).json(body).send().await?;
        Self::parse(resp).await
    }

    async fn send_no_content(&self, request: reqwest::RequestBuilder) -> Result<(), Error> {
        let resp = request.send().await?;
        Self::check_status(resp).await.map(drop)
    }

    async fn parse<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let resp = Self::check_status(resp).await?;
        let body = resp.text().await?;
        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message())
            .unwrap_or_else(|_| {
                if body.is_empty() {
                    status.to_string()
                } else {
                    body
                }
            });

        if matches!(status.as_u16(), 401 | 403) {
            return Err(Error::Authentication { message });
        }
        Err(Error::Api {
            status: status.as_u16(),
            message,
        })
    }
}
