//! REST transport over reqwest

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::TransportAdapter;
use crate::config::SupportChatConfig;
use crate::error::{Result, SupportChatError};
use crate::structs::{ChatSession, Message, MessageKind, SendAck};

#[derive(Serialize)]
struct SendMessageBody<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    kind: MessageKind,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_base: Url,
}

impl HttpTransport {
    pub fn new(config: &SupportChatConfig) -> Result<Self> {
        let api_base = Url::parse(&config.api_base)
            .map_err(|e| SupportChatError::Config(format!("invalid api_base: {}", e)))?;
        if api_base.cannot_be_a_base() {
            return Err(SupportChatError::Config(format!(
                "api_base {} cannot be a base URL",
                api_base
            )));
        }

        let client = Client::builder()
            .default_headers(Self::default_headers(config.auth_token.as_deref())?)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SupportChatError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, api_base })
    }

    fn default_headers(auth_token: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SupportChatError::Config("auth token is not a valid header".into()))?;
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.api_base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        self.client.request(method, self.endpoint(segments))
    }

    async fn execute_raw(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await.map_err(|e| {
            warn!("Support chat request failed: {}", e);
            SupportChatError::from(e)
        })?;

        let status = response.status();
        let url = response.url().clone();
        let body = response.text().await?;
        debug!(%url, %status, "support chat response");

        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_status(status, body))
        }
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let body = self.execute_raw(request).await?;
        serde_json::from_str(&body).map_err(|e| SupportChatError::InvalidResponse(e.to_string()))
    }
}

fn classify_status(status: StatusCode, body: String) -> SupportChatError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body.trim())
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SupportChatError::Authentication(detail),
        StatusCode::BAD_REQUEST | StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
            SupportChatError::ServerRejection(detail)
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SupportChatError::TransientNetwork(detail)
        }
        s if s.is_server_error() => SupportChatError::TransientNetwork(detail),
        _ => SupportChatError::InvalidResponse(detail),
    }
}

#[async_trait]
impl TransportAdapter for HttpTransport {
    async fn list_sessions(&self) -> Result<Vec<ChatSession>> {
        self.execute(self.request(Method::GET, &["chat", "sessions"]))
            .await
    }

    async fn quick_create(&self) -> Result<ChatSession> {
        self.execute(self.request(Method::POST, &["chat", "sessions", "quick"]))
            .await
    }

    async fn get_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        self.execute(self.request(Method::GET, &["chat", "sessions", session_id, "messages"]))
            .await
    }

    async fn send_message(
        &self,
        session_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<SendAck> {
        let request = self
            .request(Method::POST, &["chat", "sessions", session_id, "messages"])
            .json(&SendMessageBody { content, kind });
        let body = self.execute_raw(request).await?;
        if body.trim().is_empty() {
            return Ok(SendAck::default());
        }
        // Acks vary between backends; anything that is not an ack object is still a success.
        Ok(serde_json::from_str(&body).unwrap_or_default())
    }
}
