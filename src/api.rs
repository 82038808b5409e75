use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ApiError;
use crate::models::{AuthResponse, InboundMessage, Inquiry, SenderRole};

/// Envelope every REST endpoint wraps its payload in
#[derive(Debug, Clone, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn into_data(self) -> Result<T, ApiError> {
        if !self.success {
            return Err(ApiError::Rejected(
                self.message.unwrap_or_else(|| "request failed".to_string()),
            ));
        }
        self.data
            .ok_or_else(|| ApiError::Rejected("response carried no data".to_string()))
    }
}

/// Source of a conversation's message history
#[async_trait]
pub trait HistoryLoader: Send + Sync {
    async fn load_history(&self, inquiry_id: i64) -> Result<Vec<InboundMessage>, ApiError>;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        Url::parse(base_url)?;
        Ok(ApiClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            http: Client::new(),
        })
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        debug!("GET {}", url);
        let response = self.authorized(self.http.get(&url)).send().await?;
        Self::unwrap_envelope(response).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        debug!("POST {}", url);
        let response = self.authorized(self.http.post(&url)).json(body).send().await?;
        Self::unwrap_envelope(response).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ApiError::Unauthorized(status.as_u16()));
        }
        if !status.is_success() {
            let message = serde_json::from_str::<ApiResponse<serde_json::Value>>(&text)
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or(text);
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&text)?;
        envelope.into_data()
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        self.post("/auth/login", &LoginRequest { email, password }).await
    }

    /// Conversations visible to the user: their own inquiries for clients,
    /// received ones for planners
    pub async fn inbox(&self, role: SenderRole) -> Result<Vec<Inquiry>, ApiError> {
        let path = match role {
            SenderRole::Client => "/inquiries/my",
            SenderRole::Planner | SenderRole::Admin => "/inquiries/received",
        };
        self.get(path).await
    }

    /// Full message history of a conversation, oldest first.
    /// Entries that fail to parse are dropped individually.
    pub async fn inquiry_messages(&self, inquiry_id: i64) -> Result<Vec<InboundMessage>, ApiError> {
        let raw: Vec<serde_json::Value> = self.get(&format!("/inquiries/{}/messages", inquiry_id)).await?;
        let total = raw.len();
        let messages: Vec<InboundMessage> = raw
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!("Dropping malformed history entry: {}", e);
                    None
                }
            })
            .collect();
        debug!("Loaded {}/{} history entries for inquiry {}", messages.len(), total, inquiry_id);
        Ok(messages)
    }
}

#[async_trait]
impl HistoryLoader for ApiClient {
    async fn load_history(&self, inquiry_id: i64) -> Result<Vec<InboundMessage>, ApiError> {
        self.inquiry_messages(inquiry_id).await
    }
}
