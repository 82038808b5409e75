use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use uuid::Uuid;

/// Placeholder sender id carried by an optimistic message until the server echo arrives
pub const UNCONFIRMED_SENDER_ID: i64 = 0;
pub const UNCONFIRMED_SENDER_NAME: &str = "You";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenderRole {
    #[default]
    Client,
    Planner,
    Admin,
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SenderRole::Client => "CLIENT",
            SenderRole::Planner => "PLANNER",
            SenderRole::Admin => "ADMIN",
        };
        f.write_str(s)
    }
}

/// Where a message sits in its one-way lifecycle: `Pending -> Confirmed`
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum DeliveryState {
    Pending,           // Sent locally, no server echo yet
    Confirmed(i64),    // Accepted by the server under this id
}

impl DeliveryState {
    pub fn is_pending(&self) -> bool {
        matches!(self, DeliveryState::Pending)
    }

    pub fn server_id(&self) -> Option<i64> {
        match self {
            DeliveryState::Pending => None,
            DeliveryState::Confirmed(id) => Some(*id),
        }
    }
}

/// Client-generated id attached to a send and echoed back by the server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Fresh random (v4) id, collision-free for the lifetime of a conversation view
    pub fn generate() -> Self {
        CorrelationId(Uuid::new_v4().to_string())
    }

    /// Wraps a received id. Empty ids mean "no correlation" and yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(CorrelationId(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The local user as known to the conversation view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub user_id: i64,
    pub role: SenderRole,
}

impl LocalIdentity {
    pub fn new(user_id: i64, role: SenderRole) -> Self {
        LocalIdentity { user_id, role }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub state: DeliveryState,
    pub correlation_id: Option<CorrelationId>,
    pub content: String,
    pub sent_at: DateTime<Utc>,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_role: SenderRole,
}

impl Message {
    /// Optimistic entry for a local send, stamped with the local clock
    pub fn pending(content: &str, correlation_id: CorrelationId, role: SenderRole) -> Self {
        Message {
            state: DeliveryState::Pending,
            correlation_id: Some(correlation_id),
            content: content.to_string(),
            sent_at: Utc::now(),
            sender_id: UNCONFIRMED_SENDER_ID,
            sender_name: UNCONFIRMED_SENDER_NAME.to_string(),
            sender_role: role,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state.is_pending()
    }

    pub fn server_id(&self) -> Option<i64> {
        self.state.server_id()
    }

    /// Whether the view should render this message as authored by `user_id`.
    /// Pending entries are always our own.
    pub fn is_from(&self, user_id: i64) -> bool {
        self.is_pending() || self.sender_id == user_id
    }
}

/// Message payload as delivered by the broker subscription and the history endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: i64,
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub sent_at: DateTime<Utc>,
    pub sender_id: i64,
    pub sender_name: String,
    pub sender_role: SenderRole,
    #[serde(default, alias = "correlationId", skip_serializing_if = "Option::is_none")]
    pub client_msg_id: Option<String>,
}

impl InboundMessage {
    /// Parse a broker frame body. Bodies missing required fields are rejected whole.
    pub fn from_json(body: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(body)
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.client_msg_id.as_deref().and_then(CorrelationId::parse)
    }
}

/// Parse a server timestamp: RFC 3339, or a local date-time without offset (taken as UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| de::Error::custom(format!("invalid timestamp '{}'", raw)))
}

impl From<InboundMessage> for Message {
    fn from(inbound: InboundMessage) -> Self {
        let correlation_id = inbound.correlation_id();
        Message {
            state: DeliveryState::Confirmed(inbound.id),
            correlation_id,
            content: inbound.content,
            sent_at: inbound.sent_at,
            sender_id: inbound.sender_id,
            sender_name: inbound.sender_name,
            sender_role: inbound.sender_role,
        }
    }
}

/// Publish payload: `{content, clientMsgId}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    pub content: String,
    pub client_msg_id: String,
}

impl OutboundMessage {
    pub fn new(content: &str, correlation_id: &CorrelationId) -> Self {
        OutboundMessage {
            content: content.to_string(),
            client_msg_id: correlation_id.as_str().to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InquiryStatus {
    Pending,
    Active,
    Closed,
}

impl fmt::Display for InquiryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InquiryStatus::Pending => "PENDING",
            InquiryStatus::Active => "ACTIVE",
            InquiryStatus::Closed => "CLOSED",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryListing {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub cover_image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryClient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InquiryPlanner {
    pub id: i64,
    #[serde(default)]
    pub business_name: Option<String>,
}

/// Inbox entry for one conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inquiry {
    pub id: i64,
    pub status: InquiryStatus,
    pub event_date: String,
    pub event_location: String,
    pub guest_count: u32,
    pub listing: InquiryListing,
    pub client: InquiryClient,
    pub planner: InquiryPlanner,
    #[serde(default)]
    pub last_message: Option<String>,
}

impl Inquiry {
    /// Name of the other party, as seen by a user with `role`
    pub fn counterpart_name(&self, role: SenderRole) -> String {
        match role {
            SenderRole::Client => self
                .planner
                .business_name
                .clone()
                .unwrap_or_else(|| "Planner".to_string()),
            _ => format!("{} {}", self.client.first_name, self.client.last_name),
        }
    }
}

/// Login response carrying the bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub user_id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: SenderRole,
    #[serde(default)]
    pub email_verified: bool,
}

impl AuthResponse {
    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity::new(self.user_id, self.role)
    }
}
