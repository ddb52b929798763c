use crate::config::RateLimits;
use crate::error::AppError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;

/// Everything the rate guard tracks. Only the daily fields are persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageState {
    pub request_timestamps: VecDeque<DateTime<Utc>>,
    pub daily_request_count: u64,
    pub daily_token_count: u64,
    pub last_reset_date: NaiveDate,
}

impl UsageState {
    pub fn fresh(today: NaiveDate) -> Self {
        Self {
            request_timestamps: VecDeque::new(),
            daily_request_count: 0,
            daily_token_count: 0,
            last_reset_date: today,
        }
    }
}

/// Point-in-time view of usage against each ceiling, shown to the user
/// whenever a request is turned away.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub requests_last_minute: usize,
    pub requests_per_minute: usize,
    pub daily_requests: u64,
    pub requests_per_day: u64,
    pub daily_tokens: u64,
    pub tokens_per_day: u64,
}

impl UsageSnapshot {
    pub fn new(state: &UsageState, window_count: usize, limits: &RateLimits) -> Self {
        Self {
            requests_last_minute: window_count,
            requests_per_minute: limits.requests_per_minute,
            daily_requests: state.daily_request_count,
            requests_per_day: limits.requests_per_day,
            daily_tokens: state.daily_token_count,
            tokens_per_day: limits.tokens_per_day,
        }
    }
}

impl fmt::Display for UsageSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} daily requests, {}/{} daily tokens",
            self.daily_requests, self.requests_per_day, self.daily_tokens, self.tokens_per_day
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LimitKind {
    PerMinute,
    DailyRequests,
    DailyTokens,
}

impl LimitKind {
    pub fn describe(self, usage: &UsageSnapshot) -> String {
        match self {
            LimitKind::PerMinute => format!(
                "You've made {} requests in the last minute. Please wait a moment before trying again.",
                usage.requests_per_minute
            ),
            LimitKind::DailyRequests => format!(
                "The daily limit of {} requests has been reached. Please try again tomorrow.",
                usage.requests_per_day
            ),
            LimitKind::DailyTokens => format!(
                "The daily budget of {} tokens has been used up. Please try again tomorrow.",
                usage.tokens_per_day
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    text: String,
}

impl QueryRequest {
    pub fn new(text: &str) -> Result<Self, AppError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(AppError::Query("query must not be empty".into()));
        }
        Ok(Self {
            text: trimmed.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCategory {
    /// The endpoint answered with a non-2xx status.
    Http { status: u16 },
    /// The endpoint could not be reached at all.
    Network,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub category: FailureCategory,
    pub message: String,
}

impl TransportError {
    pub fn http(status: u16, body: &str) -> Self {
        Self {
            category: FailureCategory::Http { status },
            message: format!("API request failed with status {status}: {body}"),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::Unknown,
            message: message.into(),
        }
    }

    /// Shapes a client error into a display message; connection-level
    /// failures get the network category.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            return Self {
                category: FailureCategory::Network,
                message: "Failed to connect to the completion API - check network connection"
                    .into(),
            };
        }
        if err.is_request() {
            return Self {
                category: FailureCategory::Network,
                message: format!("Network error - connectivity issue ({err})"),
            };
        }
        if let Some(status) = err.status() {
            return Self {
                category: FailureCategory::Http {
                    status: status.as_u16(),
                },
                message: err.to_string(),
            };
        }
        Self::unknown(err.to_string())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryResult {
    Success {
        text: String,
        tokens_consumed: Option<u64>,
    },
    RateLimited {
        usage: UsageSnapshot,
        limit: LimitKind,
    },
    TransportError(TransportError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Highlights,
    Destinations,
    Stories,
}

impl Collection {
    /// Load order on the page.
    pub const ALL: [Collection; 3] = [
        Collection::Highlights,
        Collection::Destinations,
        Collection::Stories,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Highlights => "highlights",
            Collection::Destinations => "destinations",
            Collection::Stories => "stories",
        }
    }
}

// Stored documents are hand-edited, so a field of the wrong type degrades
// to its empty value instead of failing the whole collection.

fn text_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn optional_text_field<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let text = text_field(deserializer)?;
    Ok((!text.is_empty()).then_some(text))
}

fn tags_field<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Highlight {
    #[serde(skip)]
    pub id: String,
    #[serde(deserialize_with = "text_field")]
    pub title: String,
    #[serde(deserialize_with = "text_field")]
    pub description: String,
    #[serde(deserialize_with = "text_field")]
    pub image_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Destination {
    #[serde(skip)]
    pub id: String,
    #[serde(deserialize_with = "text_field")]
    pub name: String,
    #[serde(deserialize_with = "text_field")]
    pub description: String,
    #[serde(deserialize_with = "text_field")]
    pub image_url: String,
    /// Missing, null or non-list tags render no chips.
    #[serde(deserialize_with = "tags_field")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Story {
    #[serde(skip)]
    pub id: String,
    #[serde(deserialize_with = "text_field")]
    pub title: String,
    #[serde(deserialize_with = "text_field")]
    pub description: String,
    #[serde(deserialize_with = "text_field")]
    pub image_url: String,
    #[serde(deserialize_with = "optional_text_field")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentRecord {
    Highlight(Highlight),
    Destination(Destination),
    Story(Story),
}

/// A stored document before it is typed: provider id plus plain JSON fields.
#[derive(Debug, Clone, Deserialize)]
pub struct RawDocument {
    pub id: String,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ContentRecord {
    pub fn from_document(collection: Collection, doc: RawDocument) -> Result<Self, AppError> {
        let fields = serde_json::Value::Object(doc.fields);
        let record = match collection {
            Collection::Highlights => {
                let mut h: Highlight = serde_json::from_value(fields)?;
                h.id = doc.id;
                ContentRecord::Highlight(h)
            }
            Collection::Destinations => {
                let mut d: Destination = serde_json::from_value(fields)?;
                d.id = doc.id;
                ContentRecord::Destination(d)
            }
            Collection::Stories => {
                let mut s: Story = serde_json::from_value(fields)?;
                s.id = doc.id;
                ContentRecord::Story(s)
            }
        };
        Ok(record)
    }

    pub fn id(&self) -> &str {
        match self {
            ContentRecord::Highlight(h) => &h.id,
            ContentRecord::Destination(d) => &d.id,
            ContentRecord::Story(s) => &s.id,
        }
    }
}
