use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_CATEGORY: &str = "Uncategorized";
pub const DEFAULT_DESCRIPTION: &str = "No description available.";

/// Publication state of a post. Only `Published` counts as published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum PostStatus {
    Draft,
    Published,
    Other(String),
}

impl PostStatus {
    pub fn as_str(&self) -> &str {
        match self {
            PostStatus::Draft => "Draft",
            PostStatus::Published => "Published",
            PostStatus::Other(label) => label,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, PostStatus::Published)
    }
}

impl From<String> for PostStatus {
    fn from(label: String) -> Self {
        match label.as_str() {
            "Draft" => PostStatus::Draft,
            "Published" => PostStatus::Published,
            _ => PostStatus::Other(label),
        }
    }
}

impl From<PostStatus> for String {
    fn from(status: PostStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A blog post as read from the content database, with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub date: NaiveDate,
    pub category: String,
    pub slug: String,
    pub description: String,
    pub status: PostStatus,
    pub newsletter_eligible: bool,
}

impl ContentItem {
    /// Whether publishing this item should also send an email broadcast.
    pub fn wants_newsletter(&self) -> bool {
        self.status.is_published() && self.newsletter_eligible
    }
}

/// State of a newsletter delivery in the local delivery log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sending,
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sending" => Some(DeliveryStatus::Sending),
            "sent" => Some(DeliveryStatus::Sent),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}
