//! Webhook-triggered newsletter publishing.
//!
//! A notification names a page; the page is fetched, gated on
//! `Published` + `SendAsNewsletter`, claimed in the delivery log, rendered
//! and handed to the mailing list. Failed sends are not retried here; the
//! sender has to redeliver, and a redelivery sends the draft broadcast the
//! failed attempt already created.

use anyhow::anyhow;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::convertkit::MailingList;
use crate::db::{self, Claim, Pool};
use crate::error::{ApiError, ClientError};
use crate::markdown::markdown_to_email_html;
use crate::model::{ContentItem, DeliveryStatus};
use crate::newsletter::{
    create_broadcast, dispatch_broadcast, render_email, BroadcastResult, EmailSettings,
};
use crate::notion::ContentStore;
use crate::signature;

const FAILED: &str = "Failed to process webhook";
/// `webhook_id` value sent by the Pipedream relay.
pub const BRIDGE_MARKER: &str = "pipedream";

/// Where a notification claims to come from, decided by payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSource {
    /// `{"webhook_id": "pipedream", "id": ...}`
    Bridge,
    /// `{"webhook_id": ..., "object": "page", "id": ...}` or
    /// `{"entity": {"type": "page", "id": ...}}`
    Notion,
    /// `{"id": ...}`
    Direct,
}

impl fmt::Display for NotificationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NotificationSource::Bridge => "bridge",
            NotificationSource::Notion => "notion",
            NotificationSource::Direct => "direct",
        })
    }
}

#[derive(Debug, Clone)]
pub struct WebhookNotification {
    pub page_id: String,
    pub notification_id: Option<String>,
    pub source: NotificationSource,
    pub payload: Value,
}

/// The parts of an inbound HTTP request the publisher needs.
#[derive(Debug, Clone, Default)]
pub struct InboundWebhook {
    pub content_type: Option<String>,
    pub signature: Option<String>,
    pub timestamp: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub message: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broadcast_id: Option<u64>,
}

impl PublishOutcome {
    fn skipped(message: impl Into<String>, broadcast_id: Option<u64>) -> Self {
        Self {
            message: message.into(),
            status: "skipped",
            broadcast_id,
        }
    }

    fn sent(broadcast_id: u64) -> Self {
        Self {
            message: "Newsletter created and sent successfully".into(),
            status: "success",
            broadcast_id: Some(broadcast_id),
        }
    }
}

fn non_empty_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Resolve the target page and source of a parsed payload.
pub fn classify(payload: Value) -> Result<WebhookNotification, ApiError> {
    let webhook_id = non_empty_str(&payload, "webhook_id").map(str::to_string);
    let id = non_empty_str(&payload, "id").map(str::to_string);
    let object = non_empty_str(&payload, "object");
    let entity = payload.get("entity");
    let entity_page = entity
        .filter(|e| non_empty_str(e, "type") == Some("page"))
        .and_then(|e| non_empty_str(e, "id"))
        .map(str::to_string);

    let resolved = match (webhook_id.as_deref(), id, object, entity_page) {
        (Some(BRIDGE_MARKER), Some(id), _, _) => Some((id, webhook_id.clone(), NotificationSource::Bridge)),
        (Some(_), Some(id), Some("page"), _) => Some((id, webhook_id.clone(), NotificationSource::Notion)),
        (_, event_id, _, Some(page_id)) => Some((page_id, event_id, NotificationSource::Notion)),
        (_, Some(id), _, _) => Some((id, webhook_id.clone(), NotificationSource::Direct)),
        _ => None,
    };

    match resolved {
        Some((page_id, notification_id, source)) => Ok(WebhookNotification {
            page_id,
            notification_id,
            source,
            payload,
        }),
        None => Err(ApiError::MissingId { received: payload }),
    }
}

/// Parse the raw body of a notification.
pub fn parse_notification(body: &[u8]) -> Result<WebhookNotification, ApiError> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::MalformedRequest(format!("Invalid JSON body: {}", e)))?;
    classify(payload)
}

/// Runs the publish pipeline with injected clients.
#[derive(Clone)]
pub struct Publisher {
    pub content: Arc<dyn ContentStore>,
    pub mailing_list: Arc<dyn MailingList>,
    pub pool: Pool,
    pub email: EmailSettings,
    pub webhook_secret: Option<String>,
    pub trust_unsigned_payloads: bool,
}

impl Publisher {
    fn authenticate(&self, n: &WebhookNotification, req: &InboundWebhook) -> Result<(), ApiError> {
        if n.source != NotificationSource::Notion && self.trust_unsigned_payloads {
            debug!(source = %n.source, page_id = %n.page_id, "accepting unsigned payload");
            return Ok(());
        }
        let Some(secret) = self.webhook_secret.as_deref() else {
            warn!(page_id = %n.page_id, "webhook secret not configured; rejecting");
            return Err(ApiError::Unauthorized);
        };
        let (Some(sig), Some(ts)) = (req.signature.as_deref(), req.timestamp.as_deref()) else {
            warn!(page_id = %n.page_id, source = %n.source, "missing signature headers");
            return Err(ApiError::Unauthorized);
        };
        if signature::verify(secret, ts, &req.body, sig) {
            Ok(())
        } else {
            warn!(page_id = %n.page_id, source = %n.source, "signature mismatch");
            Err(ApiError::Unauthorized)
        }
    }

    /// Handle one webhook request end to end.
    pub async fn publish(&self, req: InboundWebhook) -> Result<PublishOutcome, ApiError> {
        let is_json = req
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"));
        if !is_json {
            return Err(ApiError::MalformedRequest(
                "Unsupported content type. Please use application/json".into(),
            ));
        }

        let notification = parse_notification(&req.body)?;
        info!(
            page_id = %notification.page_id,
            source = %notification.source,
            payload = %notification.payload,
            "received webhook"
        );
        self.authenticate(&notification, &req)?;
        self.publish_page(&notification.page_id, notification.notification_id.as_deref())
            .await
    }

    /// Gate, claim and deliver a single page. Also used for manual replays.
    pub async fn publish_page(
        &self,
        page_id: &str,
        notification_id: Option<&str>,
    ) -> Result<PublishOutcome, ApiError> {
        let item = self
            .content
            .fetch_by_id(page_id)
            .await
            .map_err(|e| ApiError::upstream(FAILED, e))?;

        if !item.wants_newsletter() {
            info!(
                page_id,
                status = item.status.as_str(),
                newsletter = item.newsletter_eligible,
                "post skipped"
            );
            return Ok(PublishOutcome::skipped(
                "Post skipped: not published or not marked for newsletter",
                None,
            ));
        }

        let (attempt, draft) = match db::claim_delivery(&self.pool, page_id, notification_id)
            .await
            .map_err(|e| ApiError::storage(FAILED, e))?
        {
            Claim::Acquired { attempt, draft } => (attempt, draft),
            Claim::Existing(rec) => {
                let broadcast_id = rec.broadcast_id.map(|id| id as u64);
                info!(page_id, status = rec.status.as_str(), ?broadcast_id, "duplicate delivery");
                let message = match rec.status {
                    DeliveryStatus::Sent => "Post skipped: newsletter already sent",
                    _ => "Post skipped: newsletter delivery already in progress",
                };
                return Ok(PublishOutcome::skipped(message, broadcast_id));
            }
        };

        info!(page_id, title = %item.title, attempt, ?draft, "sending newsletter");
        // The claimed row must reach `sent` or `failed` even if the caller goes away.
        let publisher = self.clone();
        let page = page_id.to_string();
        tokio::spawn(async move { publisher.complete_delivery(&page, &item, draft).await })
            .await
            .map_err(|e| ApiError::storage(FAILED, anyhow!("delivery task aborted: {}", e)))?
    }

    async fn complete_delivery(
        &self,
        page_id: &str,
        item: &ContentItem,
        draft: Option<u64>,
    ) -> Result<PublishOutcome, ApiError> {
        match self.deliver(page_id, item, draft).await {
            Ok(result) => {
                if let Err(err) = db::mark_sent(&self.pool, page_id, result.broadcast_id).await {
                    error!(page_id, broadcast_id = result.broadcast_id, ?err, "failed to record sent delivery");
                }
                Ok(PublishOutcome::sent(result.broadcast_id))
            }
            Err(err) => {
                error!(page_id, %err, "newsletter delivery failed");
                if let Err(db_err) = db::mark_failed(&self.pool, page_id, &err.to_string()).await {
                    error!(page_id, ?db_err, "failed to record failed delivery");
                }
                Err(ApiError::upstream(FAILED, err))
            }
        }
    }

    /// Rendered email HTML for a post.
    pub async fn render(&self, item: &ContentItem) -> Result<String, ClientError> {
        let markdown = self.content.render_markdown(&item.id).await?;
        let body = markdown_to_email_html(&markdown);
        Ok(render_email(item, &body, &self.email))
    }

    /// Send `draft` if a previous attempt left one, otherwise create a new
    /// broadcast and record it before sending.
    async fn deliver(
        &self,
        page_id: &str,
        item: &ContentItem,
        draft: Option<u64>,
    ) -> Result<BroadcastResult, ClientError> {
        let list = self.mailing_list.as_ref();
        let broadcast_id = match draft {
            Some(id) => {
                info!(page_id, broadcast_id = id, "reusing draft broadcast");
                id
            }
            None => {
                let email = self.render(item).await?;
                let id = create_broadcast(list, item, &email).await?;
                if let Err(err) = db::record_broadcast(&self.pool, page_id, id).await {
                    error!(page_id, broadcast_id = id, ?err, "failed to record draft broadcast");
                }
                id
            }
        };
        dispatch_broadcast(list, item, broadcast_id).await
    }
}
