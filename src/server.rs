//! HTTP surface: webhook, subscription and read-only post endpoints.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::convertkit::MailingList;
use crate::error::{ApiError, ClientError};
use crate::model::ContentItem;
use crate::notion::ContentStore;
use crate::signature::{SIGNATURE_HEADER, TIMESTAMP_HEADER};
use crate::webhook::{InboundWebhook, PublishOutcome, Publisher};

#[derive(Clone)]
pub struct AppState {
    pub publisher: Publisher,
}

impl AppState {
    fn content(&self) -> &dyn ContentStore {
        self.publisher.content.as_ref()
    }

    fn mailing_list(&self) -> &dyn MailingList {
        self.publisher.mailing_list.as_ref()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/publish-newsletter", post(publish_newsletter))
        .route("/subscribe", post(subscribe))
        .route("/posts", get(list_posts))
        .route("/posts/{slug}", get(get_post))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Serve until Ctrl-C.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(address = %addr, "newsletter service listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

fn header_str(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn publish_newsletter(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<PublishOutcome>, ApiError> {
    let req = InboundWebhook {
        content_type: header_str(&headers, header::CONTENT_TYPE),
        signature: header_str(&headers, SIGNATURE_HEADER),
        timestamp: header_str(&headers, TIMESTAMP_HEADER),
        body: body.to_vec(),
    };
    let outcome = state.publisher.publish(req).await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct SubscribeRequest {
    #[serde(default)]
    email: Option<String>,
}

async fn subscribe(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: SubscribeRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::MalformedRequest(format!("Invalid JSON body: {}", e)))?;
    let email = req
        .email
        .as_deref()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::MalformedRequest("Email is required".into()))?;

    let subscription_id = state.mailing_list().subscribe(email).await.map_err(|e| {
        let context = match e {
            ClientError::NotConfigured(_) => "Newsletter subscription is not configured",
            _ => "Failed to subscribe",
        };
        ApiError::upstream(context, e)
    })?;
    info!(subscription_id, "new subscriber");
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Successfully subscribed",
            "subscriptionId": subscription_id,
        })),
    ))
}

async fn list_posts(State(state): State<Arc<AppState>>) -> Result<Json<Vec<ContentItem>>, ApiError> {
    let posts = state
        .content()
        .list_published()
        .await
        .map_err(|e| ApiError::upstream("Failed to fetch posts", e))?;
    Ok(Json(posts))
}

async fn get_post(
    State(state): State<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let lookup = |e: ClientError| match e {
        ClientError::NotFound(_) => ApiError::NotFound(format!("Post not found: {}", slug)),
        other => ApiError::upstream("Failed to fetch post", other),
    };
    let metadata = state.content().fetch_by_slug(&slug).await.map_err(lookup)?;
    let markdown = state
        .content()
        .render_markdown(&metadata.id)
        .await
        .map_err(lookup)?;
    Ok(Json(json!({ "metadata": metadata, "markdown": markdown })))
}
