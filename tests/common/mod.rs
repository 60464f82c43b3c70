#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower::ServiceExt;

use notion_newsletter::convertkit::model::Tag;
use notion_newsletter::convertkit::MailingList;
use notion_newsletter::db::{self, Pool};
use notion_newsletter::error::ClientError;
use notion_newsletter::model::{ContentItem, PostStatus};
use notion_newsletter::newsletter::EmailSettings;
use notion_newsletter::notion::ContentStore;
use notion_newsletter::server::{router, AppState};
use notion_newsletter::webhook::Publisher;

pub const SECRET: &str = "whsec_test";

pub fn post(id: &str, status: PostStatus, eligible: bool) -> ContentItem {
    ContentItem {
        id: id.into(),
        title: "Hello".into(),
        date: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
        category: "AI & Tech".into(),
        slug: format!("{}-slug", id),
        description: "A short intro".into(),
        status,
        newsletter_eligible: eligible,
    }
}

#[derive(Clone, Default)]
pub struct RecordingContent {
    items: Arc<Mutex<HashMap<String, ContentItem>>>,
    fetches: Arc<Mutex<Vec<String>>>,
    renders: Arc<Mutex<Vec<String>>>,
}

impl RecordingContent {
    pub fn with_items(items: Vec<ContentItem>) -> Self {
        Self {
            items: Arc::new(Mutex::new(
                items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            )),
            ..Default::default()
        }
    }

    pub async fn fetches(&self) -> Vec<String> {
        self.fetches.lock().await.clone()
    }

    pub async fn renders(&self) -> Vec<String> {
        self.renders.lock().await.clone()
    }
}

#[async_trait]
impl ContentStore for RecordingContent {
    async fn fetch_by_id(&self, id: &str) -> Result<ContentItem, ClientError> {
        self.fetches.lock().await.push(id.to_string());
        self.items
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("page {}", id)))
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<ContentItem, ClientError> {
        self.items
            .lock()
            .await
            .values()
            .find(|i| i.slug == slug)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("post with slug {}", slug)))
    }

    async fn list_published(&self) -> Result<Vec<ContentItem>, ClientError> {
        let mut items: Vec<ContentItem> = self
            .items
            .lock()
            .await
            .values()
            .filter(|i| i.status.is_published())
            .cloned()
            .collect();
        items.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(items)
    }

    async fn render_markdown(&self, id: &str) -> Result<String, ClientError> {
        self.renders.lock().await.push(id.to_string());
        Ok("Hello **world**\n\nRead [more](https://example.com/more)".into())
    }
}

#[derive(Clone, Default)]
pub struct RecordingMailingList {
    calls: Arc<Mutex<Vec<String>>>,
    contents: Arc<Mutex<Vec<String>>>,
    tags: Vec<Tag>,
    create_results: Arc<Mutex<VecDeque<Result<u64, ClientError>>>>,
    send_results: Arc<Mutex<VecDeque<Result<(), ClientError>>>>,
    send_delay: Option<Duration>,
    unconfigured: bool,
}

impl RecordingMailingList {
    pub fn with_tags(tags: Vec<Tag>) -> Self {
        Self {
            tags,
            ..Default::default()
        }
    }

    pub fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Default::default()
        }
    }

    /// Make every `send_broadcast` take `delay` before it completes.
    pub fn with_send_delay(mut self, delay: Duration) -> Self {
        self.send_delay = Some(delay);
        self
    }

    pub async fn queue_create(&self, result: Result<u64, ClientError>) {
        self.create_results.lock().await.push_back(result);
    }

    pub async fn queue_send(&self, result: Result<(), ClientError>) {
        self.send_results.lock().await.push_back(result);
    }

    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    pub async fn contents(&self) -> Vec<String> {
        self.contents.lock().await.clone()
    }
}

#[async_trait]
impl MailingList for RecordingMailingList {
    async fn create_broadcast(
        &self,
        subject: &str,
        content: &str,
        _description: &str,
    ) -> Result<u64, ClientError> {
        self.calls.lock().await.push(format!("create:{}", subject));
        self.contents.lock().await.push(content.to_string());
        self.create_results
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(555))
    }

    async fn find_tag(&self, name: &str) -> Result<Option<Tag>, ClientError> {
        self.calls.lock().await.push(format!("find_tag:{}", name));
        Ok(self
            .tags
            .iter()
            .find(|t| t.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    async fn set_recipients(&self, broadcast_id: u64, tag_ids: &[u64]) -> Result<(), ClientError> {
        self.calls
            .lock()
            .await
            .push(format!("set_recipients:{}:{:?}", broadcast_id, tag_ids));
        Ok(())
    }

    async fn send_broadcast(&self, broadcast_id: u64) -> Result<(), ClientError> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.lock().await.push(format!("send:{}", broadcast_id));
        self.send_results.lock().await.pop_front().unwrap_or(Ok(()))
    }

    async fn subscribe(&self, email: &str) -> Result<u64, ClientError> {
        if self.unconfigured {
            return Err(ClientError::NotConfigured("CONVERTKIT_FORM_ID is not set"));
        }
        self.calls.lock().await.push(format!("subscribe:{}", email));
        Ok(99)
    }
}

pub async fn memory_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

pub struct TestApp {
    pub router: Router,
    pub content: RecordingContent,
    pub list: RecordingMailingList,
    pub pool: Pool,
}

impl TestApp {
    pub async fn new(content: RecordingContent, list: RecordingMailingList, trust_unsigned: bool) -> Self {
        let pool = memory_pool().await;
        let publisher = Publisher {
            content: Arc::new(content.clone()),
            mailing_list: Arc::new(list.clone()),
            pool: pool.clone(),
            email: EmailSettings {
                site_url: "https://blog.test".into(),
                author: None,
            },
            webhook_secret: Some(SECRET.into()),
            trust_unsigned_payloads: trust_unsigned,
        };
        Self {
            router: router(AppState { publisher }),
            content,
            list,
            pool,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> (u16, Value) {
        let response: Response<Body> = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status().as_u16();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }
}

pub fn json_post(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn signed_post(uri: &str, body: &str, timestamp: &str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-notion-timestamp", timestamp)
        .header("x-notion-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}
