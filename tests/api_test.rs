mod common;

use common::{get, json_post, post, RecordingContent, RecordingMailingList, TestApp};
use notion_newsletter::config::Config;
use notion_newsletter::convertkit::ConvertKitClient;
use notion_newsletter::model::PostStatus;
use notion_newsletter::newsletter::EmailSettings;
use notion_newsletter::server::{router, AppState};
use notion_newsletter::webhook::Publisher;
use reqwest::Url;
use std::sync::Arc;
use wiremock::MockServer;

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new(RecordingContent::default(), RecordingMailingList::default(), false).await;
    let (status, body) = app.send(get("/health")).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn posts_lists_published_newest_first() {
    let mut older = post("old", PostStatus::Published, false);
    older.date = chrono::NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let content = RecordingContent::with_items(vec![
        older,
        post("new", PostStatus::Published, true),
        post("draft", PostStatus::Draft, true),
    ]);
    let app = TestApp::new(content, RecordingMailingList::default(), false).await;

    let (status, body) = app.send(get("/posts")).await;

    assert_eq!(status, 200);
    let posts = body.as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["id"], "new");
    assert_eq!(posts[0]["date"], "2024-06-01");
    assert_eq!(posts[0]["status"], "Published");
    assert_eq!(posts[0]["newsletterEligible"], true);
    assert_eq!(posts[1]["id"], "old");
}

#[tokio::test]
async fn post_by_slug_returns_metadata_and_markdown() {
    let content = RecordingContent::with_items(vec![post("p1", PostStatus::Published, true)]);
    let app = TestApp::new(content, RecordingMailingList::default(), false).await;

    let (status, body) = app.send(get("/posts/p1-slug")).await;

    assert_eq!(status, 200);
    assert_eq!(body["metadata"]["title"], "Hello");
    assert_eq!(body["metadata"]["category"], "AI & Tech");
    assert!(body["markdown"].as_str().unwrap().starts_with("Hello **world**"));
    assert_eq!(app.content.renders().await, vec!["p1".to_string()]);
}

#[tokio::test]
async fn unknown_slug_is_404() {
    let app = TestApp::new(RecordingContent::default(), RecordingMailingList::default(), false).await;

    let (status, body) = app.send(get("/posts/missing")).await;

    assert_eq!(status, 404);
    assert_eq!(body["error"], "Post not found: missing");
}

#[tokio::test]
async fn subscribe_creates_subscription() {
    let app = TestApp::new(RecordingContent::default(), RecordingMailingList::default(), false).await;

    let (status, body) = app
        .send(json_post("/subscribe", r#"{"email":" reader@example.com "}"#))
        .await;

    assert_eq!(status, 201);
    assert_eq!(body["message"], "Successfully subscribed");
    assert_eq!(body["subscriptionId"], 99);
    assert_eq!(
        app.list.calls().await,
        vec!["subscribe:reader@example.com".to_string()]
    );
}

#[tokio::test]
async fn subscribe_requires_email() {
    let app = TestApp::new(RecordingContent::default(), RecordingMailingList::default(), false).await;

    for raw in [r#"{}"#, r#"{"email":""}"#, r#"{"email":"   "}"#] {
        let (status, body) = app.send(json_post("/subscribe", raw)).await;
        assert_eq!(status, 400, "payload {}", raw);
        assert_eq!(body["error"], "Email is required");
    }
    let (status, _) = app.send(json_post("/subscribe", "nope")).await;
    assert_eq!(status, 400);
    assert!(app.list.calls().await.is_empty());
}

#[tokio::test]
async fn subscribe_reports_missing_configuration() {
    let app = TestApp::new(RecordingContent::default(), RecordingMailingList::unconfigured(), false).await;

    let (status, body) = app
        .send(json_post("/subscribe", r#"{"email":"reader@example.com"}"#))
        .await;

    assert_eq!(status, 500);
    assert_eq!(body["error"], "Newsletter subscription is not configured");
}

#[tokio::test]
async fn unconfigured_convertkit_makes_no_outbound_call() {
    let server = MockServer::start().await;
    let cfg = Config::default();
    let base = Url::parse(&format!("{}/v3/", server.uri())).unwrap();
    let client = ConvertKitClient::with_base_url(&cfg, base).unwrap();
    let publisher = Publisher {
        content: Arc::new(RecordingContent::default()),
        mailing_list: Arc::new(client),
        pool: common::memory_pool().await,
        email: EmailSettings {
            site_url: "https://blog.test".into(),
            author: None,
        },
        webhook_secret: None,
        trust_unsigned_payloads: false,
    };
    let app = TestApp {
        router: router(AppState { publisher }),
        content: RecordingContent::default(),
        list: RecordingMailingList::default(),
        pool: common::memory_pool().await,
    };

    let (status, body) = app
        .send(json_post("/subscribe", r#"{"email":"reader@example.com"}"#))
        .await;

    assert_eq!(status, 500);
    assert_eq!(body["error"], "Newsletter subscription is not configured");
    assert!(server.received_requests().await.unwrap().is_empty());
}
