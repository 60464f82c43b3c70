use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::error::ClientError;
use crate::markdown;
use crate::model::{
    ContentItem, PostStatus, DEFAULT_CATEGORY, DEFAULT_DESCRIPTION, DEFAULT_TITLE,
};
use crate::notion::model::{Block, ListResp, Page, RetrieveDatabaseResp};

pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";
/// Nested blocks deeper than this are not fetched.
const MAX_BLOCK_DEPTH: usize = 3;

/// Read access to blog posts stored in the content database.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn fetch_by_id(&self, id: &str) -> Result<ContentItem, ClientError>;

    async fn fetch_by_slug(&self, slug: &str) -> Result<ContentItem, ClientError>;

    /// Published posts, newest first.
    async fn list_published(&self) -> Result<Vec<ContentItem>, ClientError>;

    /// Body of the post rendered as Markdown.
    async fn render_markdown(&self, id: &str) -> Result<String, ClientError>;
}

/// Property type of the `Status` column; query filters are keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Select,
    Status,
}

impl StatusKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusKind::Select => "select",
            StatusKind::Status => "status",
        }
    }

    /// Anything other than a native `status` property is filtered as `select`.
    pub fn from_property_type(typ: &str) -> Self {
        if typ == "status" {
            StatusKind::Status
        } else {
            StatusKind::Select
        }
    }
}

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
    database_id: String,
    status_kind: Arc<OnceCell<StatusKind>>,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .field("database_id", &self.database_id)
            .finish_non_exhaustive()
    }
}

impl NotionClient {
    pub fn from_config(cfg: &Config) -> Result<Self, ClientError> {
        let base_url = Url::parse(NOTION_API_BASE).expect("valid default Notion URL");
        Self::with_base_url(cfg, base_url)
    }

    pub fn with_base_url(cfg: &Config, base_url: Url) -> Result<Self, ClientError> {
        let http = Client::builder()
            .user_agent(concat!("notion-newsletter/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(cfg.http.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url,
            token: cfg.notion.token.clone(),
            version: cfg.notion.version.clone(),
            database_id: cfg.notion.database_id.clone(),
            status_kind: Arc::new(OnceCell::new()),
        })
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Upstream(format!("invalid Notion URL {}: {}", path, e)))
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version)
    }

    pub fn build_query_request(&self, body: &Value) -> Result<reqwest::Request, ClientError> {
        let endpoint = self.endpoint(&format!("v1/databases/{}/query", self.database_id))?;
        Ok(self
            .authorize(self.http.post(endpoint))
            .header("Content-Type", "application/json")
            .json(body)
            .build()?)
    }

    async fn read_json<T: DeserializeOwned>(res: Response, what: &str) -> Result<T, ClientError> {
        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            let body = res.text().await.unwrap_or_default();
            return Err(ClientError::NotFound(format!("{}: {}", what, body)));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by Notion: {}", body);
            return Err(ClientError::Upstream(format!("received 429 from Notion: {}", body)));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "Notion API error");
            return Err(ClientError::Upstream(format!("notion error {}: {}", status, body)));
        }
        res.json::<T>()
            .await
            .map_err(|e| ClientError::Upstream(format!("invalid Notion response for {}: {}", what, e)))
    }

    #[instrument(skip(self))]
    pub async fn retrieve_page(&self, page_id: &str) -> Result<Page, ClientError> {
        let url = self.endpoint(&format!("v1/pages/{}", page_id))?;
        let res = self.authorize(self.http.get(url)).send().await?;
        Self::read_json(res, &format!("page {}", page_id)).await
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<RetrieveDatabaseResp, ClientError> {
        let url = self.endpoint(&format!("v1/databases/{}", database_id))?;
        let res = self.authorize(self.http.get(url)).send().await?;
        Self::read_json(res, &format!("database {}", database_id)).await
    }

    /// Type of the content database's `Status` property, read once from the
    /// schema. A failed lookup is not cached.
    pub async fn status_kind(&self) -> Result<StatusKind, ClientError> {
        self.status_kind
            .get_or_try_init(|| async {
                let db = self.retrieve_database(&self.database_id).await?;
                let kind = db
                    .properties
                    .get("Status")
                    .map(|p| StatusKind::from_property_type(&p.typ))
                    .unwrap_or(StatusKind::Select);
                info!(database_id = %self.database_id, kind = kind.as_str(), "resolved Status property type");
                Ok::<_, ClientError>(kind)
            })
            .await
            .copied()
    }

    /// Run a database query, following `next_cursor` until exhausted or
    /// `limit` pages have been collected.
    pub async fn query_database(&self, mut body: Value, limit: Option<usize>) -> Result<Vec<Page>, ClientError> {
        let mut pages = Vec::new();
        loop {
            let request = self.build_query_request(&body)?;
            debug!(url = %request.url(), payload = %body, "querying notion database");
            let res = self.http.execute(request).await?;
            let chunk: ListResp<Page> = Self::read_json(res, "database query").await?;
            pages.extend(chunk.results);
            if limit.is_some_and(|n| pages.len() >= n) {
                break;
            }
            match chunk.next_cursor {
                Some(cursor) if chunk.has_more => body["start_cursor"] = json!(cursor),
                _ => break,
            }
        }
        if let Some(n) = limit {
            pages.truncate(n);
        }
        Ok(pages)
    }

    /// All direct children of a block (or page), paginated.
    pub async fn list_block_children(&self, block_id: &str) -> Result<Vec<Block>, ClientError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut url = self.endpoint(&format!("v1/blocks/{}/children", block_id))?;
            url.query_pairs_mut().append_pair("page_size", "100");
            if let Some(c) = &cursor {
                url.query_pairs_mut().append_pair("start_cursor", c);
            }
            let res = self.authorize(self.http.get(url)).send().await?;
            let chunk: ListResp<Block> =
                Self::read_json(res, &format!("children of {}", block_id)).await?;
            blocks.extend(chunk.results);
            match chunk.next_cursor {
                Some(c) if chunk.has_more => cursor = Some(c),
                _ => break,
            }
        }
        Ok(blocks)
    }

    /// Block tree of a page, with children fetched down to `MAX_BLOCK_DEPTH`.
    pub async fn fetch_block_tree(&self, page_id: &str) -> Result<Vec<Block>, ClientError> {
        let mut roots = self.list_block_children(page_id).await?;
        // Iterative walk: (path of indices from the root, depth).
        let mut stack: Vec<(Vec<usize>, usize)> = roots
            .iter()
            .enumerate()
            .filter(|(_, b)| b.has_children)
            .map(|(i, _)| (vec![i], 1))
            .collect();
        while let Some((path, depth)) = stack.pop() {
            let id = block_at_mut(&mut roots, &path).id.clone();
            let children = self.list_block_children(&id).await?;
            if depth < MAX_BLOCK_DEPTH {
                for (i, child) in children.iter().enumerate() {
                    if child.has_children {
                        let mut child_path = path.clone();
                        child_path.push(i);
                        stack.push((child_path, depth + 1));
                    }
                }
            }
            block_at_mut(&mut roots, &path).children = children;
        }
        Ok(roots)
    }
}

fn block_at_mut<'a>(roots: &'a mut [Block], path: &[usize]) -> &'a mut Block {
    let (first, rest) = path.split_first().expect("non-empty block path");
    rest.iter()
        .fold(&mut roots[*first], |node, &i| &mut node.children[i])
}

pub fn slug_filter(slug: &str) -> Value {
    json!({
        "filter": { "property": "Slug", "rich_text": { "equals": slug } },
        "page_size": 1,
    })
}

pub fn published_filter(kind: StatusKind) -> Value {
    json!({
        "filter": { "property": "Status", (kind.as_str()): { "equals": "Published" } },
        "sorts": [ { "property": "Date", "direction": "descending" } ],
        "page_size": 100,
    })
}

/// Map a Notion page onto a `ContentItem`, applying the field defaults.
pub fn content_item_from_page(page: &Page, today: NaiveDate) -> ContentItem {
    let prop = |name: &str| page.properties.get(name);
    let text = |name: &str| prop(name).and_then(|p| p.plain_text());

    let date = prop("Date")
        .and_then(|p| p.date_start())
        .and_then(|s| s.get(..10))
        .and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok())
        .unwrap_or(today);

    ContentItem {
        id: page.id.clone(),
        title: text("Title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        date,
        category: prop("Category")
            .and_then(|p| p.option_name())
            .unwrap_or_else(|| DEFAULT_CATEGORY.to_string()),
        slug: text("Slug").unwrap_or_else(|| page.id.clone()),
        description: text("Description").unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
        status: prop("Status")
            .and_then(|p| p.option_name())
            .map(PostStatus::from)
            .unwrap_or(PostStatus::Draft),
        newsletter_eligible: prop("SendAsNewsletter")
            .and_then(|p| p.checkbox())
            .unwrap_or(false),
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

#[async_trait]
impl ContentStore for NotionClient {
    async fn fetch_by_id(&self, id: &str) -> Result<ContentItem, ClientError> {
        let page = self.retrieve_page(id).await?;
        Ok(content_item_from_page(&page, today()))
    }

    async fn fetch_by_slug(&self, slug: &str) -> Result<ContentItem, ClientError> {
        let pages = self.query_database(slug_filter(slug), Some(1)).await?;
        let page = pages
            .first()
            .ok_or_else(|| ClientError::NotFound(format!("post with slug {}", slug)))?;
        Ok(content_item_from_page(page, today()))
    }

    async fn list_published(&self) -> Result<Vec<ContentItem>, ClientError> {
        let kind = self.status_kind().await?;
        let pages = self.query_database(published_filter(kind), None).await?;
        let today = today();
        Ok(pages
            .iter()
            .map(|p| content_item_from_page(p, today))
            .collect())
    }

    async fn render_markdown(&self, id: &str) -> Result<String, ClientError> {
        let blocks = self.fetch_block_tree(id).await?;
        Ok(markdown::blocks_to_markdown(&blocks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn sample_config() -> Config {
        let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
        cfg.notion.token = "token".into();
        cfg.notion.database_id = "db-1".into();
        cfg
    }

    fn page(value: Value) -> Page {
        serde_json::from_value(value).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn full_page_maps_all_fields() {
        let p = page(json!({
            "id": "abc123",
            "properties": {
                "Title": { "type": "title", "title": [{ "plain_text": "Hello" }] },
                "Date": { "type": "date", "date": { "start": "2024-03-09T10:00:00.000+00:00" } },
                "Category": { "type": "select", "select": { "name": "AI & Tech" } },
                "Slug": { "type": "rich_text", "rich_text": [{ "plain_text": "hello-world" }] },
                "Description": { "type": "rich_text", "rich_text": [{ "plain_text": "An intro" }] },
                "Status": { "type": "select", "select": { "name": "Published" } },
                "SendAsNewsletter": { "type": "checkbox", "checkbox": true }
            }
        }));
        let item = content_item_from_page(&p, day(2000, 1, 1));
        assert_eq!(item.id, "abc123");
        assert_eq!(item.title, "Hello");
        assert_eq!(item.date, day(2024, 3, 9));
        assert_eq!(item.category, "AI & Tech");
        assert_eq!(item.slug, "hello-world");
        assert_eq!(item.description, "An intro");
        assert_eq!(item.status, PostStatus::Published);
        assert!(item.wants_newsletter());
    }

    #[test]
    fn empty_page_gets_defaults() {
        let p = page(json!({
            "id": "p-9",
            "properties": {
                "Title": { "type": "title", "title": [] },
                "Date": { "type": "date", "date": null },
                "Slug": { "type": "rich_text", "rich_text": [{ "plain_text": "  " }] }
            }
        }));
        let today = day(2025, 1, 2);
        let item = content_item_from_page(&p, today);
        assert_eq!(item.title, "Untitled");
        assert_eq!(item.date, today);
        assert_eq!(item.category, "Uncategorized");
        assert_eq!(item.slug, "p-9");
        assert_eq!(item.description, "No description available.");
        assert_eq!(item.status, PostStatus::Draft);
        assert!(!item.newsletter_eligible);
    }

    #[test]
    fn unknown_status_is_not_published() {
        let p = page(json!({
            "id": "p",
            "properties": { "Status": { "type": "status", "status": { "name": "In review" } } }
        }));
        let item = content_item_from_page(&p, day(2025, 1, 1));
        assert_eq!(item.status, PostStatus::Other("In review".into()));
        assert!(!item.status.is_published());
    }

    #[test]
    fn query_request_sets_headers() {
        let client = NotionClient::from_config(&sample_config()).unwrap();
        let request = client
            .build_query_request(&published_filter(StatusKind::Select))
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::POST);
        assert_eq!(request.url().path(), "/v1/databases/db-1/query");
        let headers = request.headers();
        assert_eq!(
            headers.get("Authorization").and_then(|h| h.to_str().ok()).unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers.get("Notion-Version").and_then(|h| h.to_str().ok()).unwrap(),
            "2022-06-28"
        );
        assert_eq!(
            headers.get("Content-Type").and_then(|h| h.to_str().ok()).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn filters_target_expected_properties() {
        let f = slug_filter("my-post");
        assert_eq!(f["filter"]["property"], "Slug");
        assert_eq!(f["filter"]["rich_text"]["equals"], "my-post");
        let f = published_filter(StatusKind::Select);
        assert_eq!(f["filter"]["select"]["equals"], "Published");
        assert_eq!(f["sorts"][0]["direction"], "descending");
        let f = published_filter(StatusKind::Status);
        assert_eq!(f["filter"]["status"]["equals"], "Published");
        assert!(f["filter"].get("select").is_none());
    }

    #[test]
    fn status_kind_follows_property_type() {
        assert_eq!(StatusKind::from_property_type("status"), StatusKind::Status);
        assert_eq!(StatusKind::from_property_type("select"), StatusKind::Select);
        assert_eq!(StatusKind::from_property_type("rich_text"), StatusKind::Select);
    }
}
