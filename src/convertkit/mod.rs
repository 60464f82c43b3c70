use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::convertkit::model::{BroadcastResp, SubscribeResp, Tag, TagsResp};
use crate::error::ClientError;

pub mod model;

const CONVERTKIT_API_BASE: &str = "https://api.convertkit.com/v3/";

/// Mailing-list provider operations used for broadcasts and sign-ups.
#[async_trait]
pub trait MailingList: Send + Sync {
    async fn create_broadcast(
        &self,
        subject: &str,
        content: &str,
        description: &str,
    ) -> Result<u64, ClientError>;

    /// Tag whose name matches `name` case-insensitively.
    async fn find_tag(&self, name: &str) -> Result<Option<Tag>, ClientError>;

    async fn set_recipients(&self, broadcast_id: u64, tag_ids: &[u64]) -> Result<(), ClientError>;

    async fn send_broadcast(&self, broadcast_id: u64) -> Result<(), ClientError>;

    async fn subscribe(&self, email: &str) -> Result<u64, ClientError>;
}

#[derive(Clone)]
pub struct ConvertKitClient {
    http: Client,
    base_url: Url,
    api_secret: Option<String>,
    api_key: Option<String>,
    form_id: Option<String>,
}

impl fmt::Debug for ConvertKitClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvertKitClient")
            .field("base_url", &self.base_url)
            .field("form_id", &self.form_id)
            .finish_non_exhaustive()
    }
}

impl ConvertKitClient {
    pub fn from_config(cfg: &Config) -> Result<Self, ClientError> {
        let base_url = Url::parse(CONVERTKIT_API_BASE).expect("valid default ConvertKit URL");
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
            api_secret: cfg.convertkit.api_secret.clone(),
            api_key: cfg.convertkit.api_key.clone(),
            form_id: cfg.convertkit.form_id.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path)
            .map_err(|e| ClientError::Upstream(format!("invalid ConvertKit URL {}: {}", path, e)))
    }

    fn secret(&self) -> Result<&str, ClientError> {
        self.api_secret
            .as_deref()
            .ok_or(ClientError::NotConfigured("CONVERTKIT_API_SECRET is not set"))
    }

    pub fn build_create_broadcast_request(
        &self,
        subject: &str,
        content: &str,
        description: &str,
    ) -> Result<reqwest::Request, ClientError> {
        let body = json!({
            "api_secret": self.secret()?,
            "subject": subject,
            "content": content,
            "description": description,
        });
        Ok(self.http.post(self.endpoint("broadcasts")?).json(&body).build()?)
    }

    async fn read<T: DeserializeOwned>(res: Response, what: &str) -> Result<T, ClientError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, %body, "ConvertKit API error");
            return Err(ClientError::Upstream(format!(
                "convertkit {} failed {}: {}",
                what, status, body
            )));
        }
        res.json::<T>()
            .await
            .map_err(|e| ClientError::Upstream(format!("invalid ConvertKit response for {}: {}", what, e)))
    }

    async fn expect_success(res: Response, what: &str) -> Result<(), ClientError> {
        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let body = res.text().await.unwrap_or_default();
        warn!(%status, %body, "ConvertKit API error");
        Err(ClientError::Upstream(format!(
            "convertkit {} failed {}: {}",
            what, status, body
        )))
    }
}

#[async_trait]
impl MailingList for ConvertKitClient {
    async fn create_broadcast(
        &self,
        subject: &str,
        content: &str,
        description: &str,
    ) -> Result<u64, ClientError> {
        let request = self.build_create_broadcast_request(subject, content, description)?;
        debug!(url = %request.url(), %subject, "creating broadcast");
        let res = self.http.execute(request).await?;
        let payload: BroadcastResp = Self::read(res, "create broadcast").await?;
        Ok(payload.broadcast.id)
    }

    async fn find_tag(&self, name: &str) -> Result<Option<Tag>, ClientError> {
        let mut url = self.endpoint("tags")?;
        url.query_pairs_mut().append_pair("api_secret", self.secret()?);
        let res = self.http.get(url).send().await?;
        let payload: TagsResp = Self::read(res, "list tags").await?;
        Ok(payload
            .tags
            .into_iter()
            .find(|t| t.name.eq_ignore_ascii_case(name)))
    }

    async fn set_recipients(&self, broadcast_id: u64, tag_ids: &[u64]) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("broadcasts/{}/recipients", broadcast_id))?;
        let body = json!({ "api_secret": self.secret()?, "tag_ids": tag_ids });
        let res = self.http.put(url).json(&body).send().await?;
        Self::expect_success(res, "set recipients").await
    }

    async fn send_broadcast(&self, broadcast_id: u64) -> Result<(), ClientError> {
        let url = self.endpoint(&format!("broadcasts/{}/send", broadcast_id))?;
        let body = json!({ "api_secret": self.secret()? });
        let res = self.http.post(url).json(&body).send().await?;
        Self::expect_success(res, "send broadcast").await
    }

    async fn subscribe(&self, email: &str) -> Result<u64, ClientError> {
        let form_id = self
            .form_id
            .as_deref()
            .ok_or(ClientError::NotConfigured("CONVERTKIT_FORM_ID is not set"))?;
        let key = self
            .api_key
            .as_deref()
            .or(self.api_secret.as_deref())
            .ok_or(ClientError::NotConfigured(
                "CONVERTKIT_API_KEY or CONVERTKIT_API_SECRET is not set",
            ))?;
        let url = self.endpoint(&format!("forms/{}/subscribe", form_id))?;
        let res = self
            .http
            .post(url)
            .json(&json!({ "api_key": key, "email": email }))
            .send()
            .await?;
        let payload: SubscribeResp = Self::read(res, "subscribe").await?;
        Ok(payload.subscription.id)
    }
}
