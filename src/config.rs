//! Configuration loader and validator for the newsletter relay.
//!
//! Values come from an optional YAML file and are then overridden by the
//! environment variables the blog deployment already sets (`NOTION_API_KEY`,
//! `CONVERTKIT_API_SECRET`, ...).
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub server: Server,
    pub http: Http,
    pub notion: Notion,
    pub convertkit: ConvertKit,
    pub site: Site,
    pub app: App,
}

/// Inbound HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Server {
    pub bind_addr: String,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".into(),
        }
    }
}

/// Outbound HTTP settings shared by the Notion and ConvertKit clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Http {
    pub timeout_secs: u64,
}

impl Default for Http {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

/// Notion API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Notion {
    pub token: String,
    pub version: String,
    pub database_id: String,
    pub webhook_secret: Option<String>,
    /// Accept `pipedream` relay and bare-id payloads without a signature.
    pub trust_unsigned_payloads: bool,
}

impl Default for Notion {
    fn default() -> Self {
        Self {
            token: String::new(),
            version: "2022-06-28".into(),
            database_id: String::new(),
            webhook_secret: None,
            trust_unsigned_payloads: false,
        }
    }
}

/// ConvertKit credentials. All optional at load time; the endpoints that
/// need them report a configuration error instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConvertKit {
    pub api_secret: Option<String>,
    pub api_key: Option<String>,
    pub form_id: Option<String>,
}

/// Public site settings used when building emails.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Site {
    pub url: String,
    pub author: Option<String>,
}

impl Default for Site {
    fn default() -> Self {
        Self {
            url: "https://yoursite.com".into(),
            author: None,
        }
    }
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct App {
    pub database_url: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/deliveries.db".into(),
        }
    }
}

impl Config {
    /// Overlay recognised environment variables on top of the file values.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("NOTION_API_KEY") {
            self.notion.token = v;
        }
        if let Some(v) = get("NOTION_DATABASE_ID") {
            self.notion.database_id = v;
        }
        if let Some(v) = get("NOTION_VERSION") {
            self.notion.version = v;
        }
        if let Some(v) = get("NOTION_WEBHOOK_SECRET") {
            self.notion.webhook_secret = Some(v);
        }
        if let Some(v) = get("NOTION_TRUST_UNSIGNED") {
            self.notion.trust_unsigned_payloads = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("CONVERTKIT_API_SECRET") {
            self.convertkit.api_secret = Some(v);
        }
        if let Some(v) = get("CONVERTKIT_API_KEY") {
            self.convertkit.api_key = Some(v);
        }
        if let Some(v) = get("CONVERTKIT_FORM_ID") {
            self.convertkit.form_id = Some(v);
        }
        if let Some(v) = get("NEXT_PUBLIC_SITE_URL") {
            self.site.url = v;
        }
        if let Some(v) = get("SITE_AUTHOR") {
            self.site.author = Some(v);
        }
        if let Some(v) = get("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        if let Some(v) = get("DATABASE_URL") {
            self.app.database_url = v;
        }
    }

    /// Site URL without a trailing slash.
    pub fn site_url(&self) -> &str {
        self.site.url.trim_end_matches('/')
    }
}

/// Load configuration from an optional YAML file plus the process
/// environment, then validate it.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut cfg = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => Config::default(),
    };
    cfg.apply_env(|key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.token (NOTION_API_KEY) must be non-empty"));
    }
    if cfg.notion.database_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "notion.database_id (NOTION_DATABASE_ID) must be non-empty",
        ));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(ConfigError::Invalid("http.timeout_secs must be > 0"));
    }
    if cfg.server.bind_addr.trim().is_empty() {
        return Err(ConfigError::Invalid("server.bind_addr must be non-empty"));
    }
    if cfg.app.database_url.trim().is_empty() {
        return Err(ConfigError::Invalid("app.database_url must be non-empty"));
    }
    Ok(())
}

/// Example YAML configuration.
pub fn example() -> &'static str {
    r#"server:
  bind_addr: "0.0.0.0:3000"

http:
  timeout_secs: 10

notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"
  database_id: "NOTION_BLOG_DATABASE_ID"
  webhook_secret: "NOTION_WEBHOOK_SECRET"
  trust_unsigned_payloads: false

convertkit:
  api_secret: "CONVERTKIT_API_SECRET"
  api_key: "CONVERTKIT_API_KEY"
  form_id: "1234567"

site:
  url: "https://example.com"
  author: "Site Author"

app:
  database_url: "sqlite://./data/deliveries.db"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert!(!cfg.notion.trust_unsigned_payloads);
        assert_eq!(cfg.convertkit.form_id.as_deref(), Some("1234567"));
    }

    #[test]
    fn missing_notion_token_is_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notion.token = "  ".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("NOTION_API_KEY")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn missing_database_id_is_rejected() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.notion.database_id = "".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("NOTION_DATABASE_ID")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn defaults_fail_validation_without_env() {
        let cfg = Config::default();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        let vars = env(&[
            ("NOTION_API_KEY", "secret_abc"),
            ("NOTION_DATABASE_ID", "db-1"),
            ("NOTION_WEBHOOK_SECRET", "whsec"),
            ("NOTION_TRUST_UNSIGNED", "true"),
            ("CONVERTKIT_FORM_ID", "42"),
            ("NEXT_PUBLIC_SITE_URL", "https://blog.test/"),
            ("CONVERTKIT_API_KEY", "   "),
        ]);
        cfg.apply_env(|k| vars.get(k).cloned());

        assert_eq!(cfg.notion.token, "secret_abc");
        assert_eq!(cfg.notion.database_id, "db-1");
        assert_eq!(cfg.notion.webhook_secret.as_deref(), Some("whsec"));
        assert!(cfg.notion.trust_unsigned_payloads);
        assert_eq!(cfg.convertkit.form_id.as_deref(), Some("42"));
        // blank values do not clobber the file
        assert_eq!(cfg.convertkit.api_key.as_deref(), Some("CONVERTKIT_API_KEY"));
        assert_eq!(cfg.site_url(), "https://blog.test");
    }

    #[test]
    fn env_alone_is_enough() {
        let mut cfg = Config::default();
        let vars = env(&[("NOTION_API_KEY", "k"), ("NOTION_DATABASE_ID", "d")]);
        cfg.apply_env(|k| vars.get(k).cloned());
        validate(&cfg).unwrap();
        assert_eq!(cfg.http.timeout_secs, 10);
        assert_eq!(cfg.notion.version, "2022-06-28");
        assert!(cfg.convertkit.api_secret.is_none());
    }

    #[test]
    fn partial_yaml_uses_defaults() {
        let cfg: Config = serde_yaml::from_str("notion:\n  token: t\n  database_id: d\n").unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.server.bind_addr, "0.0.0.0:3000");
        assert_eq!(cfg.site.url, "https://yoursite.com");
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert!(!cfg.notion.token.is_empty());
    }
}
