use crate::domain_reputation::DEFAULT_FREE_MAIL_PROVIDERS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PROMPT: &str = "Identify the organisation this email claims to come from, \
summarise the email, state whether it asks the reader to take an action and what that action \
is, and judge whether the email is realistic for that organisation. An email is not realistic \
if it makes ludicrous offers, threatens the reader, or demands payment or credentials in an \
unusual way.";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub url_scan: UrlScanConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorpusConfig {
    pub database_path: String,
    pub free_mail_providers: Vec<String>,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            database_path: "data/wikidata_websites.db".to_string(),
            free_mail_providers: DEFAULT_FREE_MAIL_PROVIDERS
                .iter()
                .map(|d| d.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Deadline shared by every task of one request.
    pub request_timeout_secs: u64,
    pub redirect_timeout_secs: u64,
    pub max_redirects: u8,
    pub poll_interval_secs: u64,
    /// Cap on the bytes sent to the content judge in one call.
    pub judge_payload_limit_bytes: usize,
    pub max_urls: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 180,
            redirect_timeout_secs: 10,
            max_redirects: 10,
            poll_interval_secs: 5,
            judge_payload_limit_bytes: 20 << 20,
            max_urls: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlScanConfig {
    pub enabled: bool,
    pub api_base: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub visibility: String,
    pub recent_window_days: i64,
}

impl Default for UrlScanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: "https://urlscan.io/api/v1".to_string(),
            api_key: String::new(),
            visibility: "unlisted".to_string(),
            recent_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub api_base: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub prompt: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.0-flash-lite".to_string(),
            api_key: String::new(),
            prompt: DEFAULT_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub browser_command: String,
    pub window_width: u32,
    pub window_height: u32,
    pub ocr_command: String,
    pub timeout_secs: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            browser_command: "chromium".to_string(),
            window_width: 1280,
            window_height: 1024,
            ocr_command: "tesseract".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub api_base: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cx: String,
    /// Region used for phone number parsing and search localisation.
    pub country: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            api_base: "https://www.googleapis.com/customsearch/v1".to_string(),
            api_key: String::new(),
            cx: String::new(),
            country: "gb".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        self.level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Loads the file if it exists, otherwise falls back to defaults.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            log::warn!("Configuration file {path} not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Layers secrets from the process environment over the file values.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str, target: &mut String| {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *target = value;
            }
        };
        set("GEMINI_API_KEY", &mut self.content.api_key);
        set("MAIN_PROMPT", &mut self.content.prompt);
        set("URLSCAN_API_KEY", &mut self.url_scan.api_key);
        set("GOOGLE_SEARCH_API_KEY", &mut self.search.api_key);
        set("GOOGLE_SEARCH_CX", &mut self.search.cx);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.request_timeout_secs)
    }

    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_secs(self.limits.redirect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.limits.poll_interval_secs)
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_secs(self.render.timeout_secs)
    }
}
