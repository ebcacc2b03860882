use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct VisionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SheetsConfig {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub range: String,
    pub access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for this long are dropped.
    pub idle_ttl_secs: u64,
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl_secs.max(1))
    }

    pub fn sweep_every(&self) -> Duration {
        (self.idle_ttl() / 4).max(Duration::from_secs(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub vision: VisionConfig,
    pub sheets: SheetsConfig,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let vision = VisionConfig {
            api_key: required("OPENAI_API_KEY")?,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            model: std::env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4-turbo".into()),
            max_tokens: std::env::var("VISION_MAX_TOKENS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(500),
        };
        let sheets = SheetsConfig {
            base_url: std::env::var("SHEETS_BASE_URL")
                .unwrap_or_else(|_| "https://sheets.googleapis.com".into()),
            spreadsheet_id: required("SHEETS_SPREADSHEET_ID")?,
            range: std::env::var("SHEETS_RANGE").unwrap_or_else(|_| "Sheet1".into()),
            access_token: required("SHEETS_ACCESS_TOKEN")?,
        };
        let session = SessionConfig {
            idle_ttl_secs: std::env::var("SESSION_IDLE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(3600),
        };
        Ok(Self {
            vision,
            sheets,
            session,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).map_err(|_| anyhow::anyhow!("missing environment variable {key}"))
}
