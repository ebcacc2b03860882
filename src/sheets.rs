use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error};

use crate::config::SheetsConfig;

/// Append-only target for log rows. Nothing here ever reads the log back.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn append_row(&self, row: Vec<Value>) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct AppendBody {
    values: Vec<Vec<Value>>,
}

/// Google Sheets `values:append` against one spreadsheet range.
#[derive(Clone)]
pub struct SheetsLog {
    http: Client,
    cfg: SheetsConfig,
}

impl SheetsLog {
    pub fn new(cfg: SheetsConfig) -> Self {
        Self {
            http: Client::new(),
            cfg,
        }
    }

    fn append_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}/values/{}:append",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.spreadsheet_id,
            self.cfg.range
        )
    }
}

#[async_trait]
impl LogSink for SheetsLog {
    async fn append_row(&self, row: Vec<Value>) -> anyhow::Result<()> {
        let body = AppendBody { values: vec![row] };
        let resp = self
            .http
            .post(self.append_url())
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(&self.cfg.access_token)
            .json(&body)
            .send()
            .await
            .context("sheets append")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            error!(%status, body = %text, "sheets append rejected");
            anyhow::bail!("sheets append returned {status}");
        }
        debug!(range = %self.cfg.range, "row appended");
        Ok(())
    }
}
