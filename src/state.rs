use std::sync::Arc;

use time::UtcOffset;

use crate::config::AppConfig;
use crate::session::SessionStore;
use crate::sheets::{LogSink, SheetsLog};
use crate::vision::{OpenAiVision, VisionModel};

#[derive(Clone)]
pub struct AppState {
    pub model: Arc<dyn VisionModel>,
    pub log: Arc<dyn LogSink>,
    pub sessions: SessionStore,
    /// Offset log timestamps are written in.
    pub offset: UtcOffset,
}

impl AppState {
    pub fn init(offset: UtcOffset) -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;
        tracing::info!(
            model = %config.vision.model,
            max_tokens = config.vision.max_tokens,
            range = %config.sheets.range,
            ?offset,
            idle_ttl_secs = config.session.idle_ttl_secs,
            "clients configured"
        );

        let model = Arc::new(OpenAiVision::new(config.vision)) as Arc<dyn VisionModel>;
        let log = Arc::new(SheetsLog::new(config.sheets)) as Arc<dyn LogSink>;
        let state = Self {
            offset,
            ..Self::from_parts(model, log)
        };
        state
            .sessions
            .spawn_sweeper(config.session.idle_ttl(), config.session.sweep_every());
        Ok(state)
    }

    pub fn from_parts(model: Arc<dyn VisionModel>, log: Arc<dyn LogSink>) -> Self {
        Self {
            model,
            log,
            sessions: SessionStore::default(),
            offset: UtcOffset::UTC,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use fakes::{FakeModel, MemoryLog};
        Self::from_parts(
            Arc::new(FakeModel::replying("**Total Calories:** 400 calories")),
            Arc::new(MemoryLog::default()),
        )
    }
}
