use time::OffsetDateTime;
use tracing::{info, warn};

use super::error::FlowError;
use super::state::{Phase, Session};
use crate::images::{self, ImageSource};
use crate::meals::LogEntry;
use crate::sheets::LogSink;
use crate::vision::{self, Analysis, VisionModel};

fn require_identity(s: &Session) -> Result<&str, FlowError> {
    s.identity.as_deref().ok_or(FlowError::MissingIdentity)
}

/// Set who this session logs for. Once set it can't change.
pub fn submit_identity(s: &mut Session, identity: &str) -> Result<(), FlowError> {
    let identity = identity.trim();
    if identity.is_empty() {
        return Err(FlowError::MissingIdentity);
    }
    match s.identity.as_deref() {
        Some(current) if current == identity => return Ok(()),
        Some(_) => return Err(FlowError::IdentityLocked),
        None => {}
    }
    s.identity = Some(identity.to_owned());
    s.phase = Phase::AwaitingImage;
    info!(identity, "identity set");
    Ok(())
}

/// Replace the session image. A previous analysis stays available but no longer
/// matches the image on screen.
pub fn submit_image(s: &mut Session, raw: &[u8], source: ImageSource) -> Result<(), FlowError> {
    require_identity(s)?;
    let asset = images::normalize(raw, source)?;
    s.image = Some(asset);
    s.phase = Phase::ImageReady;
    if s.last.is_some() {
        s.last_matches_image = false;
        warn!("new image supplied; previous analysis retained");
    }
    Ok(())
}

pub async fn run_analysis(s: &mut Session, model: &dyn VisionModel) -> Result<Analysis, FlowError> {
    require_identity(s)?;
    let image = s.image.as_ref().ok_or(FlowError::MissingImage)?;

    let result = {
        // also restores the phase if this future is dropped mid-call
        let _analyzing = PhaseGuard::enter(&mut s.phase, Phase::Analyzing);
        vision::analyze(model, image).await
    };

    let analysis = result.map_err(FlowError::Model)?;
    s.last = Some(analysis.clone());
    s.last_matches_image = true;
    s.phase = Phase::ResultReady;
    Ok(analysis)
}

/// Holds a transient phase and puts the previous one back on drop.
struct PhaseGuard<'a> {
    phase: &'a mut Phase,
    restore: Phase,
}

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a mut Phase, transient: Phase) -> Self {
        let restore = match *phase {
            Phase::Analyzing => Phase::ImageReady,
            other => other,
        };
        *phase = transient;
        Self { phase, restore }
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase = self.restore;
    }
}

/// Append one row for the last analysis. Every call writes a new row.
pub async fn push(s: &Session, log: &dyn LogSink, at: OffsetDateTime) -> Result<LogEntry, FlowError> {
    let identity = require_identity(s)?;
    let analysis = s.last.as_ref().ok_or(FlowError::MissingResult)?;

    let entry = LogEntry::new(identity, &analysis.record, at)
        .map_err(|e| FlowError::Log(anyhow::Error::new(e).context("format timestamp")))?;
    log.append_row(entry.to_row()).await.map_err(FlowError::Log)?;

    info!(identity, timestamp = %entry.timestamp, "analysis pushed to log");
    Ok(entry)
}
