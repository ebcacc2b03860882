use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::{Phase, Session};
use crate::images::{ImageAsset, ImageSource};
use crate::meals::NutritionRecord;
use crate::vision::Analysis;

#[derive(Debug, Deserialize)]
pub struct IdentityRequest {
    pub identity: String,
}

/// POST body for `/image/base64`.
#[derive(Debug, Deserialize)]
pub struct ImageBase64Request {
    pub image_b64: String,
    #[serde(default)]
    pub source: ImageSource,
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub source: ImageSource,
    pub width: u32,
    pub height: u32,
    pub jpeg_bytes: usize,
}

impl From<&ImageAsset> for ImageSummary {
    fn from(a: &ImageAsset) -> Self {
        Self {
            source: a.source,
            width: a.width,
            height: a.height,
            jpeg_bytes: a.jpeg.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResultView {
    pub record: NutritionRecord,
    pub summary: Vec<String>,
    /// false when a newer image replaced the one this result was computed from
    pub matches_image: bool,
}

/// What the user currently sees for a session.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub identity: Option<String>,
    pub phase: Phase,
    pub image: Option<ImageSummary>,
    pub result: Option<ResultView>,
}

impl SessionView {
    pub fn new(id: Uuid, s: &Session) -> Self {
        Self {
            id,
            identity: s.identity().map(str::to_owned),
            phase: s.phase(),
            image: s.image().map(ImageSummary::from),
            result: s.last_analysis().map(|a| ResultView {
                record: a.record,
                summary: a.record.display_lines(),
                matches_image: s.last_matches_image(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub record: NutritionRecord,
    pub summary: Vec<String>,
    pub raw_text: String,
}

impl From<Analysis> for AnalyzeResponse {
    fn from(a: Analysis) -> Self {
        Self {
            summary: a.record.display_lines(),
            record: a.record,
            raw_text: a.raw_text,
        }
    }
}
