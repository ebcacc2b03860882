use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{format_description::FormatItem, macros::format_description, OffsetDateTime, UtcOffset};
use tracing::warn;

/// Placeholder written to the log for a nutrient the model did not report.
pub const MISSING: &str = "N/A";

const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Nutrition estimate for one analyzed photo. Any field may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionRecord {
    pub calories: Option<i64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
}

impl NutritionRecord {
    pub fn is_empty(&self) -> bool {
        self.calories.is_none() && self.protein.is_none() && self.carbs.is_none() && self.fat.is_none()
    }

    /// Human readable lines, "N/A" standing in for absent values.
    pub fn display_lines(&self) -> Vec<String> {
        vec![
            format!("Calories: {} kcal", show(self.calories)),
            format!("Protein: {} g", show(self.protein)),
            format!("Carbs: {} g", show(self.carbs)),
            format!("Fat: {} g", show(self.fat)),
        ]
    }
}

fn show<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map(|v| v.to_string()).unwrap_or_else(|| MISSING.into())
}

/// One appended row of the shared log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub identity: String,
    pub calories: Option<i64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
}

impl LogEntry {
    pub fn new(
        identity: &str,
        record: &NutritionRecord,
        at: OffsetDateTime,
    ) -> Result<Self, time::error::Format> {
        Ok(Self {
            timestamp: at.format(TIMESTAMP_FORMAT)?,
            identity: identity.to_owned(),
            calories: record.calories,
            protein: record.protein,
            carbs: record.carbs,
            fat: record.fat,
        })
    }

    /// Cells in log column order: timestamp, identity, calories, protein, carbs, fat.
    pub fn to_row(&self) -> Vec<Value> {
        vec![
            Value::from(self.timestamp.clone()),
            Value::from(self.identity.clone()),
            self.calories.map(Value::from).unwrap_or_else(|| MISSING.into()),
            cell(self.protein),
            cell(self.carbs),
            cell(self.fat),
        ]
    }
}

fn cell(v: Option<f64>) -> Value {
    v.map(Value::from).unwrap_or_else(|| MISSING.into())
}

/// The server's local offset, UTC if it can't be determined.
///
/// `time` refuses to read the offset once other threads exist, so this has to
/// run before the async runtime starts.
pub fn local_offset() -> UtcOffset {
    UtcOffset::current_local_offset().unwrap_or_else(|e| {
        warn!(error = %e, "local offset unavailable; log timestamps use UTC");
        UtcOffset::UTC
    })
}
