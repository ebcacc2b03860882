pub mod dto;
pub mod extract;

pub use dto::{local_offset, LogEntry, NutritionRecord};
