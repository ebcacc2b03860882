pub mod client;
pub mod services;

pub use client::{OpenAiVision, VisionModel};
pub use services::{analyze, Analysis};
