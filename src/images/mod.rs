pub mod services;

pub use services::{normalize, ImageAsset, ImageError, ImageSource};
