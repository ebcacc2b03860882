pub mod dto;
pub mod error;
pub mod handlers;
pub mod services;
pub mod state;

use crate::state::AppState;
use axum::Router;

pub use state::SessionStore;

pub fn router() -> Router<AppState> {
    handlers::routes()
}
