//! HTTP API of the deployer

pub mod handlers;
pub mod state;

pub use handlers::{create_router, RouterOptions};
pub use state::AppState;
