//! HTTP adapter over the limiter registry.

mod error;
mod handlers;
mod server;

pub use handlers::{router, AppState};
pub use server::HttpServer;
