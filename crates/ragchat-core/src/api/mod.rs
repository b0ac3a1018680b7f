pub mod auth;
pub mod chat;
pub mod client;
pub mod error;

pub use client::ApiClient;
pub use error::{ApiError, ApiResult};
