mod auth;
mod health;

pub use auth::{me, refresh_token};
pub use health::{health_check, readiness_check};
