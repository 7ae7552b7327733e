mod auth;
mod error_handler;

pub use auth::{identify, require_identity, resolve_identity};
pub use error_handler::log_errors;
