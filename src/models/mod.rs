mod message;
mod user;

pub use message::{ChatMessage, Role};
pub use user::{Identity, User};
