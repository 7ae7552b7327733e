pub mod chat;
pub mod user;

mod ping;

pub use ping::ping;
