mod handler;
mod model;

pub use handler::{create_session, login, logout, register};
