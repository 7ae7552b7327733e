use std::sync::Arc;

use config::Config;
use database::ChatStore;
use llm::{LlmError, OllamaClient};

pub mod config;
pub mod database;
pub mod error;
pub mod llm;
pub mod middleware;
pub mod models;
pub mod router;
pub mod routes;
pub mod utils;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ChatStore>,
    pub config: Config,
    pub llm: OllamaClient,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn ChatStore>) -> Result<Self, LlmError> {
        let llm = OllamaClient::from_config(&config)?;
        Ok(Self { store, config, llm })
    }
}
