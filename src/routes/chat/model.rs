use serde::{Deserialize, Serialize};

use crate::models::ChatMessage;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub user: String,
    pub history: Vec<ChatMessage>,
}
