use axum::{Extension, Json, extract::State};
use axum_extra::extract::WithRejection;

use crate::{
    AppState,
    error::AppError,
    llm::strip_think,
    middleware::require_identity,
    models::Identity,
};

use super::model::{ChatRequest, ChatResponse, HistoryResponse};

/// 转发提示词到模型，成功后写入一轮对话
///
/// 空提示词无论是否登录都返回 400；模型调用失败时不写任何记录。
#[axum::debug_handler]
pub async fn chat(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
    WithRejection(Json(req), _): WithRejection<Json<ChatRequest>, AppError>,
) -> Result<Json<ChatResponse>, AppError> {
    if req.prompt.trim().is_empty() {
        return Err(AppError::Validation("提示词不能为空".to_string()));
    }
    let identity = require_identity(identity)?;

    tracing::debug!(
        "Forwarding prompt from {} to model {}",
        identity.username,
        state.llm.model()
    );
    let raw = state.llm.generate(&req.prompt).await?;
    let response = strip_think(&raw);

    state
        .store
        .append_exchange(identity.user_id, &req.prompt, &response)
        .await?;

    Ok(Json(ChatResponse { response }))
}

#[axum::debug_handler]
pub async fn history(
    State(state): State<AppState>,
    identity: Option<Extension<Identity>>,
) -> Result<Json<HistoryResponse>, AppError> {
    let identity = require_identity(identity)?;
    let history = state.store.list(identity.user_id).await?;

    Ok(Json(HistoryResponse {
        user: identity.username,
        history,
    }))
}
