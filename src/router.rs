use axum::{
    Router,
    routing::{get, post},
};
#[cfg(debug_assertions)]
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::{
    AppState,
    middleware::{log_errors, resolve_identity},
    routes,
};

// 无需身份的路由
fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/ping", get(routes::ping))
        .route("/register", post(routes::user::register))
        .route("/login", post(routes::user::login))
        .route("/logout", post(routes::user::logout))
        .route("/session", get(routes::user::create_session))
}

// 聊天路由，身份由中间件从 cookie 解析
fn chat_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route("/deepseek", post(routes::chat::chat))
        .route("/history", get(routes::chat::history))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            resolve_identity,
        ))
}

// 创建主路由，其余路径交给前端静态文件
pub fn create_router(state: AppState) -> Router {
    let static_files = ServeDir::new(&state.config.static_dir);

    let router = Router::new()
        .merge(public_routes())
        .merge(chat_routes(&state))
        .fallback_service(static_files)
        .layer(axum::middleware::from_fn(log_errors));

    // 根据编译模式决定是否添加CORS
    #[cfg(debug_assertions)]
    let router = {
        tracing::debug!("Adding CORS layer for development mode");
        router.layer(CorsLayer::permissive())
    };

    router.with_state(state)
}
