#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use axum::{Json, Router, routing::post};
use deepseek_chat::{AppState, config::Config, database::FileStore, router::create_router};
use reqwest::header::{COOKIE, SET_COOKIE};
use serde_json::{Value, json};
use tempfile::TempDir;

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub data_dir: PathBuf,
    _dir: TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn post_json(&self, path: &str, body: Value, cookie: Option<&str>) -> reqwest::Response {
        let mut req = self.client.post(self.url(path)).json(&body);
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }
        req.send().await.expect("Failed to execute request.")
    }

    pub async fn get(&self, path: &str, cookie: Option<&str>) -> reqwest::Response {
        let mut req = self.client.get(self.url(path));
        if let Some(cookie) = cookie {
            req = req.header(COOKIE, cookie);
        }
        req.send().await.expect("Failed to execute request.")
    }

    pub async fn register(&self, username: &str, password: &str) -> reqwest::Response {
        self.post_json(
            "/register",
            json!({ "username": username, "password": password }),
            None,
        )
        .await
    }

    /// 注册并登录，返回可直接放入 Cookie 头的 `user=<name>`
    pub async fn login_as(&self, username: &str) -> String {
        let resp = self.register(username, "pa55word").await;
        assert_eq!(resp.status(), 200);

        let resp = self
            .post_json(
                "/login",
                json!({ "username": username, "password": "pa55word" }),
                None,
            )
            .await;
        assert_eq!(resp.status(), 200);
        cookie_pair(&resp, "user").expect("login sets the user cookie")
    }
}

/// 从 Set-Cookie 中取出 `name=value`
pub fn cookie_pair(resp: &reqwest::Response, name: &str) -> Option<String> {
    set_cookie(resp, name).map(|raw| raw.split(';').next().unwrap_or_default().trim().to_string())
}

/// 完整的 Set-Cookie 值
pub fn set_cookie(resp: &reqwest::Response, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    resp.headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with(&prefix))
        .map(str::to_string)
}

/// 模拟 Ollama：回复中带思考过程，`think-test` 返回固定文本
pub async fn spawn_model() -> String {
    let router = Router::new().route(
        "/api/generate",
        post(|Json(body): Json<Value>| async move {
            let prompt = body["prompt"].as_str().unwrap_or_default().to_string();
            assert_eq!(body["stream"], false);
            let response = if prompt == "think-test" {
                "<think>internal</think>Visible answer".to_string()
            } else {
                format!("<think>\nreasoning about {}\n</think>\n\n  Answer to: {}  ", prompt, prompt)
            };
            Json(json!({ "model": body["model"], "response": response, "done": true }))
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// 一个没有服务监听的地址
pub async fn dead_model() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

pub async fn spawn_app(ollama_url: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let ollama_url = ollama_url.to_string();

    let config = Config::from_source(|key| match key {
        "STORAGE_BACKEND" => Some("file".into()),
        "DATA_DIR" => Some(data_dir.display().to_string()),
        "OLLAMA_URL" => Some(ollama_url.clone()),
        "MODEL_TIMEOUT_SECS" => Some("5".into()),
        "BCRYPT_COST" => Some("4".into()),
        _ => None,
    })
    .expect("valid test configuration");

    let store = FileStore::open(&config.data_dir).await.unwrap();
    let state = AppState::new(config, Arc::new(store)).unwrap();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://{}", addr),
        client: reqwest::Client::new(),
        data_dir,
        _dir: dir,
    }
}
