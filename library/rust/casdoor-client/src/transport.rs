//! Casdoor への HTTP 送信を抽象化するトランスポート層。
//!
//! すべてのリクエストは POST で、本文はフォームまたは JSON。
//! 非同期版 `Transport` と同期版 `BlockingTransport` は同じリクエスト／レスポンス型を
//! 共有するため、プロトコル処理（`crate::exchange`）は実行モードに依存しない。

use crate::error::CasdoorError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::error;

/// ログ出力時に値を伏せるパラメーター名。
const SENSITIVE_KEYS: &[&str] = &[
    "client_secret",
    "clientSecret",
    "password",
    "refresh_token",
    "code",
];

/// リクエスト本文。
#[derive(Clone, PartialEq)]
pub enum RequestBody {
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    /// `application/json`
    Json(serde_json::Value),
}

/// トランスポートへ渡す POST リクエスト。
#[derive(Clone, PartialEq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub body: RequestBody,
}

impl HttpRequest {
    pub fn form(url: String, params: Vec<(String, String)>) -> Self {
        Self {
            url,
            query: Vec::new(),
            body: RequestBody::Form(params),
        }
    }

    pub fn json(url: String, query: Vec<(String, String)>, body: serde_json::Value) -> Self {
        Self {
            url,
            query,
            body: RequestBody::Json(body),
        }
    }

    /// フォームパラメーターの値を返す（テスト・診断用）。
    pub fn form_param(&self, key: &str) -> Option<&str> {
        match &self.body {
            RequestBody::Form(params) => params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str()),
            RequestBody::Json(_) => None,
        }
    }
}

fn redacted_pairs(pairs: &[(String, String)]) -> Vec<(&str, &str)> {
    pairs
        .iter()
        .map(|(k, v)| {
            if SENSITIVE_KEYS.contains(&k.as_str()) {
                (k.as_str(), "[REDACTED]")
            } else {
                (k.as_str(), v.as_str())
            }
        })
        .collect()
}

impl std::fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("HttpRequest");
        s.field("url", &self.url)
            .field("query", &redacted_pairs(&self.query));
        match &self.body {
            RequestBody::Form(params) => s.field("form", &redacted_pairs(params)),
            RequestBody::Json(body) => s.field("json", body),
        };
        s.finish()
    }
}

/// トランスポートから返る HTTP レスポンス。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport は非同期に 1 リクエストを送信するトレイト。
///
/// 実装はリトライを行ってはならない。失敗は 1 回のエラーとして呼び出し側へ返す。
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CasdoorError>;
}

/// BlockingTransport は呼び出しスレッドを占有して 1 リクエストを送信するトレイト。
pub trait BlockingTransport: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, CasdoorError>;
}

/// ReqwestTransport は reqwest を使った Transport のデフォルト実装。
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    /// 指定タイムアウトを持つ HTTP クライアントを内部で生成する。
    pub fn new(timeout: Duration) -> Result<Self, CasdoorError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CasdoorError::Http(e.to_string()))?;
        Ok(Self { http_client })
    }

    /// 生成済みの reqwest::Client を使う（接続プールを共有する場合）。
    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, CasdoorError> {
        let builder = self
            .http_client
            .post(&request.url)
            .query(&request.query);
        let builder = match &request.body {
            RequestBody::Form(params) => builder.form(params),
            RequestBody::Json(body) => builder.json(body),
        };

        let response = builder.send().await.map_err(|e| {
            error!(url = %request.url, error = %e, "Casdoor への HTTP リクエストに失敗しました");
            CasdoorError::Http(e.to_string())
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(|e| {
            error!(url = %request.url, error = %e, "Casdoor レスポンス本文の読み取りに失敗しました");
            CasdoorError::Http(e.to_string())
        })?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

/// ReqwestBlockingTransport は reqwest::blocking を使った BlockingTransport の実装。
///
/// 非同期ランタイムのワーカースレッド上で使用してはならない。
#[cfg(feature = "blocking")]
pub struct ReqwestBlockingTransport {
    http_client: reqwest::blocking::Client,
}

#[cfg(feature = "blocking")]
impl ReqwestBlockingTransport {
    pub fn new(timeout: Duration) -> Result<Self, CasdoorError> {
        let http_client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CasdoorError::Http(e.to_string()))?;
        Ok(Self { http_client })
    }
}

#[cfg(feature = "blocking")]
impl BlockingTransport for ReqwestBlockingTransport {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, CasdoorError> {
        let builder = self
            .http_client
            .post(&request.url)
            .query(&request.query);
        let builder = match &request.body {
            RequestBody::Form(params) => builder.form(params),
            RequestBody::Json(body) => builder.json(body),
        };

        let response = builder.send().map_err(|e| {
            error!(url = %request.url, error = %e, "Casdoor への HTTP リクエストに失敗しました");
            CasdoorError::Http(e.to_string())
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .map_err(|e| CasdoorError::Http(e.to_string()))?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
