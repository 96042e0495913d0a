//! OAuth2 グラントによるトークン取得と、その結果のトークンバンドル。

use crate::config::CasdoorConfig;
use crate::error::CasdoorError;
use crate::exchange::Exchange;
use crate::transport::{HttpRequest, HttpResponse};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

/// アクセストークン取得エンドポイント（コード・クライアントクレデンシャル・パスワード）。
pub const ACCESS_TOKEN_PATH: &str = "/api/login/oauth/access_token";

/// リフレッシュトークン交換エンドポイント。
pub const REFRESH_TOKEN_PATH: &str = "/api/login/oauth/refresh_token";

/// 認可画面のパス（フロントエンド側）。
pub const AUTHORIZE_PATH: &str = "/login/oauth/authorize";

/// Grant はトークンエンドポイントで交換する OAuth2 グラントを表す。
#[derive(Clone, PartialEq, Eq)]
pub enum Grant {
    /// 認可コードフロー。リダイレクトで受け取ったワンタイムコードを交換する。
    AuthorizationCode { code: String, redirect_uri: String },

    /// クライアントクレデンシャルフロー。ユーザーコンテキストを持たないアプリケーション用トークン。
    ClientCredentials,

    /// リソースオーナーパスワードクレデンシャルフロー。
    /// ブラウザリダイレクトを経由しないため、信頼できるファーストパーティ専用。
    Password { username: String, password: String },

    /// 発行済みのリフレッシュトークンで再認証せずにトークンを更新する。
    RefreshToken {
        refresh_token: String,
        scope: Option<String>,
    },
}

impl Grant {
    pub fn authorization_code(code: &str, redirect_uri: &str) -> Self {
        Grant::AuthorizationCode {
            code: code.to_string(),
            redirect_uri: redirect_uri.to_string(),
        }
    }

    pub fn password(username: &str, password: &str) -> Self {
        Grant::Password {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    pub fn refresh_token(refresh_token: &str, scope: Option<&str>) -> Self {
        Grant::RefreshToken {
            refresh_token: refresh_token.to_string(),
            scope: scope.map(str::to_string),
        }
    }

    /// OAuth2 の grant_type 値を返す。
    pub fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::ClientCredentials => "client_credentials",
            Grant::Password { .. } => "password",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    fn path(&self) -> &'static str {
        match self {
            Grant::RefreshToken { .. } => REFRESH_TOKEN_PATH,
            _ => ACCESS_TOKEN_PATH,
        }
    }
}

impl std::fmt::Debug for Grant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Grant::AuthorizationCode { redirect_uri, .. } => f
                .debug_struct("AuthorizationCode")
                .field("code", &"[REDACTED]")
                .field("redirect_uri", redirect_uri)
                .finish(),
            Grant::ClientCredentials => f.write_str("ClientCredentials"),
            Grant::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            Grant::RefreshToken { scope, .. } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &"[REDACTED]")
                .field("scope", scope)
                .finish(),
        }
    }
}

/// TokenBundle はグラント交換の結果を正規化したもの。
///
/// 所有権は呼び出し側へ移り、保存・自動更新は行わない。
/// 更新が必要な場合は `Grant::RefreshToken` で明示的に要求すること。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    /// アクセストークン（不透明な文字列として扱う）。
    pub access_token: String,

    /// リフレッシュトークン（プロバイダーが発行した場合のみ）。
    pub refresh_token: Option<String>,

    /// OpenID Connect の ID トークン（発行された場合のみ）。
    pub id_token: Option<String>,

    /// トークン種別（通常は "Bearer"）。
    pub token_type: String,

    /// 付与されたスコープ。
    pub scope: Option<String>,

    /// 有効期限（UTC）。レスポンスに expires_in がない場合は `None`。
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenBundle {
    /// トークンが有効期限切れかどうかを返す。期限不明の場合は `false`。
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| Utc::now() >= expires_at)
    }

    /// 指定秒数以内に有効期限が切れるかどうかを返す。期限不明の場合は `false`。
    pub fn expires_within(&self, secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| (expires_at - Utc::now()).num_seconds() < secs)
    }

    /// Authorization ヘッダー用の Bearer 文字列を返す。
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

impl std::fmt::Debug for TokenBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBundle")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// トークンエンドポイントのレスポンス（OAuth2 標準形式 + Casdoor のエラー形式）。
#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

/// 空文字列を未設定として扱う。
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// TokenExchange はグラント 1 回分のトークン取得操作。
pub struct TokenExchange {
    config: Arc<CasdoorConfig>,
    grant: Grant,
}

impl TokenExchange {
    pub fn new(config: Arc<CasdoorConfig>, grant: Grant) -> Self {
        Self { config, grant }
    }

    fn form_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("grant_type".to_string(), self.grant.grant_type().to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
            (
                "client_secret".to_string(),
                self.config.client_secret().to_string(),
            ),
        ];

        match &self.grant {
            Grant::AuthorizationCode { code, redirect_uri } => {
                params.push(("code".into(), code.clone()));
                params.push(("redirect_uri".into(), redirect_uri.clone()));
            }
            Grant::ClientCredentials => {}
            Grant::Password { username, password } => {
                params.push(("username".into(), username.clone()));
                params.push(("password".into(), password.clone()));
            }
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => {
                params.push(("scope".into(), scope.clone().unwrap_or_default()));
                params.push(("refresh_token".into(), refresh_token.clone()));
            }
        }

        params
    }

    /// レスポンスを TokenBundle に正規化する。`now` は有効期限の起点。
    fn normalize(
        &self,
        response: &HttpResponse,
        now: DateTime<Utc>,
    ) -> Result<TokenBundle, CasdoorError> {
        let parsed: Option<TokenResponse> = serde_json::from_str(&response.body).ok();

        if !response.is_success() {
            let (code, description) = match parsed {
                Some(r) => (
                    non_empty(r.error),
                    non_empty(r.error_description).unwrap_or_else(|| response.body.clone()),
                ),
                None => (None, response.body.clone()),
            };
            error!(
                grant_type = self.grant.grant_type(),
                status = response.status,
                error = ?code,
                "トークン取得に失敗しました"
            );
            return Err(CasdoorError::TokenRequest {
                status: response.status,
                provider_error_code: code,
                description,
            });
        }

        let Some(body) = parsed else {
            error!(
                grant_type = self.grant.grant_type(),
                "トークンレスポンスの解析に失敗しました"
            );
            return Err(CasdoorError::TokenRequest {
                status: response.status,
                provider_error_code: None,
                description: "トークンレスポンスが JSON オブジェクトではありません".into(),
            });
        };

        // Casdoor は失敗したグラントにも HTTP 200 + error フィールドで応答する
        let error_code = non_empty(body.error);
        let Some(access_token) = non_empty(body.access_token).filter(|_| error_code.is_none())
        else {
            error!(
                grant_type = self.grant.grant_type(),
                error = ?error_code,
                "トークンレスポンスに access_token が含まれていません"
            );
            return Err(CasdoorError::TokenRequest {
                status: response.status,
                provider_error_code: error_code,
                description: body
                    .error_description
                    .unwrap_or_else(|| "access_token がありません".into()),
            });
        };

        let expires_at = body
            .expires_in
            .filter(|secs| *secs > 0)
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl));

        debug!(
            grant_type = self.grant.grant_type(),
            expires_at = ?expires_at,
            has_refresh_token = body.refresh_token.is_some(),
            "トークンを取得しました"
        );

        Ok(TokenBundle {
            access_token,
            refresh_token: non_empty(body.refresh_token),
            id_token: non_empty(body.id_token),
            token_type: non_empty(body.token_type).unwrap_or_else(|| "Bearer".into()),
            scope: non_empty(body.scope),
            expires_at,
        })
    }
}

impl Exchange for TokenExchange {
    type Output = TokenBundle;

    fn name(&self) -> &'static str {
        self.grant.grant_type()
    }

    fn request(&self) -> Result<HttpRequest, CasdoorError> {
        Ok(HttpRequest::form(
            self.config.api_url(self.grant.path()),
            self.form_params(),
        ))
    }

    fn resolve(&self, response: HttpResponse) -> Result<TokenBundle, CasdoorError> {
        self.normalize(&response, Utc::now())
    }
}

/// 認可画面へのリンクを組み立てる。state にはアプリケーション名を使う。
pub fn auth_link(
    config: &CasdoorConfig,
    redirect_uri: &str,
    scope: &str,
) -> Result<url::Url, CasdoorError> {
    let base = format!("{}{}", config.front_endpoint(), AUTHORIZE_PATH);
    url::Url::parse_with_params(
        &base,
        &[
            ("client_id", config.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("state", config.application_name.as_str()),
        ],
    )
    .map_err(|e| CasdoorError::Configuration(format!("認可リンクを組み立てられません: {e}")))
}
