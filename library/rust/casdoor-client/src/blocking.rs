//! 同期（ブロッキング）版の Casdoor クライアント。
//!
//! 非同期版 `crate::client::CasdoorClient` と同じ `Exchange` を `execute_blocking` で駆動するため、
//! リクエスト・レスポンスの扱いは完全に同一。各呼び出しはレスポンス受信まで呼び出しスレッドを占有する。
//! tokio ランタイムのワーカースレッド上から呼び出してはならない。

use crate::claims::IdentityClaims;
use crate::client::Session;
use crate::config::CasdoorConfig;
use crate::enforce::EnforcementRequest;
use crate::error::CasdoorError;
use crate::exchange::execute_blocking;
use crate::token::{Grant, TokenBundle};
use crate::transport::{BlockingTransport, ReqwestBlockingTransport};
use crate::verifier::JwtVerifier;
use std::sync::Arc;

/// CasdoorClient は reqwest::blocking を使った同期クライアント。
pub struct CasdoorClient {
    session: Session,
    transport: Arc<dyn BlockingTransport>,
}

impl CasdoorClient {
    /// 新しい同期 CasdoorClient を生成する。証明書はここで読み込まれる。
    pub fn new(config: CasdoorConfig) -> Result<Self, CasdoorError> {
        let session = Session::prepare(config)?;
        let transport = Arc::new(ReqwestBlockingTransport::new(session.timeout())?);
        Ok(Self { session, transport })
    }

    /// 任意の同期トランスポートで CasdoorClient を生成する。
    pub fn with_transport(
        config: CasdoorConfig,
        transport: Arc<dyn BlockingTransport>,
    ) -> Result<Self, CasdoorError> {
        Ok(Self {
            session: Session::prepare(config)?,
            transport,
        })
    }

    /// 指定グラントでトークンを取得する。
    pub fn acquire_token(&self, grant: Grant) -> Result<TokenBundle, CasdoorError> {
        let exchange = self.session.token_exchange(grant);
        execute_blocking(self.transport.as_ref(), &exchange)
    }

    pub fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::authorization_code(code, redirect_uri))
    }

    pub fn client_credentials_token(&self) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::ClientCredentials)
    }

    pub fn password_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::password(username, password))
    }

    pub fn refresh_token(
        &self,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::refresh_token(refresh_token, scope))
    }

    /// トークンをローカルで検証して Claims を返す。
    pub fn parse_jwt_token(&self, token: &str) -> Result<IdentityClaims, CasdoorError> {
        self.session.verifier.verify(token)
    }

    /// 単一の enforce 判定を行う。
    pub fn enforce(&self, request: &EnforcementRequest) -> Result<bool, CasdoorError> {
        let exchange = self.session.enforce_exchange(request);
        execute_blocking(self.transport.as_ref(), &exchange)
    }

    /// 複数の enforce 判定を 1 回のリクエストで行う。結果は入力と同じ順序。
    pub fn batch_enforce(
        &self,
        requests: &[EnforcementRequest],
    ) -> Result<Vec<bool>, CasdoorError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let exchange = self.session.batch_exchange(requests);
        execute_blocking(self.transport.as_ref(), &exchange)
    }

    /// 認可画面へのリンクを返す。`scope` 省略時は `read`。
    pub fn auth_link(
        &self,
        redirect_uri: &str,
        scope: Option<&str>,
    ) -> Result<url::Url, CasdoorError> {
        self.session.auth_link(redirect_uri, scope)
    }

    pub fn config(&self) -> &CasdoorConfig {
        &self.session.config
    }

    pub fn verifier(&self) -> &JwtVerifier {
        &self.session.verifier
    }
}
