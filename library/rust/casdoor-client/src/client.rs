//! Casdoor クライアントのトレイトと非同期実装。

use crate::certificate::CertificateStore;
use crate::claims::IdentityClaims;
use crate::config::CasdoorConfig;
use crate::enforce::{BatchEnforceExchange, EnforceExchange, EnforcementRequest};
use crate::error::CasdoorError;
use crate::exchange::execute;
use crate::token::{self, Grant, TokenBundle, TokenExchange};
use crate::transport::{ReqwestTransport, Transport};
use crate::verifier::JwtVerifier;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

#[cfg(feature = "mock")]
use mockall::automock;

/// 認可リンクのデフォルトスコープ。
pub const DEFAULT_SCOPE: &str = "read";

/// CasdoorSdk はトークン取得・トークン検証・enforce を提供するトレイト。
///
/// `CasdoorClient` がデフォルト実装。テスト時は `MockCasdoorSdk` が使用可能。
#[cfg_attr(feature = "mock", automock)]
#[async_trait]
pub trait CasdoorSdk: Send + Sync {
    /// 指定グラントでトークンを取得する。取得したトークンは保持しない。
    async fn acquire_token(&self, grant: Grant) -> Result<TokenBundle, CasdoorError>;

    /// トークンをローカルで検証して Claims を返す。ネットワークアクセスは行わない。
    fn parse_jwt_token(&self, token: &str) -> Result<IdentityClaims, CasdoorError>;

    /// 単一の enforce 判定を行う。判定はキャッシュせず、毎回プロバイダーへ問い合わせる。
    async fn enforce(&self, request: &EnforcementRequest) -> Result<bool, CasdoorError>;

    /// 複数の enforce 判定を 1 回のリクエストで行う。
    ///
    /// 結果の i 番目は `requests[i]` に対応する。順序はプロバイダーが保証するものとして
    /// そのまま返す（プロバイダーとの互換性要件）。空の入力に対しては通信しない。
    async fn batch_enforce(
        &self,
        requests: &[EnforcementRequest],
    ) -> Result<Vec<bool>, CasdoorError>;
}

/// 非同期・同期の両クライアントが共有する不変の状態。
#[derive(Debug, Clone)]
pub(crate) struct Session {
    pub(crate) config: Arc<CasdoorConfig>,
    pub(crate) verifier: JwtVerifier,
}

impl Session {
    /// 設定を検証し、証明書を読み込む。
    ///
    /// 証明書の不備は最初の検証時ではなく、ここで `Configuration` エラーになる。
    pub(crate) fn prepare(config: CasdoorConfig) -> Result<Self, CasdoorError> {
        config.validate()?;

        let certificate = CertificateStore::load(&config.certificate).map_err(|e| {
            error!(
                organization = %config.organization_name,
                application = %config.application_name,
                error = %e,
                "証明書の読み込みに失敗しました"
            );
            e
        })?;

        let audience = config
            .validate_audience
            .then_some(config.client_id.as_str());
        let verifier = JwtVerifier::new(Arc::new(certificate), config.leeway_secs, audience);

        debug!(
            endpoint = %config.endpoint,
            client_id = %config.client_id,
            organization = %config.organization_name,
            leeway_secs = config.leeway_secs,
            "Casdoor クライアントを初期化しました"
        );

        Ok(Self {
            config: Arc::new(config),
            verifier,
        })
    }

    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    pub(crate) fn token_exchange(&self, grant: Grant) -> TokenExchange {
        TokenExchange::new(self.config.clone(), grant)
    }

    pub(crate) fn enforce_exchange(&self, request: &EnforcementRequest) -> EnforceExchange {
        EnforceExchange::new(self.config.clone(), request.clone())
    }

    pub(crate) fn batch_exchange(&self, requests: &[EnforcementRequest]) -> BatchEnforceExchange {
        BatchEnforceExchange::new(self.config.clone(), requests.to_vec())
    }

    pub(crate) fn auth_link(
        &self,
        redirect_uri: &str,
        scope: Option<&str>,
    ) -> Result<url::Url, CasdoorError> {
        token::auth_link(&self.config, redirect_uri, scope.unwrap_or(DEFAULT_SCOPE))
    }
}

/// CasdoorClient は reqwest を使った CasdoorSdk の非同期実装。
///
/// 内部状態は不変なので `Arc` で包んで複数タスクから共有してよい。
pub struct CasdoorClient {
    session: Session,
    transport: Arc<dyn Transport>,
}

impl CasdoorClient {
    /// 新しい CasdoorClient を生成する。
    ///
    /// `config.timeout_secs` で指定したタイムアウトを持つ HTTP クライアントを内部で生成する。
    pub fn new(config: CasdoorConfig) -> Result<Self, CasdoorError> {
        let session = Session::prepare(config)?;
        let transport = Arc::new(ReqwestTransport::new(session.timeout())?);
        Ok(Self { session, transport })
    }

    /// 任意のトランスポートで CasdoorClient を生成する。
    pub fn with_transport(
        config: CasdoorConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, CasdoorError> {
        Ok(Self {
            session: Session::prepare(config)?,
            transport,
        })
    }

    /// 認可コードをトークンに交換する。
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::authorization_code(code, redirect_uri))
            .await
    }

    /// アプリケーション自身のトークンを取得する。
    pub async fn client_credentials_token(&self) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::ClientCredentials).await
    }

    /// ユーザー名とパスワードでトークンを取得する。
    pub async fn password_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::password(username, password)).await
    }

    /// リフレッシュトークンで新しいトークンを取得する。
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        scope: Option<&str>,
    ) -> Result<TokenBundle, CasdoorError> {
        self.acquire_token(Grant::refresh_token(refresh_token, scope))
            .await
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

#[async_trait]
impl CasdoorSdk for CasdoorClient {
    async fn acquire_token(&self, grant: Grant) -> Result<TokenBundle, CasdoorError> {
        let exchange = self.session.token_exchange(grant);
        execute(self.transport.as_ref(), &exchange).await
    }

    fn parse_jwt_token(&self, token: &str) -> Result<IdentityClaims, CasdoorError> {
        self.session.verifier.verify(token)
    }

    async fn enforce(&self, request: &EnforcementRequest) -> Result<bool, CasdoorError> {
        let exchange = self.session.enforce_exchange(request);
        execute(self.transport.as_ref(), &exchange).await
    }

    async fn batch_enforce(
        &self,
        requests: &[EnforcementRequest],
    ) -> Result<Vec<bool>, CasdoorError> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        let exchange = self.session.batch_exchange(requests);
        execute(self.transport.as_ref(), &exchange).await
    }
}
