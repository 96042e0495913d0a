//! Casdoor クライアントのエラー定義。

/// CasdoorError は Casdoor クライアントで発生するエラーを表す。
///
/// トークン検証の失敗（`MalformedToken` 〜 `InvalidAudience`）と、
/// enforce の否定的な判定（`Ok(false)`）は決して混同されない。
#[derive(thiserror::Error, Debug)]
pub enum CasdoorError {
    /// 設定値（証明書・エンドポイント等）が不正。リトライしても回復しない。
    #[error("設定エラー: {0}")]
    Configuration(String),

    /// トークンが 3 つの base64url セグメントで構成されていない。
    #[error("不正な形式のトークン: {0}")]
    MalformedToken(String),

    /// ヘッダーの alg が RS256 ではない。
    #[error("サポートされていない署名アルゴリズム: {0}")]
    UnsupportedAlgorithm(String),

    /// 署名が証明書の公開鍵と一致しない。
    #[error("トークンの署名が無効です")]
    InvalidSignature,

    /// exp を過ぎている（許容スキューを考慮済み）。
    #[error("トークンの有効期限が切れました")]
    TokenExpired,

    /// nbf より前に提示された（許容スキューを考慮済み）。
    #[error("トークンはまだ有効になっていません")]
    TokenNotYetValid,

    /// aud にクライアント ID が含まれていない。
    #[error("トークンのオーディエンスが一致しません")]
    InvalidAudience,

    /// トークンエンドポイントでのグラント交換に失敗した。
    #[error("トークン取得失敗: HTTP {status} (error={provider_error_code:?}) {description}")]
    TokenRequest {
        status: u16,
        provider_error_code: Option<String>,
        description: String,
    },

    /// enforce リクエストの組み立てに失敗した（述語ベクトルの要素数が範囲外など）。
    #[error("不正な enforce リクエスト: {0}")]
    InvalidEnforcementRequest(String),

    /// enforce レスポンスの形式が契約と異なる。プロバイダーとのバージョン不整合を示す。
    #[error("enforce レスポンスのプロトコル違反: {0}")]
    EnforcementProtocol(String),

    /// プロバイダーがエラーを返した。
    #[error("プロバイダーエラー: HTTP {status} - {message}")]
    Provider { status: u16, message: String },

    /// HTTP リクエストに失敗した。内部でリトライは行わない。
    #[error("HTTP リクエスト失敗: {0}")]
    Http(String),
}

impl CasdoorError {
    /// トークン検証の失敗かどうかを返す。
    pub fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            CasdoorError::MalformedToken(_)
                | CasdoorError::UnsupportedAlgorithm(_)
                | CasdoorError::InvalidSignature
                | CasdoorError::TokenExpired
                | CasdoorError::TokenNotYetValid
                | CasdoorError::InvalidAudience
        )
    }

    /// 呼び出し側のリトライで回復し得るエラーかどうかを返す。
    ///
    /// トランスポート障害とプロバイダーの 5xx / 429 のみが対象。
    pub fn is_retryable(&self) -> bool {
        match self {
            CasdoorError::Http(_) => true,
            CasdoorError::Provider { status, .. } | CasdoorError::TokenRequest { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }
}
