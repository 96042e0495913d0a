//! Casdoor クライアントの設定構造体。

use crate::error::CasdoorError;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// leeway_secs のデフォルト値（60 秒）。
fn default_leeway_secs() -> u64 {
    60
}

/// timeout_secs のデフォルト値（10 秒）。
fn default_timeout_secs() -> u64 {
    10
}

fn default_validate_audience() -> bool {
    true
}

/// CasdoorConfig は Casdoor へ接続するための資格情報と動作設定を表す。
///
/// クライアント生成時に一度だけ渡し、以降は変更しない。
/// YAML または環境ごとの設定ファイルから serde でデシリアライズ可能。
#[derive(Debug, Deserialize)]
pub struct CasdoorConfig {
    /// Casdoor バックエンドの URL。
    /// 例: `https://casdoor.k1s0.internal.example.com:8000`
    pub endpoint: String,

    /// アプリケーションのクライアント ID。
    pub client_id: String,

    /// アプリケーションのクライアントシークレット（Vault から取得）。
    pub client_secret: SecretString,

    /// トークン署名検証用の公開証明書（PEM）。
    pub certificate: String,

    /// 組織名。
    pub organization_name: String,

    /// アプリケーション名。認可リンクの state に使用する。
    pub application_name: String,

    /// ログイン画面を提供するフロントエンドの URL。
    /// 省略した場合は `endpoint` の `:8000` を `:7001` に置き換えた URL を使用する。
    #[serde(default)]
    pub front_endpoint: Option<String>,

    /// exp / nbf 検証時に許容するクロックスキュー秒数（デフォルト: 60 秒）。
    #[serde(default = "default_leeway_secs")]
    pub leeway_secs: u64,

    /// aud にクライアント ID が含まれることを検証するか（デフォルト: true）。
    #[serde(default = "default_validate_audience")]
    pub validate_audience: bool,

    /// HTTP タイムアウト秒数（デフォルト: 10 秒）。
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl CasdoorConfig {
    /// 必須項目のみで CasdoorConfig を生成する。
    ///
    /// `leeway_secs`・`validate_audience`・`timeout_secs` はデフォルト値が使用される。
    pub fn new(
        endpoint: &str,
        client_id: &str,
        client_secret: &str,
        certificate: &str,
        organization_name: &str,
        application_name: &str,
    ) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            client_id: client_id.to_string(),
            client_secret: SecretString::new(client_secret.to_string()),
            certificate: certificate.to_string(),
            organization_name: organization_name.to_string(),
            application_name: application_name.to_string(),
            front_endpoint: None,
            leeway_secs: default_leeway_secs(),
            validate_audience: default_validate_audience(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// YAML 文字列から設定を読み込み、バリデーションする。
    pub fn from_yaml_str(yaml: &str) -> Result<Self, CasdoorError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| CasdoorError::Configuration(format!("YAML の解析に失敗しました: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// YAML ファイルから設定を読み込み、バリデーションする。
    pub fn load(path: &str) -> Result<Self, CasdoorError> {
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            CasdoorError::Configuration(format!("設定ファイルを読み込めません: {path}: {e}"))
        })?;
        Self::from_yaml_str(&yaml)
    }

    /// フロントエンド URL を設定する。
    pub fn with_front_endpoint(mut self, front_endpoint: &str) -> Self {
        self.front_endpoint = Some(front_endpoint.to_string());
        self
    }

    /// 許容クロックスキュー秒数を設定する。
    pub fn with_leeway_secs(mut self, secs: u64) -> Self {
        self.leeway_secs = secs;
        self
    }

    /// オーディエンス検証の有無を設定する。
    pub fn with_validate_audience(mut self, validate: bool) -> Self {
        self.validate_audience = validate;
        self
    }

    /// タイムアウト秒数を設定する。
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// 設定値のバリデーション。
    ///
    /// 証明書の中身はここでは検査しない（`CertificateStore::load` が担当する）。
    pub fn validate(&self) -> Result<(), CasdoorError> {
        validate_url("endpoint", &self.endpoint)?;
        if let Some(front) = &self.front_endpoint {
            validate_url("front_endpoint", front)?;
        }
        if self.client_id.is_empty() {
            return Err(CasdoorError::Configuration("client_id is required".into()));
        }
        if self.client_secret.expose_secret().is_empty() {
            return Err(CasdoorError::Configuration(
                "client_secret is required".into(),
            ));
        }
        if self.certificate.trim().is_empty() {
            return Err(CasdoorError::Configuration("certificate is required".into()));
        }
        if self.organization_name.is_empty() {
            return Err(CasdoorError::Configuration(
                "organization_name is required".into(),
            ));
        }
        if self.application_name.is_empty() {
            return Err(CasdoorError::Configuration(
                "application_name is required".into(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(CasdoorError::Configuration(
                "timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// ログイン画面を提供するフロントエンドの URL を返す。
    pub fn front_endpoint(&self) -> String {
        match &self.front_endpoint {
            Some(front) => front.trim_end_matches('/').to_string(),
            None => self
                .endpoint
                .trim_end_matches('/')
                .replace(":8000", ":7001"),
        }
    }

    /// バックエンド API の URL を組み立てる。`path` は `/` で始めること。
    pub(crate) fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.trim_end_matches('/'), path)
    }

    pub(crate) fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), CasdoorError> {
    let url = url::Url::parse(value)
        .map_err(|e| CasdoorError::Configuration(format!("{field} is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CasdoorError::Configuration(format!(
            "{field} must use http or https: {value}"
        )));
    }
    Ok(())
}
