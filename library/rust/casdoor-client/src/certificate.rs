//! プロバイダーの RSA 公開証明書を保持する証明書ストア。

use crate::error::CasdoorError;
use jsonwebtoken::DecodingKey;

/// PEM のラベル種別。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PemFormat {
    /// X.509 証明書（Casdoor が公開する形式）。
    Certificate,
    /// SubjectPublicKeyInfo 形式の公開鍵（`PUBLIC KEY`）。
    PublicKey,
    /// PKCS#1 形式の RSA 公開鍵（`RSA PUBLIC KEY`）。
    RsaPublicKey,
}

impl PemFormat {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "CERTIFICATE" => Some(Self::Certificate),
            "PUBLIC KEY" => Some(Self::PublicKey),
            "RSA PUBLIC KEY" => Some(Self::RsaPublicKey),
            _ => None,
        }
    }
}

/// CertificateStore は署名検証に使う RSA 公開鍵を保持する。
///
/// ロード後は変更されないため、複数の検証から並行して参照してよい。
#[derive(Clone)]
pub struct CertificateStore {
    decoding_key: DecodingKey,
    format: PemFormat,
}

impl CertificateStore {
    /// PEM テキストを解析して CertificateStore を生成する。
    ///
    /// RSA 公開鍵として解釈できない場合は `CasdoorError::Configuration` を返す。
    pub fn load(pem_text: &str) -> Result<Self, CasdoorError> {
        let label = pem_label(pem_text).ok_or_else(|| {
            CasdoorError::Configuration("証明書に PEM の BEGIN 行がありません".into())
        })?;

        let format = PemFormat::from_label(label).ok_or_else(|| {
            CasdoorError::Configuration(format!(
                "サポートされていない PEM ラベルです: {label}"
            ))
        })?;

        let decoding_key = DecodingKey::from_rsa_pem(pem_text.trim().as_bytes()).map_err(|e| {
            CasdoorError::Configuration(format!("RSA 公開鍵の読み込みに失敗しました: {e}"))
        })?;

        Ok(Self {
            decoding_key,
            format,
        })
    }

    /// 読み込んだ PEM の種別を返す。
    pub fn format(&self) -> PemFormat {
        self.format
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl std::fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateStore")
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// 最初の `-----BEGIN <label>-----` 行からラベルを取り出す。
fn pem_label(pem_text: &str) -> Option<&str> {
    pem_text.lines().find_map(|line| {
        line.trim()
            .strip_prefix("-----BEGIN ")
            .and_then(|rest| rest.strip_suffix("-----"))
    })
}
