//! JWT 検証器: 証明書ストアの公開鍵で RS256 署名と時刻 Claim を検証する。
//!
//! ネットワークアクセスは行わない。同じトークンと証明書に対して常に同じ結果を返す
//! （時刻 Claim の評価を除く）。

use crate::certificate::CertificateStore;
use crate::claims::IdentityClaims;
use crate::error::CasdoorError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Casdoor が使用する唯一の署名アルゴリズム。
const REQUIRED_ALGORITHM: &str = "RS256";

/// 署名検証前に読み取る JOSE ヘッダー。
#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: Option<String>,
}

/// JwtVerifier はトークンを検証して IdentityClaims を返す。
///
/// 内部状態は不変なので `Clone` して複数タスクから共有してよい。
#[derive(Debug, Clone)]
pub struct JwtVerifier {
    certificate: Arc<CertificateStore>,
    leeway_secs: u64,
    audience: Option<String>,
}

impl JwtVerifier {
    /// 新しい JwtVerifier を生成する。
    ///
    /// `audience` を指定した場合、aud Claim にその値が含まれることを要求する。
    pub fn new(
        certificate: Arc<CertificateStore>,
        leeway_secs: u64,
        audience: Option<&str>,
    ) -> Self {
        Self {
            certificate,
            leeway_secs,
            audience: audience.map(str::to_string),
        }
    }

    /// 許容クロックスキュー秒数を返す。
    pub fn leeway_secs(&self) -> u64 {
        self.leeway_secs
    }

    /// JWT トークン文字列を検証し、Claims を返す。
    ///
    /// 1. 3 つの base64url セグメントで構成されているか
    /// 2. ヘッダーの alg が RS256 か（それ以外はネゴシエーションせず拒否する）
    /// 3. 署名が証明書の公開鍵と一致するか
    /// 4. exp / nbf（および設定時は aud）が有効か
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, CasdoorError> {
        let header = check_structure(token)?;

        let alg = header
            .alg
            .ok_or_else(|| CasdoorError::MalformedToken("ヘッダーに alg がありません".into()))?;
        if alg != REQUIRED_ALGORITHM {
            debug!(alg = %alg, "RS256 以外のアルゴリズムを拒否しました");
            return Err(CasdoorError::UnsupportedAlgorithm(alg));
        }

        let data = decode::<Map<String, Value>>(
            token,
            self.certificate.decoding_key(),
            &self.validation(),
        )
        .map_err(|e| map_jwt_error(&e))?;

        let claims = IdentityClaims::from_verified_payload(data.claims);
        debug!(sub = ?claims.subject(), "トークン検証に成功しました");
        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        match &self.audience {
            Some(aud) => {
                // aud がないトークンも拒否する
                validation.set_required_spec_claims(&["exp", "aud"]);
                validation.set_audience(&[aud]);
            }
            None => {
                validation.set_required_spec_claims(&["exp"]);
                validation.validate_aud = false;
            }
        }
        validation
    }
}

/// セグメント構造を確認し、署名検証前に必要なヘッダーだけを読み取る。
///
/// ペイロードはここでは解釈しない。
fn check_structure(token: &str) -> Result<RawHeader, CasdoorError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(CasdoorError::MalformedToken(format!(
            "セグメント数が 3 ではありません: {}",
            segments.len()
        )));
    }

    let mut decoded = Vec::with_capacity(3);
    for (name, segment) in ["header", "payload", "signature"].iter().zip(&segments) {
        if segment.is_empty() {
            return Err(CasdoorError::MalformedToken(format!("{name} セグメントが空です")));
        }
        let bytes = URL_SAFE_NO_PAD.decode(segment).map_err(|e| {
            CasdoorError::MalformedToken(format!("{name} セグメントが base64url ではありません: {e}"))
        })?;
        decoded.push(bytes);
    }

    serde_json::from_slice::<RawHeader>(&decoded[0])
        .map_err(|e| CasdoorError::MalformedToken(format!("ヘッダーの JSON が不正です: {e}")))
}

fn map_jwt_error(err: &jsonwebtoken::errors::Error) -> CasdoorError {
    match err.kind() {
        ErrorKind::InvalidSignature => CasdoorError::InvalidSignature,
        ErrorKind::ExpiredSignature => CasdoorError::TokenExpired,
        ErrorKind::ImmatureSignature => CasdoorError::TokenNotYetValid,
        ErrorKind::InvalidAudience => CasdoorError::InvalidAudience,
        ErrorKind::InvalidAlgorithm => CasdoorError::UnsupportedAlgorithm(err.to_string()),
        ErrorKind::MissingRequiredClaim(claim) if claim == "aud" => CasdoorError::InvalidAudience,
        ErrorKind::MissingRequiredClaim(claim) => {
            CasdoorError::MalformedToken(format!("必須 Claim がありません: {claim}"))
        }
        _ => CasdoorError::MalformedToken(err.to_string()),
    }
}
