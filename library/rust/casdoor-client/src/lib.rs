//! k1s0-casdoor-client: Casdoor IAM クライアントライブラリ。
//!
//! 認証・認可を Casdoor に委譲するためのクライアントを提供する。
//!
//! - OAuth2 グラント（認可コード・クライアントクレデンシャル・パスワード・リフレッシュ）によるトークン取得
//! - プロバイダー証明書を使った RS256 ID トークンのローカル検証（ネットワーク不要）
//! - 1〜5 要素の述語ベクトルによる enforce 判定（単一・一括）
//!
//! 非同期版 `CasdoorClient` と、`blocking` feature で有効になる同期版
//! `blocking::CasdoorClient` は同じ状態機械（`exchange::Exchange`）を共有する。
//!
//! # 使い方
//!
//! ```ignore
//! use k1s0_casdoor_client::{CasdoorClient, CasdoorConfig, CasdoorSdk, EnforcementRequest};
//!
//! let config = CasdoorConfig::load("config/casdoor.yaml")?;
//! let client = CasdoorClient::new(config)?;
//!
//! // 認可コードをトークンに交換
//! let bundle = client.exchange_code(&code, "https://app.example.com/callback").await?;
//!
//! // ID トークンをローカルで検証
//! let claims = client.parse_jwt_token(bundle.id_token.as_deref().unwrap_or(&bundle.access_token))?;
//!
//! // 判定
//! let allowed = client
//!     .enforce(&EnforcementRequest::triple("acme/doc-permission", claims.name().unwrap_or_default(), "/doc1", "read"))
//!     .await?;
//! ```

pub mod certificate;
pub mod claims;
pub mod client;
pub mod config;
pub mod enforce;
pub mod error;
pub mod exchange;
pub mod token;
pub mod transport;
pub mod verifier;

#[cfg(feature = "blocking")]
pub mod blocking;

pub use certificate::{CertificateStore, PemFormat};
pub use claims::{Audience, IdentityClaims};
pub use client::{CasdoorClient, CasdoorSdk};
pub use config::CasdoorConfig;
pub use enforce::{EnforcementRequest, PredicateVector, MAX_PREDICATES};
pub use error::CasdoorError;
pub use token::{Grant, TokenBundle};
pub use transport::{BlockingTransport, HttpRequest, HttpResponse, Transport};
pub use verifier::JwtVerifier;

#[cfg(feature = "mock")]
pub use client::MockCasdoorSdk;
