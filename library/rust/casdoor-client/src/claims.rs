//! 検証済み ID トークンの Claims。

use chrono::{DateTime, TimeZone, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Audience は JWT の aud Claim を表す。
/// 文字列または文字列配列のどちらも受け付ける。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Audience(pub Vec<String>);

impl<'de> Deserialize<'de> for Audience {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de;

        struct AudienceVisitor;

        impl<'de> de::Visitor<'de> for AudienceVisitor {
            type Value = Audience;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string or array of strings")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(Audience(vec![v.to_string()]))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut values = Vec::new();
                while let Some(v) = seq.next_element::<String>()? {
                    values.push(v);
                }
                Ok(Audience(values))
            }
        }

        deserializer.deserialize_any(AudienceVisitor)
    }
}

impl Audience {
    /// 指定値が含まれるかどうかを返す。
    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|a| a == value)
    }
}

/// IdentityClaims は署名検証に成功したトークンのペイロード。
///
/// `JwtVerifier::verify` 以外からは生成できない。未検証のペイロードから
/// Claims を得る経路は存在しない。
/// プロバイダー固有のカスタム Claim もすべて保持する。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IdentityClaims {
    payload: Map<String, Value>,
}

impl IdentityClaims {
    pub(crate) fn from_verified_payload(payload: Map<String, Value>) -> Self {
        Self { payload }
    }

    /// サブジェクト（sub）。
    pub fn subject(&self) -> Option<&str> {
        self.str_claim("sub")
    }

    /// 所属組織。Casdoor は `owner` を使い、他の発行者は `org` を使うことがある。
    pub fn organization(&self) -> Option<&str> {
        self.str_claim("owner").or_else(|| self.str_claim("org"))
    }

    /// ユーザー名（name）。
    pub fn name(&self) -> Option<&str> {
        self.str_claim("name")
    }

    /// アカウント種別（type）。例: `normal-user`, `application`
    pub fn account_type(&self) -> Option<&str> {
        self.str_claim("type")
    }

    /// トークン発行者（iss）。
    pub fn issuer(&self) -> Option<&str> {
        self.str_claim("iss")
    }

    /// オーディエンス（aud）。未設定または形式不正の場合は空。
    pub fn audience(&self) -> Audience {
        self.payload
            .get("aud")
            .and_then(|v| Audience::deserialize(v).ok())
            .unwrap_or_default()
    }

    /// 発行時刻（iat）。
    pub fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.time_claim("iat")
    }

    /// 有効期限（exp）。
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.time_claim("exp")
    }

    /// 有効開始時刻（nbf）。
    pub fn not_before(&self) -> Option<DateTime<Utc>> {
        self.time_claim("nbf")
    }

    /// 任意の Claim を返す。
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.payload
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.payload
    }

    /// 呼び出し側で定義した型へデシリアライズする。
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.payload.clone()))
    }

    fn str_claim(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    fn time_claim(&self, key: &str) -> Option<DateTime<Utc>> {
        self.payload
            .get(key)
            .and_then(Value::as_i64)
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }
}

impl std::fmt::Display for IdentityClaims {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "IdentityClaims{{sub={:?}, org={:?}, name={:?}, type={:?}}}",
            self.subject(),
            self.organization(),
            self.name(),
            self.account_type(),
        )
    }
}
