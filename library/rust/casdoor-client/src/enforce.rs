//! enforce（ポリシー判定）リクエストの組み立てとレスポンスの解釈。
//!
//! 述語ベクトルは常に固定長 `MAX_PREDICATES` で送信する。
//! ポリシーモデルが使わない要素は `UNUSED_PREDICATE` で埋め、省略はしない。

use crate::config::CasdoorConfig;
use crate::error::CasdoorError;
use crate::exchange::Exchange;
use crate::transport::{HttpRequest, HttpResponse};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 述語ベクトルの最大要素数（v0..v4）。
pub const MAX_PREDICATES: usize = 5;

/// 未使用スロットに送る値。
pub const UNUSED_PREDICATE: &str = "";

/// 単一判定エンドポイント。
pub const ENFORCE_PATH: &str = "/api/enforce";

/// 一括判定エンドポイント。
pub const BATCH_ENFORCE_PATH: &str = "/api/batch-enforce";

/// PredicateVector は 1〜5 要素の述語ベクトル（subject, object, action, コンテキスト…）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateVector {
    values: [String; MAX_PREDICATES],
    arity: usize,
}

impl PredicateVector {
    /// 要素列から述語ベクトルを生成する。要素数が 1〜5 でない場合はエラー。
    pub fn new<I, S>(values: I) -> Result<Self, CasdoorError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let given: Vec<String> = values.into_iter().map(Into::into).collect();
        if given.is_empty() || given.len() > MAX_PREDICATES {
            return Err(CasdoorError::InvalidEnforcementRequest(format!(
                "述語ベクトルの要素数は 1〜{MAX_PREDICATES} でなければなりません: {}",
                given.len()
            )));
        }

        let arity = given.len();
        let mut slots: [String; MAX_PREDICATES] =
            std::array::from_fn(|_| UNUSED_PREDICATE.to_string());
        for (slot, value) in slots.iter_mut().zip(given) {
            *slot = value;
        }
        Ok(Self {
            values: slots,
            arity,
        })
    }

    /// subject / object / action の 3 要素ベクトル。
    pub fn triple(subject: &str, object: &str, action: &str) -> Self {
        Self {
            values: [
                subject.to_string(),
                object.to_string(),
                action.to_string(),
                UNUSED_PREDICATE.to_string(),
                UNUSED_PREDICATE.to_string(),
            ],
            arity: 3,
        }
    }

    /// 呼び出し側が指定した要素数。
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// 呼び出し側が指定した要素だけを返す。
    pub fn as_slice(&self) -> &[String] {
        &self.values[..self.arity]
    }

    /// 送信されるスロット全体（未使用スロットを含む）。
    pub fn slots(&self) -> &[String; MAX_PREDICATES] {
        &self.values
    }
}

/// EnforcementRequest はパーミッション（モデル）ID と述語ベクトルの組。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnforcementRequest {
    /// パーミッション ID（例: `acme` や `acme/permission-doc`）。
    pub model: String,
    pub predicates: PredicateVector,
}

impl EnforcementRequest {
    pub fn new(model: &str, predicates: PredicateVector) -> Self {
        Self {
            model: model.to_string(),
            predicates,
        }
    }

    /// subject / object / action の判定リクエスト。
    pub fn triple(model: &str, subject: &str, object: &str, action: &str) -> Self {
        Self::new(model, PredicateVector::triple(subject, object, action))
    }

    /// 3 要素に加えてコンテキスト要素（最大 2 つ）を持つリクエスト。
    pub fn with_context(
        model: &str,
        subject: &str,
        object: &str,
        action: &str,
        context: &[&str],
    ) -> Result<Self, CasdoorError> {
        let values = [subject, object, action]
            .into_iter()
            .chain(context.iter().copied());
        Ok(Self::new(model, PredicateVector::new(values)?))
    }

    fn to_wire(&self) -> WireRule<'_> {
        let [v0, v1, v2, v3, v4] = self.predicates.slots();
        WireRule {
            id: &self.model,
            v0,
            v1,
            v2,
            v3,
            v4,
        }
    }
}

/// enforce エンドポイントへ送る固定長のルール。
#[derive(Serialize)]
struct WireRule<'a> {
    id: &'a str,
    v0: &'a str,
    v1: &'a str,
    v2: &'a str,
    v3: &'a str,
    v4: &'a str,
}

fn credential_query(config: &CasdoorConfig) -> Vec<(String, String)> {
    vec![
        ("clientId".to_string(), config.client_id.clone()),
        ("clientSecret".to_string(), config.client_secret().to_string()),
    ]
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, CasdoorError> {
    serde_json::to_value(value)
        .map_err(|e| CasdoorError::InvalidEnforcementRequest(e.to_string()))
}

/// レスポンスから判定値を取り出す。
///
/// Casdoor の `{"status": "ok", "data": ...}` エンベロープは展開し、
/// `{"status": "error", "msg": ...}` は `Provider` エラーにする。
fn decision_payload(response: &HttpResponse) -> Result<Value, CasdoorError> {
    if !response.is_success() {
        error!(
            status = response.status,
            "enforce リクエストがエラーステータスを返しました"
        );
        return Err(CasdoorError::Provider {
            status: response.status,
            message: response.body.clone(),
        });
    }

    // Content-Type が明示されている場合は JSON であることを要求する
    if let Some(content_type) = &response.content_type {
        if !content_type.to_ascii_lowercase().contains("json") {
            warn!(content_type = %content_type, "enforce レスポンスが JSON ではありません");
            return Err(CasdoorError::EnforcementProtocol(format!(
                "JSON 以外の Content-Type を受信しました: {content_type}"
            )));
        }
    }

    let value: Value = serde_json::from_str(&response.body).map_err(|e| {
        CasdoorError::EnforcementProtocol(format!("レスポンスが JSON ではありません: {e}"))
    })?;

    let mut envelope = match value {
        Value::Object(envelope) => envelope,
        other => return Ok(other),
    };

    let status = envelope
        .get("status")
        .and_then(Value::as_str)
        .map(str::to_string);
    match status.as_deref() {
        Some("ok") => Ok(envelope.remove("data").unwrap_or(Value::Null)),
        Some(_) => {
            let message = envelope
                .get("msg")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            error!(message = %message, "プロバイダーが enforce を拒否しました");
            Err(CasdoorError::Provider {
                status: response.status,
                message,
            })
        }
        None => Err(CasdoorError::EnforcementProtocol(format!(
            "真偽値を期待しましたがオブジェクトを受信しました: {}",
            Value::Object(envelope)
        ))),
    }
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// 単一判定の操作。
pub struct EnforceExchange {
    config: Arc<CasdoorConfig>,
    request: EnforcementRequest,
}

impl EnforceExchange {
    pub fn new(config: Arc<CasdoorConfig>, request: EnforcementRequest) -> Self {
        Self { config, request }
    }
}

impl Exchange for EnforceExchange {
    type Output = bool;

    fn name(&self) -> &'static str {
        "enforce"
    }

    fn request(&self) -> Result<HttpRequest, CasdoorError> {
        Ok(HttpRequest::json(
            self.config.api_url(ENFORCE_PATH),
            credential_query(&self.config),
            to_json(&self.request.to_wire())?,
        ))
    }

    fn resolve(&self, response: HttpResponse) -> Result<bool, CasdoorError> {
        let decision = match decision_payload(&response)? {
            Value::Bool(allowed) => allowed,
            // 一部のバージョンは単一判定も 1 要素の配列で返す
            Value::Array(items) if items.len() == 1 => match items[0] {
                Value::Bool(allowed) => allowed,
                ref other => {
                    return Err(CasdoorError::EnforcementProtocol(format!(
                        "真偽値を期待しましたが {} を受信しました",
                        describe(other)
                    )))
                }
            },
            other => {
                warn!(
                    received = describe(&other),
                    "enforce レスポンスの形式が想定と異なります"
                );
                return Err(CasdoorError::EnforcementProtocol(format!(
                    "単一の真偽値を期待しましたが {} を受信しました",
                    describe(&other)
                )));
            }
        };

        debug!(
            model = %self.request.model,
            arity = self.request.predicates.arity(),
            allowed = decision,
            "enforce 判定を受信しました"
        );
        Ok(decision)
    }
}

/// 一括判定の操作。
///
/// 1 回のリクエストでルールの配列を送り、同じ長さ・同じ順序の真偽値配列を受け取る。
/// 結果の順序はプロバイダーの保証に依存し、クライアント側で並べ替えは行わない。
/// これはプロバイダーとの互換性要件である。
pub struct BatchEnforceExchange {
    config: Arc<CasdoorConfig>,
    requests: Vec<EnforcementRequest>,
}

impl BatchEnforceExchange {
    pub fn new(config: Arc<CasdoorConfig>, requests: Vec<EnforcementRequest>) -> Self {
        Self { config, requests }
    }
}

impl Exchange for BatchEnforceExchange {
    type Output = Vec<bool>;

    fn name(&self) -> &'static str {
        "batch_enforce"
    }

    fn request(&self) -> Result<HttpRequest, CasdoorError> {
        let rules: Vec<WireRule<'_>> = self.requests.iter().map(|r| r.to_wire()).collect();
        Ok(HttpRequest::json(
            self.config.api_url(BATCH_ENFORCE_PATH),
            credential_query(&self.config),
            to_json(&rules)?,
        ))
    }

    fn resolve(&self, response: HttpResponse) -> Result<Vec<bool>, CasdoorError> {
        let Value::Array(items) = decision_payload(&response)? else {
            return Err(CasdoorError::EnforcementProtocol(
                "真偽値の配列を期待しました".into(),
            ));
        };

        if items.len() != self.requests.len() {
            error!(
                expected = self.requests.len(),
                received = items.len(),
                "batch-enforce の結果数がリクエスト数と一致しません"
            );
            return Err(CasdoorError::EnforcementProtocol(format!(
                "結果数 {} がリクエスト数 {} と一致しません",
                items.len(),
                self.requests.len()
            )));
        }

        let decisions = items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Bool(allowed) => Ok(*allowed),
                other => Err(CasdoorError::EnforcementProtocol(format!(
                    "{i} 番目の結果は真偽値ではありません: {}",
                    describe(other)
                ))),
            })
            .collect::<Result<Vec<bool>, CasdoorError>>()?;

        debug!(count = decisions.len(), "batch-enforce 判定を受信しました");
        Ok(decisions)
    }
}
