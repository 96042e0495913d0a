//! 1 回のリクエスト／レスポンスで完結する操作の状態機械。
//!
//! 各操作は `Idle → AwaitingResponse → Resolved | Failed` の順に遷移する。
//!
//! - `Exchange::request` が Idle 状態でリクエストを組み立てる
//! - トランスポートの送信中が AwaitingResponse（唯一の中断点）
//! - `Exchange::resolve` がレスポンスを結果またはエラーに確定させる
//!
//! 非同期版 `execute` と同期版 `execute_blocking` は待ち方だけが異なり、
//! 同じ `Exchange` 値を駆動する。非同期版の Future を AwaitingResponse 中に drop した場合、
//! トークンや判定結果は生成されない（プロバイダー側で処理が完了したかは不定）。

use crate::error::CasdoorError;
use crate::transport::{BlockingTransport, HttpRequest, HttpResponse, Transport};
use tracing::debug;

/// Exchange はプロバイダーとの 1 往復で完結する操作を表す。
pub trait Exchange {
    type Output;

    /// ログ用の操作名。
    fn name(&self) -> &'static str;

    /// Idle: 送信するリクエストを組み立てる。
    fn request(&self) -> Result<HttpRequest, CasdoorError>;

    /// AwaitingResponse → Resolved / Failed: レスポンスを解釈する。
    fn resolve(&self, response: HttpResponse) -> Result<Self::Output, CasdoorError>;
}

/// Exchange を非同期トランスポートで実行する。
pub async fn execute<E>(transport: &dyn Transport, exchange: &E) -> Result<E::Output, CasdoorError>
where
    E: Exchange + Sync,
{
    let request = exchange.request()?;
    debug!(operation = exchange.name(), url = %request.url, "Casdoor へリクエストを送信します");
    let response = transport.send(request).await?;
    debug!(operation = exchange.name(), status = response.status, "Casdoor からレスポンスを受信しました");
    exchange.resolve(response)
}

/// Exchange を同期トランスポートで実行する。
pub fn execute_blocking<E>(
    transport: &dyn BlockingTransport,
    exchange: &E,
) -> Result<E::Output, CasdoorError>
where
    E: Exchange,
{
    let request = exchange.request()?;
    debug!(operation = exchange.name(), url = %request.url, "Casdoor へリクエストを送信します");
    let response = transport.send(request)?;
    debug!(operation = exchange.name(), status = response.status, "Casdoor からレスポンスを受信しました");
    exchange.resolve(response)
}
