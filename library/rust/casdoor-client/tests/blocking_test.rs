//! 同期クライアントの結合テスト。
//!
//! モックサーバーは専用ランタイム上で起動し、クライアントはテストスレッドから同期的に呼び出す。

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use k1s0_casdoor_client::blocking::CasdoorClient;
use k1s0_casdoor_client::{CasdoorConfig, CasdoorError, EnforcementRequest};
use serde_json::json;
use tokio::runtime::Runtime;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROVIDER_CERT: &str = include_str!("fixtures/provider_cert.pem");
const PROVIDER_KEY: &str = include_str!("fixtures/provider_key.pem");

fn start_server(rt: &Runtime, mocks: Vec<Mock>) -> MockServer {
    rt.block_on(async {
        let server = MockServer::start().await;
        for mock in mocks {
            mock.mount(&server).await;
        }
        server
    })
}

fn make_client(server: &MockServer) -> CasdoorClient {
    CasdoorClient::new(CasdoorConfig::new(
        &server.uri(),
        "client-id",
        "client-secret",
        PROVIDER_CERT,
        "acme",
        "app-acme",
    ))
    .unwrap()
}

#[test]
fn test_blocking_client_credentials() {
    let rt = Runtime::new().unwrap();
    let server = start_server(
        &rt,
        vec![Mock::given(method("POST"))
            .and(path("/api/login/oauth/access_token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-app",
                "expires_in": 7200
            })))],
    );

    let bundle = make_client(&server).client_credentials_token().unwrap();
    assert_eq!(bundle.access_token, "access-app");
    assert!(!bundle.expires_within(3600));
}

#[test]
fn test_blocking_token_request_error() {
    let rt = Runtime::new().unwrap();
    let server = start_server(
        &rt,
        vec![Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": "invalid_client"
            })))],
    );

    let result = make_client(&server).password_token("alice", "wrong");
    assert!(matches!(
        result,
        Err(CasdoorError::TokenRequest { status: 401, .. })
    ));
}

#[test]
fn test_blocking_enforce_and_batch() {
    let rt = Runtime::new().unwrap();
    let server = start_server(
        &rt,
        vec![
            Mock::given(method("POST"))
                .and(path("/api/enforce"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!(true))),
            Mock::given(method("POST"))
                .and(path("/api/batch-enforce"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([true, false]))),
        ],
    );

    let client = make_client(&server);
    let request = EnforcementRequest::triple("acme", "alice", "/doc1", "read");
    assert!(client.enforce(&request).unwrap());

    let result = client
        .batch_enforce(&[
            request.clone(),
            EnforcementRequest::triple("acme", "alice", "/doc1", "delete"),
        ])
        .unwrap();
    assert_eq!(result, vec![true, false]);
}

#[test]
fn test_blocking_verify_matches_async_contract() {
    let client = CasdoorClient::new(CasdoorConfig::new(
        "http://localhost:8000",
        "client-id",
        "client-secret",
        PROVIDER_CERT,
        "acme",
        "app-acme",
    ))
    .unwrap();

    let key = EncodingKey::from_rsa_pem(PROVIDER_KEY.as_bytes()).unwrap();
    let token = encode(
        &Header::new(Algorithm::RS256),
        &json!({"sub": "alice", "aud": "client-id", "exp": chrono::Utc::now().timestamp() - 3600}),
        &key,
    )
    .unwrap();

    let result = client.parse_jwt_token(&token);
    assert!(matches!(result, Err(CasdoorError::TokenExpired)));
}
