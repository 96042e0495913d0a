use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use k1s0_casdoor_client::{
    CasdoorClient, CasdoorConfig, CasdoorError, CasdoorSdk, EnforcementRequest, Grant,
    PredicateVector,
};
use serde_json::{json, Value};
use wiremock::matchers::{body_json, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const PROVIDER_CERT: &str = include_str!("fixtures/provider_cert.pem");
const PROVIDER_PUBLIC_KEY: &str = include_str!("fixtures/provider_public_key.pem");
const PROVIDER_KEY: &str = include_str!("fixtures/provider_key.pem");
const FOREIGN_KEY: &str = include_str!("fixtures/foreign_key.pem");
const EC_PUBLIC_KEY: &str = include_str!("fixtures/ec_public_key.pem");

const CLIENT_ID: &str = "client-id";
const CLIENT_SECRET: &str = "client-secret";

fn make_config(endpoint: &str) -> CasdoorConfig {
    CasdoorConfig::new(
        endpoint,
        CLIENT_ID,
        CLIENT_SECRET,
        PROVIDER_CERT,
        "acme",
        "app-acme",
    )
}

fn make_client(server: &MockServer) -> CasdoorClient {
    CasdoorClient::new(make_config(&server.uri())).unwrap()
}

fn sign_with(key_pem: &str, claims: &Value) -> String {
    let key = EncodingKey::from_rsa_pem(key_pem.as_bytes()).unwrap();
    encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
}

fn token_response(access_token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "access_token": access_token,
        "id_token": access_token,
        "refresh_token": "refresh-xyz",
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "read"
    }))
}

// --- トークン取得 ---

#[tokio::test]
async fn test_authorization_code_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/access_token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("code=one-time-code"))
        .and(body_string_contains("client_secret=client-secret"))
        .respond_with(token_response("access-code"))
        .expect(1)
        .mount(&server)
        .await;

    let bundle = make_client(&server)
        .exchange_code("one-time-code", "https://app.example.com/callback")
        .await
        .unwrap();
    assert_eq!(bundle.access_token, "access-code");
    assert_eq!(bundle.refresh_token.as_deref(), Some("refresh-xyz"));
    assert!(!bundle.is_expired());
}

#[tokio::test]
async fn test_client_credentials_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/access_token"))
        .and(body_string_contains("grant_type=client_credentials"))
        .respond_with(token_response("access-app"))
        .expect(1)
        .mount(&server)
        .await;

    let bundle = make_client(&server)
        .client_credentials_token()
        .await
        .unwrap();
    assert_eq!(bundle.access_token, "access-app");
    assert_eq!(bundle.bearer_header(), "Bearer access-app");
}

#[tokio::test]
async fn test_password_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/access_token"))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .respond_with(token_response("access-alice"))
        .expect(1)
        .mount(&server)
        .await;

    let bundle = make_client(&server)
        .password_token("alice", "p@ss")
        .await
        .unwrap();
    assert_eq!(bundle.access_token, "access-alice");
}

#[tokio::test]
async fn test_refresh_token_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/refresh_token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-xyz"))
        .respond_with(token_response("access-refreshed"))
        .expect(1)
        .mount(&server)
        .await;

    let bundle = make_client(&server)
        .refresh_token("refresh-xyz", None)
        .await
        .unwrap();
    assert_eq!(bundle.access_token, "access-refreshed");
}

#[tokio::test]
async fn test_grant_failures_yield_token_request_error() {
    for status in [400u16, 401] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "rejected"
            })))
            .mount(&server)
            .await;

        let client = make_client(&server);
        let grants = [
            Grant::authorization_code("code", "https://app/cb"),
            Grant::ClientCredentials,
            Grant::password("alice", "wrong"),
            Grant::refresh_token("stale", None),
        ];
        for grant in grants {
            match client.acquire_token(grant).await {
                Err(CasdoorError::TokenRequest {
                    status: got,
                    provider_error_code,
                    ..
                }) => {
                    assert_eq!(got, status);
                    assert_eq!(provider_error_code.as_deref(), Some("invalid_grant"));
                }
                other => panic!("unexpected: {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn test_grant_error_on_http_200() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": "invalid_client",
            "error_description": "client secret is wrong"
        })))
        .mount(&server)
        .await;

    let result = make_client(&server).client_credentials_token().await;
    assert!(matches!(
        result,
        Err(CasdoorError::TokenRequest { status: 200, .. })
    ));
}

#[tokio::test]
async fn test_unreachable_provider_is_http_error() {
    // 一度確保したポートを解放し、接続を拒否するエンドポイントとして使う
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = make_config(&format!("http://127.0.0.1:{port}")).with_timeout_secs(2);
    let client = CasdoorClient::new(config).unwrap();
    let err = client.client_credentials_token().await.unwrap_err();
    assert!(matches!(err, CasdoorError::Http(_)), "{err:?}");
    assert!(err.is_retryable());
}

// --- トークン検証 ---

#[test]
fn test_verify_scenario_alice() {
    let client = CasdoorClient::new(make_config("http://localhost:8000")).unwrap();
    let exp = chrono::Utc::now().timestamp() + 3600;
    let payload = json!({"sub": "alice", "org": "acme", "aud": CLIENT_ID, "exp": exp});

    let claims = client
        .parse_jwt_token(&sign_with(PROVIDER_KEY, &payload))
        .unwrap();
    assert_eq!(claims.subject(), Some("alice"));
    assert_eq!(claims.organization(), Some("acme"));

    let result = client.parse_jwt_token(&sign_with(FOREIGN_KEY, &payload));
    assert!(matches!(result, Err(CasdoorError::InvalidSignature)));
}

#[tokio::test]
async fn test_verify_issued_token_end_to_end() {
    let server = MockServer::start().await;
    let exp = chrono::Utc::now().timestamp() + 3600;
    let id_token = sign_with(
        PROVIDER_KEY,
        &json!({"sub": "9f3c", "owner": "acme", "name": "alice", "aud": [CLIENT_ID], "exp": exp}),
    );
    Mock::given(method("POST"))
        .and(path("/api/login/oauth/access_token"))
        .respond_with(token_response(&id_token))
        .mount(&server)
        .await;

    let client = make_client(&server);
    let bundle = client.password_token("alice", "p@ss").await.unwrap();
    let claims = client
        .parse_jwt_token(bundle.id_token.as_deref().unwrap())
        .unwrap();
    assert_eq!(claims.name(), Some("alice"));
    assert_eq!(claims.expires_at().unwrap().timestamp(), exp);
}

#[test]
fn test_verify_with_public_key_certificate() {
    let mut config = make_config("http://localhost:8000").with_validate_audience(false);
    config.certificate = PROVIDER_PUBLIC_KEY.into();
    let client = CasdoorClient::new(config).unwrap();

    let exp = chrono::Utc::now().timestamp() + 60;
    let token = sign_with(PROVIDER_KEY, &json!({"sub": "alice", "exp": exp}));
    assert!(client.parse_jwt_token(&token).is_ok());
}

#[test]
fn test_verify_rejects_token_without_audience_by_default() {
    let client = CasdoorClient::new(make_config("http://localhost:8000")).unwrap();
    let exp = chrono::Utc::now().timestamp() + 3600;
    let token = sign_with(PROVIDER_KEY, &json!({"sub": "alice", "exp": exp}));

    let result = client.parse_jwt_token(&token);
    assert!(matches!(result, Err(CasdoorError::InvalidAudience)));

    let relaxed = CasdoorClient::new(
        make_config("http://localhost:8000").with_validate_audience(false),
    )
    .unwrap();
    assert_eq!(
        relaxed.parse_jwt_token(&token).unwrap().subject(),
        Some("alice")
    );
}

#[test]
fn test_verify_wrong_audience_is_not_a_deny() {
    let client = CasdoorClient::new(make_config("http://localhost:8000")).unwrap();
    let exp = chrono::Utc::now().timestamp() + 60;
    let token = sign_with(PROVIDER_KEY, &json!({"sub": "alice", "aud": "other", "exp": exp}));

    let err = client.parse_jwt_token(&token).unwrap_err();
    assert!(matches!(err, CasdoorError::InvalidAudience));
    assert!(err.is_verification_failure());
}

// --- 初期化 ---

#[test]
fn test_construction_fails_fast_on_bad_certificate() {
    for certificate in [EC_PUBLIC_KEY, PROVIDER_KEY, "not a pem"] {
        let mut config = make_config("http://localhost:8000");
        config.certificate = certificate.into();
        let result = CasdoorClient::new(config);
        assert!(
            matches!(result, Err(CasdoorError::Configuration(_))),
            "certificate accepted: {certificate}"
        );
    }
}

#[test]
fn test_construction_from_yaml() {
    let yaml = format!(
        "endpoint: http://casdoor.example.com:8000\n\
         client_id: {CLIENT_ID}\n\
         client_secret: {CLIENT_SECRET}\n\
         organization_name: acme\n\
         application_name: app-acme\n\
         leeway_secs: 0\n\
         certificate: |\n{}",
        PROVIDER_CERT
            .lines()
            .map(|line| format!("  {line}\n"))
            .collect::<String>()
    );
    let config = CasdoorConfig::from_yaml_str(&yaml).unwrap();
    let client = CasdoorClient::new(config).unwrap();
    assert_eq!(client.verifier().leeway_secs(), 0);

    let link = client.auth_link("https://app/cb", None).unwrap();
    assert!(link
        .as_str()
        .starts_with("http://casdoor.example.com:7001/login/oauth/authorize?"));
}

// --- enforce ---

#[tokio::test]
async fn test_enforce_scenario_true_and_false() {
    for decision in [true, false] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/enforce"))
            .and(query_param("clientId", CLIENT_ID))
            .and(query_param("clientSecret", CLIENT_SECRET))
            .and(body_json(json!({
                "id": "acme",
                "v0": "alice",
                "v1": "/doc1",
                "v2": "read",
                "v3": "",
                "v4": ""
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!(decision)))
            .expect(1)
            .mount(&server)
            .await;

        let request = EnforcementRequest::new(
            "acme",
            PredicateVector::new(["alice", "/doc1", "read"]).unwrap(),
        );
        let result = make_client(&server).enforce(&request).await.unwrap();
        assert_eq!(result, decision);
    }
}

#[tokio::test]
async fn test_enforce_five_predicates() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/enforce"))
        .and(body_json(json!({
            "id": "acme/abac",
            "v0": "alice",
            "v1": "/doc1",
            "v2": "read",
            "v3": "tenant-a",
            "v4": "office"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "msg": "",
            "data": [true]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = EnforcementRequest::with_context(
        "acme/abac",
        "alice",
        "/doc1",
        "read",
        &["tenant-a", "office"],
    )
    .unwrap();
    assert!(make_client(&server).enforce(&request).await.unwrap());
}

#[tokio::test]
async fn test_enforce_protocol_error_is_not_a_deny() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/enforce"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"allowed": true})))
        .mount(&server)
        .await;

    let result = make_client(&server)
        .enforce(&EnforcementRequest::triple("acme", "alice", "/doc1", "read"))
        .await;
    assert!(matches!(result, Err(CasdoorError::EnforcementProtocol(_))));
}

#[tokio::test]
async fn test_enforce_rejects_non_json_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/enforce"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;

    let result = make_client(&server)
        .enforce(&EnforcementRequest::triple("acme", "alice", "/doc1", "read"))
        .await;
    assert!(matches!(result, Err(CasdoorError::EnforcementProtocol(_))));
}

#[tokio::test]
async fn test_enforce_provider_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/enforce"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .mount(&server)
        .await;

    let result = make_client(&server)
        .enforce(&EnforcementRequest::triple("acme", "alice", "/doc1", "read"))
        .await;
    assert!(matches!(
        result,
        Err(CasdoorError::Provider { status: 401, .. })
    ));
}

/// v0 が `user{i}` のルールに対し、i が 3 の倍数のときだけ許可するプロバイダー。
struct ModuloThreeProvider;

impl Respond for ModuloThreeProvider {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let rules: Vec<Value> = request.body_json().unwrap();
        let decisions: Vec<bool> = rules
            .iter()
            .map(|rule| {
                let index: usize = rule["v0"]
                    .as_str()
                    .unwrap()
                    .trim_start_matches("user")
                    .parse()
                    .unwrap();
                index % 3 == 0
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(decisions)
    }
}

#[tokio::test]
async fn test_batch_enforce_preserves_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/batch-enforce"))
        .respond_with(ModuloThreeProvider)
        // N = 0 は通信しない
        .expect(100)
        .mount(&server)
        .await;

    let client = make_client(&server);
    for n in 0..=100usize {
        let requests: Vec<EnforcementRequest> = (0..n)
            .map(|i| EnforcementRequest::triple("acme", &format!("user{i}"), "/doc", "read"))
            .collect();

        let result = client.batch_enforce(&requests).await.unwrap();
        assert_eq!(result.len(), n);
        for (i, allowed) in result.iter().enumerate() {
            assert_eq!(*allowed, i % 3 == 0, "n={n} i={i}");
        }
    }
}

#[tokio::test]
async fn test_batch_enforce_length_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/batch-enforce"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([true])))
        .mount(&server)
        .await;

    let requests = vec![
        EnforcementRequest::triple("acme", "alice", "/doc1", "read"),
        EnforcementRequest::triple("acme", "bob", "/doc1", "read"),
    ];
    let result = make_client(&server).batch_enforce(&requests).await;
    assert!(matches!(result, Err(CasdoorError::EnforcementProtocol(_))));
}

// --- モック ---

#[cfg(feature = "mock")]
#[tokio::test]
async fn test_mock_sdk_for_downstream_tests() {
    use k1s0_casdoor_client::MockCasdoorSdk;

    let mut mock = MockCasdoorSdk::new();
    mock.expect_enforce()
        .withf(|request| request.predicates.as_slice()[0] == "alice")
        .returning(|_| Ok(true));
    mock.expect_parse_jwt_token()
        .returning(|_| Err(CasdoorError::TokenExpired));

    let request = EnforcementRequest::triple("acme", "alice", "/doc1", "read");
    assert!(mock.enforce(&request).await.unwrap());
    assert!(mock
        .parse_jwt_token("expired")
        .unwrap_err()
        .is_verification_failure());
}
