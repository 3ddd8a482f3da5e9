use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{
        Request, StatusCode,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
};
use clerk::{Clock, ManualClock, Validity};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use server::{
    config::Config,
    database::{DocumentStore, ELEVATED_IDS, MENU, ORDERS},
    identity::{Claims, IdentityVerifier, Verification, VerifierError},
    router,
    state::State,
};
use tower::ServiceExt;

const START: i64 = 1_700_000_000_000_000;
const TTL_MS: i64 = 5_000;
const TTL: i64 = TTL_MS * 1_000;

/// Assertion strings stand in for real identity tokens.
struct FakeIdentity;

#[async_trait]
impl IdentityVerifier for FakeIdentity {
    async fn verify(&self, assertion: &str) -> Result<Verification, VerifierError> {
        let claims = |email: &str, is_elevated| Claims {
            subject: "1234".into(),
            email: email.into(),
            hosted_domain: None,
            issued_at: START - 1,
            expires_at: START + TTL,
            is_elevated,
        };

        match assertion {
            "dev" => Ok(Verification::Verified(claims("thebinaryminer@gmail.com", true))),
            "user" => Ok(Verification::Verified(claims("someone@gmail.com", false))),
            "wrong-issuer" => Ok(Verification::WrongIssuer("evil.example.com".into())),
            "expired" => Ok(Verification::Expired {
                issued_at: 0,
                expires_at: 1,
            }),
            _ => Err(VerifierError::Malformed("secret upstream detail".into())),
        }
    }
}

struct Harness {
    router: Router,
    clock: Arc<ManualClock>,
    state: Arc<State>,
}

impl Harness {
    fn new() -> Self {
        Self::with_documents(DocumentStore::with_defaults())
    }

    fn with_documents(documents: DocumentStore) -> Self {
        let clock = ManualClock::new(START);
        let config = Config {
            token_ttl_ms: TTL_MS,
            ..Config::default()
        };

        let state = State::assemble(
            config,
            clock.clone(),
            Arc::new(documents),
            Arc::new(FakeIdentity),
        );

        Self {
            router: router(state.clone()),
            clock,
            state,
        }
    }

    fn now(&self) -> i64 {
        self.clock.now_micros()
    }

    fn envelope(&self, verb: &str, data: Value, anticsrf: Option<&str>) -> Value {
        let mut envelope = json!({
            "verb": verb,
            "data": data,
            "time": { "conn_init": self.now() - 1 },
        });
        if let Some(token) = anticsrf {
            envelope["anticsrf"] = json!(token);
        }
        envelope
    }

    async fn send(&self, message: &Value) -> (StatusCode, Value) {
        self.send_raw(Some("application/json"), true, message.to_string())
            .await
    }

    async fn send_raw(
        &self,
        content_type: Option<&str>,
        with_length: bool,
        body: String,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method("POST").uri("/");
        if let Some(content_type) = content_type {
            request = request.header(CONTENT_TYPE, content_type);
        }
        if with_length {
            request = request.header(CONTENT_LENGTH, body.len());
        }

        let response = self
            .router
            .clone()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        (status, serde_json::from_slice(&bytes).unwrap())
    }

    async fn sign_in(&self, assertion: &str) -> String {
        let (status, reply) = self
            .send(&self.envelope("gapi_validate", json!({ "gapi_key": assertion }), None))
            .await;
        assert_eq!(status, StatusCode::OK, "{reply}");

        reply["anticsrf"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn test_scenario_a_valid_token_admitted() {
    let harness = Harness::new();
    let t1 = harness.state.tokens.register().unwrap();

    let message = harness.envelope("view_menu", json!({}), Some(&t1.value));
    let (status, reply) = harness.send(&message).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"], "view_menu_reply");
    assert_eq!(reply["data"], json!({}));
    assert_eq!(reply["time"]["conn_init"], message["time"]["conn_init"]);
    assert_eq!(reply["time"]["conn_server"], START);
    assert!(reply.get("anticsrf").is_none());
}

#[tokio::test]
async fn test_scenario_b_expired_token_reports_expiry() {
    let harness = Harness::new();
    let t1 = harness.state.tokens.register().unwrap();

    harness.clock.advance(TTL);
    let (status, reply) = harness
        .send(&harness.envelope("view_menu", json!({}), Some(&t1.value)))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["response"], "view_menu_reply");
    assert_eq!(reply["data"]["error"], "expired_token");
    assert_eq!(reply["data"]["expired_at"], t1.issued_at + TTL);
}

#[tokio::test]
async fn test_token_valid_until_last_microsecond() {
    let harness = Harness::new();
    let t1 = harness.state.tokens.register().unwrap();

    harness.clock.advance(TTL - 1);
    let (status, _) = harness
        .send(&harness.envelope("view_menu", json!({}), Some(&t1.value)))
        .await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_scenario_c_ping_exempt() {
    let harness = Harness::new();

    let (status, reply) = harness
        .send(&harness.envelope("ping", json!({ "ping": "hello" }), None))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["response"], "ping_reply");
    assert_eq!(reply["data"]["pingback"], true);
}

#[tokio::test]
async fn test_scenario_d_unparsable_body() {
    let harness = Harness::new();

    let (status, reply) = harness
        .send_raw(Some("application/json"), true, "{\"verb\": ".into())
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["response"], "error_reply");
    assert_eq!(reply["data"]["error"], "malformed_payload");
    assert_eq!(reply["time"]["conn_init"], Value::Null);
}

#[tokio::test]
async fn test_scenario_e_unknown_verb() {
    let harness = Harness::new();
    let token = harness.state.tokens.register().unwrap();

    let (status, reply) = harness
        .send(&harness.envelope("unknown_verb", json!({}), Some(&token.value)))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply["data"]["error"], "bad_verb");
    assert!(
        reply["data"]["explanation"]
            .as_str()
            .unwrap()
            .contains("unknown_verb")
    );
}

#[tokio::test]
async fn test_unknown_verb_without_token_is_unauthorized() {
    let harness = Harness::new();

    let (status, _) = harness
        .send(&harness.envelope("unknown_verb", json!({}), None))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_non_json_content() {
    let harness = Harness::new();
    let body = harness.envelope("ping", json!({}), None).to_string();

    for content_type in [Some("text/plain"), None] {
        let (status, reply) = harness.send_raw(content_type, true, body.clone()).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["data"]["error"], "non_json_content");
    }
}

#[tokio::test]
async fn test_missing_length() {
    let harness = Harness::new();
    let body = harness.envelope("ping", json!({}), None).to_string();

    let (status, reply) = harness
        .send_raw(Some("application/json"), false, body)
        .await;

    assert_eq!(status, StatusCode::LENGTH_REQUIRED);
    assert_eq!(reply["data"]["error"], "length_required");
}

#[tokio::test]
async fn test_missing_keys_named() {
    let harness = Harness::new();

    for key in ["verb", "data", "time"] {
        let mut message = harness.envelope("ping", json!({}), None);
        message.as_object_mut().unwrap().remove(key);

        let (status, reply) = harness.send(&message).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["data"]["error"], "missing_field");
        assert!(
            reply["data"]["explanation"]
                .as_str()
                .unwrap()
                .ends_with(key)
        );
    }
}

#[tokio::test]
async fn test_structural_rejection_named_after_verb() {
    let harness = Harness::new();

    let mut message = harness.envelope("view_menu", json!({}), None);
    message.as_object_mut().unwrap().remove("data");
    let (status, reply) = harness.send(&message).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["response"], "view_menu_reply");
    assert_eq!(reply["time"]["conn_init"], message["time"]["conn_init"]);

    message["verb"] = json!(12);
    message["data"] = json!({});
    let (status, reply) = harness.send(&message).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(reply["response"], "error_reply");
    assert_eq!(reply["time"]["conn_init"], message["time"]["conn_init"]);
}

#[tokio::test]
async fn test_freshness_boundary() {
    let harness = Harness::new();

    let mut message = harness.envelope("ping", json!({}), None);
    message["time"]["conn_init"] = json!(harness.now() + 1_000_000);
    let (status, reply) = harness.send(&message).await;

    assert_eq!(status, StatusCode::NOT_ACCEPTABLE);
    assert_eq!(reply["data"]["error"], "future_timestamp");
    assert_eq!(reply["time"]["conn_init"], harness.now() + 1_000_000);

    message["time"]["conn_init"] = json!(harness.now() - 1);
    let (status, _) = harness.send(&message).await;

    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_stale_timestamp_accepted() {
    let harness = Harness::new();

    let mut message = harness.envelope("ping", json!({}), None);
    message["time"]["conn_init"] = json!(0);

    assert_eq!(harness.send(&message).await.0, StatusCode::OK);
}

#[tokio::test]
async fn test_future_timestamp_checked_before_token() {
    let harness = Harness::new();

    let mut message = harness.envelope("view_menu", json!({}), None);
    message["time"]["conn_init"] = json!(harness.now() + 1);

    assert_eq!(harness.send(&message).await.0, StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn test_token_rejections() {
    let harness = Harness::new();

    let cases = [
        (None, "missing_token"),
        (Some(""), "missing_token"),
        (Some("never-issued"), "never_registered"),
    ];

    for (token, error) in cases {
        let (status, reply) = harness
            .send(&harness.envelope("view_menu", json!({}), token))
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reply["data"]["error"], error);
    }
}

#[tokio::test]
async fn test_sign_in_issues_usable_token() {
    let harness = Harness::new();

    let token = harness.sign_in("user").await;

    assert_eq!(token.len(), 84);
    assert!(matches!(
        harness.state.tokens.validate(&token),
        Validity::Valid { expires_at } if expires_at == START + TTL
    ));

    let (status, _) = harness
        .send(&harness.envelope("view_menu", json!({}), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_sign_in_reply_carries_claims() {
    let harness = Harness::new();

    let (_, reply) = harness
        .send(&harness.envelope("gapi_validate", json!({ "gapi_key": "dev" }), None))
        .await;

    assert_eq!(reply["response"], "gapi_validate_reply");
    assert_eq!(reply["data"]["gapi_info"]["email"], "thebinaryminer@gmail.com");
    assert_eq!(reply["data"]["gapi_info"]["is_elevated"], true);
}

#[tokio::test]
async fn test_refused_identity_issues_nothing() {
    let harness = Harness::new();

    for assertion in [json!("wrong-issuer"), json!("expired")] {
        let (status, reply) = harness
            .send(&harness.envelope("gapi_validate", json!({ "gapi_key": assertion }), None))
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(reply["data"]["error"], "handler_error");
        assert!(reply.get("anticsrf").is_none());
    }

    let (status, _) = harness
        .send(&harness.envelope("gapi_validate", json!({}), None))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(harness.state.tokens.live_len(), 0);
}

#[tokio::test]
async fn test_identity_service_fault_hides_internals() {
    let harness = Harness::new();

    let (status, reply) = harness
        .send(&harness.envelope("gapi_validate", json!({ "gapi_key": "down" }), None))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply["data"]["error"], "internal_error");
    assert!(!reply.to_string().contains("secret upstream detail"));
    assert_eq!(harness.state.tokens.live_len(), 0);
}

#[tokio::test]
async fn test_edit_menu_requires_elevation() {
    let harness = Harness::new();
    let token = harness.sign_in("user").await;
    let menu = json!({ "soup": { "price": 3 } });

    let (status, reply) = harness
        .send(&harness.envelope(
            "edit_menu",
            json!({ "gapi_key": "user", "menu_data": menu }),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["data"]["error"], "handler_error");

    let (status, reply) = harness
        .send(&harness.envelope(
            "edit_menu",
            json!({ "gapi_key": "dev", "menu_data": menu }),
            Some(&token),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["data"]["result"], "edit registered");

    let (_, reply) = harness
        .send(&harness.envelope("view_menu", json!({}), Some(&token)))
        .await;
    assert_eq!(reply["data"], menu);
}

#[tokio::test]
async fn test_edit_menu_missing_keys() {
    let harness = Harness::new();
    let token = harness.sign_in("dev").await;

    let (status, _) = harness
        .send(&harness.envelope("edit_menu", json!({ "gapi_key": "dev" }), Some(&token)))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_view_orders() {
    let harness = Harness::with_documents(DocumentStore::from_documents([
        (MENU.to_string(), json!({})),
        (ELEVATED_IDS.to_string(), json!({})),
        (
            ORDERS.to_string(),
            json!({ "cur_orders": [1, 2, 3, 4], "old_orders": ["a"] }),
        ),
    ]));
    let token = harness.state.tokens.register().unwrap().value;

    let cases = [
        (json!({}), json!([1, 2, 3, 4])),
        (json!({ "count": 2 }), json!([1, 2])),
        (json!({ "count": "2", "from_end": "tail" }), json!([4, 3])),
        (json!({ "age": "old" }), json!(["a"])),
    ];

    for (data, expected) in cases {
        let (status, reply) = harness
            .send(&harness.envelope("view_orders", data, Some(&token)))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(reply["data"], expected);
    }
}

#[tokio::test]
async fn test_sign_out_revokes_own_token() {
    let harness = Harness::new();
    let token = harness.sign_in("user").await;
    harness.clock.advance(10);

    let (status, reply) = harness
        .send(&harness.envelope("sign_out", json!({}), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reply["data"]["revoked"], 1);

    let (status, reply) = harness
        .send(&harness.envelope("view_menu", json!({}), Some(&token)))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(reply["data"]["error"], "expired_token");
    assert_eq!(reply["data"]["expired_at"], START + TTL);
}

#[tokio::test]
async fn test_concurrent_requests_share_token() {
    let harness = Arc::new(Harness::new());
    let token = harness.state.tokens.register().unwrap().value;

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let harness = harness.clone();
            let token = token.clone();
            tokio::spawn(async move {
                harness
                    .send(&harness.envelope("view_menu", json!({}), Some(&token)))
                    .await
                    .0
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::OK);
    }
    assert_eq!(harness.state.tokens.live_len(), 1);
}

#[tokio::test]
async fn test_hello() {
    let harness = Harness::new();

    let response = harness
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let reply: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(reply, json!({ "hello": "world", "received": "ok" }));
}
