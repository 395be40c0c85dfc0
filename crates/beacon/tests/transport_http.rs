use std::time::Duration;

use beacon::api;
use beacon::transport::{HttpTransport, Transport};
use beacon_core::error::ClientError;
use beacon_protocol::{AskEvent, AskRequest, SubmitParamsRequest, SubmitResponse};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer, token: Option<&str>) -> HttpTransport {
    let mut t = HttpTransport::new(&server.uri(), Duration::from_secs(5)).unwrap();
    t.set_token(token.map(str::to_owned));
    t
}

#[tokio::test]
async fn login_posts_credentials_and_returns_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_json(json!({"email": "a@b.c", "password": "pw"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let t = transport(&server, None);
    let token = api::login(&t, "a@b.c", "pw").await.unwrap();
    assert_eq!(token, "tok-1");
}

#[tokio::test]
async fn requests_carry_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/workflows"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "workflows": [{"name": "morning_briefing"}]
        })))
        .mount(&server)
        .await;

    let t = transport(&server, Some("tok-1"));
    let workflows = api::list_workflows(&t).await.unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].name, "morning_briefing");
}

#[tokio::test]
async fn status_codes_map_to_error_kinds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/runs"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs/missing"))
        .respond_with(
            ResponseTemplate::new(404).set_body_json(json!({"message": "no such run"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/modules"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .mount(&server)
        .await;

    let t = transport(&server, Some("stale"));

    let err = api::list_runs(&t).await.unwrap_err();
    assert!(matches!(err, ClientError::Auth), "{err:?}");

    let err = api::run_detail(&t, "missing").await.unwrap_err();
    match err {
        ClientError::NotFound(msg) => assert!(msg.contains("no such run"), "{msg}"),
        other => panic!("unexpected: {other:?}"),
    }

    let err = api::list_modules(&t).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)), "{err:?}");
}

#[tokio::test]
async fn validation_errors_carry_field_messages() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/integrations/github"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "errors": {"token": "required"}
        })))
        .mount(&server)
        .await;

    let t = transport(&server, Some("tok"));
    let err = api::save_integration_fields(&t, "github", Default::default())
        .await
        .unwrap_err();
    match err {
        ClientError::ServerValidation { fields, .. } => {
            assert_eq!(fields.get("token").map(String::as_str), Some("required"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn models_are_fetched_by_cursor() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/integrations/llm/providers/openai/accounts/work/models"))
        .and(query_param("limit", "2"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "gpt-c"}],
            "has_more": false
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/integrations/llm/providers/openai/accounts/work/models"))
        .and(query_param("limit", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{"id": "gpt-a"}, {"id": "gpt-b"}],
            "next_cursor": "c2",
            "has_more": true
        })))
        .mount(&server)
        .await;

    let t = transport(&server, Some("tok"));
    let first = api::list_models(&t, "llm", "openai", "work", 2, None)
        .await
        .unwrap();
    assert_eq!(first.items.len(), 2);
    assert!(first.has_more);
    assert_eq!(first.next_cursor.as_deref(), Some("c2"));

    let second = api::list_models(&t, "llm", "openai", "work", 2, Some("c2"))
        .await
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, "gpt-c");
    assert!(!second.has_more);
}

#[tokio::test]
async fn ask_stream_yields_decoded_events() {
    let server = MockServer::start().await;
    let body = concat!(
        "data: {\"type\":\"route\",\"context\":{\"type\":\"workflow\",\"target\":\"notes\"}}\n\n",
        ": keepalive\n\n",
        "data: {\"type\":\"chunk\",\"text\":\"hel\"}\n\n",
        "data: {\"type\":\"chunk\",\"text\":\"lo\"}\n\n",
        "data: {\"type\":\"done\"}\n\n",
    );
    Mock::given(method("POST"))
        .and(path("/ask"))
        .and(header("accept", "text/event-stream"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
        .mount(&server)
        .await;

    let t = transport(&server, Some("tok"));
    let request = AskRequest {
        text: "hello".to_owned(),
        context: None,
    };
    let mut stream = api::ask(&t, &request, CancellationToken::new())
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(item) = stream.recv().await {
        events.push(serde_json::from_value::<AskEvent>(item.unwrap()).unwrap());
    }
    assert_eq!(events.len(), 4);
    assert!(matches!(&events[0], AskEvent::Route { context } if context.target.as_deref() == Some("notes")));
    assert_eq!(
        events[1],
        AskEvent::Chunk {
            text: "hel".to_owned()
        }
    );
    assert_eq!(events[3], AskEvent::Done);
}

#[tokio::test]
async fn ask_rejected_before_streaming_maps_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ask"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let t = transport(&server, Some("tok"));
    let request = AskRequest {
        text: "hello".to_owned(),
        context: None,
    };
    let err = api::ask(&t, &request, CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ClientError::Auth), "{err:?}");
}

#[tokio::test]
async fn submit_params_decodes_tagged_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/params"))
        .and(body_json(json!({"target": "notes.create", "values": {"title": "x"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "executed",
            "result": {"id": 7}
        })))
        .mount(&server)
        .await;

    let t = transport(&server, Some("tok"));
    let mut values = serde_json::Map::new();
    values.insert("title".to_owned(), json!("x"));
    let resp = api::submit_params(
        &t,
        &SubmitParamsRequest {
            target: "notes.create".to_owned(),
            values,
        },
    )
    .await
    .unwrap();
    assert_eq!(
        resp,
        SubmitResponse::Executed {
            result: json!({"id": 7})
        }
    );
}

#[tokio::test]
async fn base_url_path_prefix_is_kept() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/runs/r1/dismiss"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut t = transport(&server, Some("tok"));
    t.set_base_url(&format!("{}/api/v1", server.uri())).unwrap();
    api::dismiss_run(&t, "r1").await.unwrap();
}
