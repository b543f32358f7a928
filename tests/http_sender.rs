// tests/http_sender.rs
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::item;
use feed_relay::notify::{
    Delivered, DiscordSender, Endpoint, EndpointQueue, QueueSettings, RetryPolicy, SendError,
    Shutdown, WebhookPayload, WebhookSender,
};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn payload() -> WebhookPayload {
    WebhookPayload::from_item(&item("vid42", "UC1", 3))
}

async fn send_to(server: &MockServer) -> Result<(), SendError> {
    let url = format!("{}/api/webhooks/1/token", server.uri());
    DiscordSender::default().send(&url, &payload()).await
}

#[tokio::test]
async fn posts_embed_json_and_accepts_no_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/webhooks/1/token"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "embeds": [{
                "title": "title vid42",
                "url": "https://www.youtube.com/watch?v=vid42",
                "author": { "name": "UC1 name", "url": "https://www.youtube.com/channel/UC1" }
            }]
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(send_to(&server).await, Ok(()));
}

#[tokio::test]
async fn too_many_requests_reads_retry_after_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "3"))
        .mount(&server)
        .await;

    assert_eq!(
        send_to(&server).await,
        Err(SendError::Quota {
            retry_after: Some(Duration::from_secs(3))
        })
    );
}

#[tokio::test]
async fn too_many_requests_falls_back_to_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .set_body_json(json!({ "message": "You are being rate limited.", "retry_after": 1.5, "global": false })),
        )
        .mount(&server)
        .await;

    assert_eq!(
        send_to(&server).await,
        Err(SendError::Quota {
            retry_after: Some(Duration::from_millis(1500))
        })
    );
}

#[tokio::test]
async fn too_many_requests_without_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    assert_eq!(
        send_to(&server).await,
        Err(SendError::Quota { retry_after: None })
    );
}

#[tokio::test]
async fn absurd_retry_after_is_treated_as_no_hint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e20"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({ "retry_after": 1e20 })))
        .mount(&server)
        .await;

    let quota_without_hint = Err(SendError::Quota { retry_after: None });
    assert_eq!(send_to(&server).await, quota_without_hint);
    assert_eq!(send_to(&server).await, quota_without_hint);
}

#[tokio::test]
async fn queue_survives_absurd_retry_after_and_delivers_next_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1e20"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let settings = QueueSettings {
        retry: RetryPolicy {
            base_delay: Duration::from_millis(20),
            ..RetryPolicy::default()
        },
        ..QueueSettings::default()
    };
    let (queue, worker) = EndpointQueue::spawn(
        0,
        Endpoint::new(format!("{}/api/webhooks/1/token", server.uri())),
        Arc::new(DiscordSender::default()),
        settings,
        Shutdown::new(),
    );

    let first = tokio::time::timeout(Duration::from_secs(5), queue.enqueue(Arc::new(payload())))
        .await
        .expect("quota retry finished in time");
    assert_eq!(first, Ok(Delivered { attempts: 2 }));
    let second = queue.enqueue(Arc::new(payload())).await;
    assert_eq!(second, Ok(Delivered { attempts: 1 }));

    drop(queue);
    worker.await.unwrap();
}

#[tokio::test]
async fn server_error_is_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    match send_to(&server).await {
        Err(SendError::Transport(msg)) => assert!(msg.contains("500"), "{msg}"),
        other => panic!("expected transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn unreachable_host_is_a_transport_failure() {
    let server = MockServer::start().await;
    let url = format!("{}/api/webhooks/1/token", server.uri());
    drop(server);

    let res = DiscordSender::default().send(&url, &payload()).await;
    assert!(matches!(res, Err(SendError::Transport(_))));
}
