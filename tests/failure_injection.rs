//! Failure injection tests for the tunnel.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reverse_tunnel::client::TunnelClient;

mod common;

async fn connected(
    server: &common::TestServer,
    backend: std::net::SocketAddr,
) -> (Arc<TunnelClient>, reverse_tunnel::lifecycle::Shutdown) {
    let client = Arc::new(TunnelClient::new(common::client_config(server.tunnel_addr, "s1", backend)));
    // Long interval: only the initial connect happens during a test.
    let shutdown = common::start_client(Arc::clone(&client), Duration::from_secs(60));
    common::wait_connected(&client).await;
    common::eventually(|| server.registry.find("s1").is_some()).await;
    (client, shutdown)
}

fn call(server: &common::TestServer, path: &str) -> reqwest::RequestBuilder {
    reqwest::Client::new()
        .get(server.url(path))
        .header("Session-Id", "s1")
}

#[tokio::test]
async fn refused_backend_yields_503() {
    let server = common::start_server(common::server_config(), None).await;
    let (_client, _shutdown) = connected(&server, common::closed_port().await).await;

    let response = call(&server, "/status").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    // The tunnel survives a backend failure.
    assert!(!server.registry.find("s1").unwrap().is_closed());
}

#[tokio::test]
async fn crowded_request_head_fails_alone() {
    let backend = common::start_mock_backend("ok").await;
    let server = common::start_server(common::server_config(), None).await;
    let (client, _shutdown) = connected(&server, backend).await;
    let tunnel = server.registry.find("s1").unwrap();

    let mut crowded = call(&server, "/status");
    for i in 0..70 {
        crowded = crowded.header(format!("x-h{i}"), "v");
    }
    let response = crowded.send().await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE);

    // The shared tunnel keeps serving other callers.
    assert!(!tunnel.is_closed());
    assert_eq!(client.status(), reverse_tunnel::ConnectionStatus::Connected);
    let response = call(&server, "/status").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn backend_error_status_is_passed_through() {
    let backend = common::start_programmable_backend(|| async { (404, "nothing here".to_string()) }).await;
    let server = common::start_server(common::server_config(), None).await;
    let (_client, _shutdown) = connected(&server, backend).await;

    let response = call(&server, "/nothing").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "nothing here");
}

#[tokio::test]
async fn tunnel_lost_mid_call_yields_502() {
    let backend = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, "too late".to_string())
    })
    .await;
    let server = common::start_server(common::server_config(), None).await;
    let (client, _shutdown) = connected(&server, backend).await;

    let pending = tokio::spawn(call(&server, "/slow").send());
    let tunnel = server.registry.find("s1").unwrap();
    common::eventually(|| tunnel.pending_calls() == 1).await;

    client.stop();

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text().await.unwrap(), "tunnel closed");
    common::eventually(|| server.registry.is_empty()).await;
}

#[tokio::test]
async fn unanswered_call_times_out_with_500() {
    let backend = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(3)).await;
        (200, "too late".to_string())
    })
    .await;
    let mut config = common::server_config();
    config.timeouts.request_secs = 1;
    let server = common::start_server(config, None).await;
    let (_client, _shutdown) = connected(&server, backend).await;

    let response = call(&server, "/slow").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(server.registry.find("s1").unwrap().pending_calls(), 0);
}

#[tokio::test]
async fn server_shutdown_fails_pending_calls() {
    let backend = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_secs(2)).await;
        (200, "too late".to_string())
    })
    .await;
    let server = common::start_server(common::server_config(), None).await;
    let (client, _shutdown) = connected(&server, backend).await;

    let pending = tokio::spawn(call(&server, "/slow").send());
    let tunnel = server.registry.find("s1").unwrap();
    common::eventually(|| tunnel.pending_calls() == 1).await;

    server.shutdown.trigger();

    let response = pending.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let mut status = client.subscribe();
    status
        .wait_for(|s| *s == reverse_tunnel::client::ConnectionStatus::Disconnected)
        .await
        .unwrap();
}
