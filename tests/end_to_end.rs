//! End-to-end tests: caller → front-end → tunnel → client → local backend.

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use reverse_tunnel::client::{ConnectionStatus, TunnelClient};

mod common;

#[tokio::test]
async fn status_request_round_trips_through_tunnel() {
    let backend = common::start_mock_backend("ok").await;
    let server = common::start_server(common::server_config(), None).await;

    let client = Arc::new(TunnelClient::new(common::client_config(server.tunnel_addr, "s1", backend)));
    let _client_shutdown = common::start_client(Arc::clone(&client), Duration::from_secs(30));
    common::wait_connected(&client).await;
    common::eventually(|| server.registry.find("s1").is_some()).await;

    let response = reqwest::Client::new()
        .get(server.url("/status"))
        .header("Session-Id", "s1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("tid-j").is_none());
    assert_eq!(response.text().await.unwrap(), "ok");
}

#[tokio::test]
async fn missing_session_id_is_400() {
    let server = common::start_server(common::server_config(), None).await;

    let response = reqwest::get(server.url("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_session_is_404() {
    let server = common::start_server(common::server_config(), None).await;

    let response = reqwest::Client::new()
        .get(server.url("/status"))
        .header("Session-Id", "missing")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn concurrent_calls_share_one_tunnel() {
    let backend = common::start_programmable_backend(|| async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        (200, "pong".to_string())
    })
    .await;
    let server = common::start_server(common::server_config(), None).await;

    let client = Arc::new(TunnelClient::new(common::client_config(server.tunnel_addr, "s1", backend)));
    let _client_shutdown = common::start_client(Arc::clone(&client), Duration::from_secs(30));
    common::wait_connected(&client).await;
    common::eventually(|| server.registry.find("s1").is_some()).await;

    let http = reqwest::Client::new();
    let calls: Vec<_> = (0..20)
        .map(|i| {
            let request = http
                .post(server.url(&format!("/ping/{i}")))
                .header("Session-Id", "s1")
                .body(format!("call {i}"))
                .send();
            tokio::spawn(request)
        })
        .collect();

    for call in calls {
        let response = call.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "pong");
    }
    assert_eq!(server.registry.len(), 1);
}

#[tokio::test]
async fn tunnel_over_tls_with_custom_ca() {
    let (acceptor, ca_path) = common::self_signed_tls();
    let backend = common::start_mock_backend("secure").await;
    let server = common::start_server(common::server_config(), Some(acceptor)).await;

    let mut config = common::client_config(server.tunnel_addr, "s1", backend);
    config.tls.enabled = true;
    config.tls.verify = true;
    config.tls.ca_cert_path = Some(ca_path.to_string_lossy().into_owned());
    config.tls.server_name = Some("localhost".into());

    let seen_subjects = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let recorder = Arc::clone(&seen_subjects);
    let client = Arc::new(TunnelClient::new(config).with_verify_hook(Arc::new(
        move |preverified: bool, subject: &str| {
            recorder.lock().unwrap().push(subject.to_string());
            preverified && subject.contains(common::TEST_CERT_CN)
        },
    )));
    let _client_shutdown = common::start_client(Arc::clone(&client), Duration::from_secs(30));
    common::wait_connected(&client).await;
    common::eventually(|| server.registry.find("s1").is_some()).await;
    {
        let subjects = seen_subjects.lock().unwrap();
        assert!(!subjects.is_empty());
        // The hook sees the presented certificate, not the requested name.
        assert!(subjects.iter().all(|s| s.contains(common::TEST_CERT_CN) && s != "localhost"));
    }

    let response = reqwest::Client::new()
        .get(server.url("/"))
        .header("Session-Id", "s1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "secure");

    let _ = std::fs::remove_file(ca_path);
}

#[tokio::test]
async fn rejecting_hook_keeps_client_disconnected() {
    let (acceptor, ca_path) = common::self_signed_tls();
    let server = common::start_server(common::server_config(), Some(acceptor)).await;

    let mut config = common::client_config(server.tunnel_addr, "s1", common::closed_port().await);
    config.tls.enabled = true;
    config.tls.ca_cert_path = Some(ca_path.to_string_lossy().into_owned());
    config.tls.server_name = Some("localhost".into());

    let client = Arc::new(
        TunnelClient::new(config).with_verify_hook(Arc::new(|_: bool, _: &str| false)),
    );
    let mut status = client.subscribe();
    assert!(client.start_session());
    status
        .wait_for(|s| *s == ConnectionStatus::Disconnected)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.registry.is_empty());
    let _ = std::fs::remove_file(ca_path);
}

#[tokio::test]
async fn client_reconnects_once_server_is_up() {
    let reserved = common::closed_port().await;
    let backend = common::start_mock_backend("back").await;

    let client = Arc::new(TunnelClient::new(common::client_config(reserved, "s1", backend)));
    let _client_shutdown = common::start_client(Arc::clone(&client), Duration::from_millis(200));

    // Server comes up after the first attempts have failed.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(client.status(), ConnectionStatus::Connected);

    let mut config = common::server_config();
    config.tunnel.bind_address = reserved.to_string();
    let server = common::start_server(config, None).await;

    common::wait_connected(&client).await;
    common::eventually(|| server.registry.find("s1").is_some()).await;
}

#[tokio::test]
async fn lost_session_is_re_established() {
    let backend = common::start_mock_backend("ok").await;
    let server = common::start_server(common::server_config(), None).await;

    let client = Arc::new(TunnelClient::new(common::client_config(server.tunnel_addr, "s1", backend)));
    let _client_shutdown = common::start_client(Arc::clone(&client), Duration::from_millis(200));
    common::wait_connected(&client).await;
    common::eventually(|| server.registry.find("s1").is_some()).await;
    let first = server.registry.find("s1").unwrap();

    // Drop the live session; the monitor must bring up a new one.
    client.stop();
    common::eventually(|| first.is_closed()).await;
    common::wait_connected(&client).await;
    common::eventually(|| {
        server
            .registry
            .find("s1")
            .is_some_and(|current| !Arc::ptr_eq(&current, &first))
    })
    .await;
}

#[tokio::test]
async fn server_shutdown_stops_front_end() {
    let server = common::start_server(common::server_config(), None).await;
    server.shutdown.trigger();

    common::eventually(|| std::net::TcpStream::connect(server.front_addr).is_err()).await;
}
