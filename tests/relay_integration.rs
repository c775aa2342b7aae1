//! End-to-end relay behaviour over loopback TCP.

use std::sync::atomic::Ordering;
use std::time::Duration;

use pool_relay::config::{RelayConfig, ResponseFraming};

mod common;

use common::LineClient;

#[tokio::test]
async fn test_synthesized_response_without_backend() {
    let relay = common::start_relay(RelayConfig::default()).await;

    let mut client = LineClient::connect(relay.addr).await;
    client.send(b"{\"id\":7}\n").await;

    let received = client.read_to_end().await;
    assert_eq!(received, b"{\"id\":7, \"result\": null, \"error\": 25}\n".to_vec());

    relay.shutdown.trigger();
    relay.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_persistent_connection_serves_several_requests() {
    let mut config = RelayConfig::default();
    config.session.persistent = true;
    let relay = common::start_relay(config).await;

    let mut client = LineClient::connect(relay.addr).await;
    for id in 1..=3 {
        let reply = client
            .request(&format!("{{\"id\":{},\"method\":\"mining.submit\"}}", id))
            .await;
        assert_eq!(reply, format!("{{\"id\":{}, \"result\": null, \"error\": 25}}\n", id));
    }

    client.finish().await;
    assert!(client.read_to_end().await.is_empty());

    relay.shutdown.trigger();
}

#[tokio::test]
async fn test_crlf_frames_are_accepted() {
    let mut config = RelayConfig::default();
    config.session.persistent = true;
    let relay = common::start_relay(config).await;

    let mut client = LineClient::connect(relay.addr).await;
    client.send(b"{\"id\":42}\r\n").await;
    assert_eq!(
        client.read_line().await,
        "{\"id\":42, \"result\": null, \"error\": 25}\n"
    );

    relay.shutdown.trigger();
}

#[tokio::test]
async fn test_line_backend_connection_is_reused() {
    let (backend, connections) = common::start_line_backend("pool").await;
    let mut config = common::backend_config(backend);
    config.session.persistent = true;
    let relay = common::start_relay(config).await;

    let mut client = LineClient::connect(relay.addr).await;
    assert_eq!(client.request("{\"id\":1}").await, "pool:{\"id\":1}\n");
    assert_eq!(client.request("{\"id\":2}").await, "pool:{\"id\":2}\n");
    assert_eq!(connections.load(Ordering::SeqCst), 1);

    relay.shutdown.trigger();
}

#[tokio::test]
async fn test_until_close_response_is_relayed_in_full() {
    let body: Vec<u8> = (0..50_000u32).map(|i| (i % 251) as u8).collect();
    let backend = common::start_until_close_backend(body.clone()).await;

    let mut config = common::backend_config(backend);
    config.backend.response_framing = ResponseFraming::UntilClose;
    config.session.relay_buffer_bytes = 1024;
    let relay = common::start_relay(config).await;

    let mut client = LineClient::connect(relay.addr).await;
    client.send(b"{\"id\":1,\"method\":\"getblocktemplate\"}\n").await;

    assert_eq!(client.read_to_end().await, body);

    relay.shutdown.trigger();
}

#[tokio::test]
async fn test_reload_switches_backend_for_new_sessions() {
    let (first, _) = common::start_line_backend("first").await;
    let (second, _) = common::start_line_backend("second").await;

    let mut config = common::backend_config(first);
    config.session.persistent = true;
    let relay = common::start_relay(config.clone()).await;

    let mut client = LineClient::connect(relay.addr).await;
    assert_eq!(client.request("{\"id\":1}").await, "first:{\"id\":1}\n");

    config.backend.port = second.port();
    relay.updates.send(config).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Existing sessions redial on their next request.
    assert_eq!(client.request("{\"id\":2}").await, "second:{\"id\":2}\n");

    let mut fresh = LineClient::connect(relay.addr).await;
    assert_eq!(fresh.request("{\"id\":3}").await, "second:{\"id\":3}\n");

    relay.shutdown.trigger();
}
