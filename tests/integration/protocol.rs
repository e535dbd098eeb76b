//! Wire-level services: KV forwarding, ping, statistics.

use std::sync::atomic::AtomicU64;
use std::time::Duration;

use strata_client::TransformationObject;
use strata_integration_tests::{TestServer, test_data_seeded};
use strata_types::{BackendKind, Safety, Semantics, TransformationMode, TransformationType};

#[tokio::test(flavor = "multi_thread")]
async fn test_kv_put_get_delete_over_the_wire() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let semantics = Semantics::with_safety(Safety::Network);

    client
        .kv_put("app", "greeting", b"hello", &semantics)
        .await
        .unwrap();
    assert_eq!(
        client.kv_get("app", "greeting").await.unwrap(),
        Some(b"hello".to_vec())
    );

    client.kv_delete("app", "greeting", &semantics).await.unwrap();
    assert_eq!(client.kv_get("app", "greeting").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kv_get_missing_returns_none() {
    let server = TestServer::spawn().await;
    let client = server.client();
    assert_eq!(client.kv_get("app", "ghost").await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kv_scans_over_the_wire() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let semantics = Semantics::default();

    client.kv_put("scan", "a_1", b"v1", &semantics).await.unwrap();
    client.kv_put("scan", "a_2", b"v2", &semantics).await.unwrap();
    client.kv_put("scan", "b_1", b"v3", &semantics).await.unwrap();
    client.kv_put("other", "a_1", b"v4", &semantics).await.unwrap();

    let mut all = client.kv_get_all("scan").await.unwrap();
    all.sort();
    assert_eq!(all, vec![b"v1".to_vec(), b"v2".to_vec(), b"v3".to_vec()]);

    let mut prefixed = client.kv_get_by_prefix("scan", "a_").await.unwrap();
    prefixed.sort();
    assert_eq!(prefixed, vec![b"v1".to_vec(), b"v2".to_vec()]);

    assert!(client.kv_get_all("empty").await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_kv_binary_values_survive_the_wire() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let value: Vec<u8> = (0..=255).collect();

    client
        .kv_put("bin", "blob", &value, &Semantics::default())
        .await
        .unwrap();
    assert_eq!(client.kv_get("bin", "blob").await.unwrap(), Some(value));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ping_advertises_backends() {
    let server = TestServer::spawn().await;
    let client = server.client();

    let backends = client.ping(BackendKind::Object, 0).await.unwrap();
    assert_eq!(backends, vec!["object".to_string(), "kv".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_statistics_count_traffic() {
    let server = TestServer::spawn().await;
    {
        let client = server.client();
        let object = TransformationObject::new(&client, "stats", "o");
        let data = test_data_seeded(2048, 9);

        let bytes_written = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::with_safety(Safety::Network));
        object.create(TransformationType::None, TransformationMode::Client, &mut batch);
        object.write(&data, 0, &bytes_written, &mut batch);
        assert!(batch.execute().await);

        let mut readback = vec![0u8; 2048];
        let bytes_read = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::default());
        object.read(&mut readback, 0, &bytes_read, &mut batch);
        assert!(batch.execute().await);
    }

    // Counters fold into the global block when the connections close.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = server.server().statistics().snapshot();
    assert_eq!(stats.files_created, 1);
    assert!(stats.bytes_received >= 2048);
    assert!(stats.bytes_read >= 2048);
    assert!(stats.bytes_sent >= 2048);

    // The same numbers are visible over the wire.
    let client = server.client();
    let remote = client.server_statistics(0).await.unwrap();
    assert_eq!(remote.files_created, 1);
    assert!(remote.bytes_received >= 2048);
}
