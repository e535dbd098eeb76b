//! Safety levels: reply behaviour and byte-counter semantics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use strata_client::TransformationObject;
use strata_integration_tests::{TestServer, test_data_seeded};
use strata_types::{Safety, Semantics, TransformationMode, TransformationType};

/// With safety NONE a batch of three one-byte writes goes out as one
/// message and the counters are already set when execute returns.
#[tokio::test(flavor = "multi_thread")]
async fn test_unsafe_writes_fake_bytes_written() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = TransformationObject::new(&client, "safety", "o");

    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::None, TransformationMode::Client, &mut batch);
    assert!(batch.execute().await);

    let (a, b, c) = ([0x01u8], [0x02u8], [0x03u8]);
    let wrote_a = AtomicU64::new(0);
    let wrote_b = AtomicU64::new(0);
    let wrote_c = AtomicU64::new(0);

    let mut batch = client.batch(Semantics::with_safety(Safety::None));
    object.write(&a, 0, &wrote_a, &mut batch);
    object.write(&b, 1, &wrote_b, &mut batch);
    object.write(&c, 2, &wrote_c, &mut batch);
    assert!(batch.execute().await);

    assert_eq!(wrote_a.load(Ordering::SeqCst), 1);
    assert_eq!(wrote_b.load(Ordering::SeqCst), 1);
    assert_eq!(wrote_c.load(Ordering::SeqCst), 1);

    // The writes really landed.
    let mut readback = [0u8; 3];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.read(&mut readback, 0, &bytes_read, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(readback, [0x01, 0x02, 0x03]);
}

/// With safety NETWORK every write is acknowledged and the counter
/// reflects the acknowledged bytes.
#[tokio::test(flavor = "multi_thread")]
async fn test_network_safety_write_acknowledged() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = TransformationObject::new(&client, "safety", "acked");

    let mut batch = client.batch(Semantics::with_safety(Safety::Network));
    object.create(TransformationType::Xor, TransformationMode::Client, &mut batch);
    assert!(batch.execute().await);

    let data = test_data_seeded(5000, 8);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::with_safety(Safety::Network));
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_written.load(Ordering::SeqCst), 5000);

    let mut readback = vec![0u8; 5000];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::with_safety(Safety::Network));
    object.read(&mut readback, 0, &bytes_read, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(readback, data);
}

/// STORAGE safety makes the server sync before acknowledging.
#[tokio::test(flavor = "multi_thread")]
async fn test_storage_safety_syncs() {
    let server = TestServer::spawn().await;
    {
        let client = server.client();
        let object = TransformationObject::new(&client, "safety", "synced");

        let data = [9u8; 16];
        let bytes_written = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::with_safety(Safety::Storage));
        object.create(TransformationType::None, TransformationMode::Client, &mut batch);
        object.write(&data, 0, &bytes_written, &mut batch);
        assert!(batch.execute().await);
        assert_eq!(bytes_written.load(Ordering::SeqCst), 16);
        // Dropping the client closes its pooled connections, which folds
        // the per-connection statistics into the global block.
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    let stats = server.server().statistics().snapshot();
    assert!(stats.syncs >= 2, "create and write should both sync");
    assert_eq!(stats.files_created, 1);
}

/// RLE writes under server mode report the authoritative sizes back even
/// when the batch asked for no safety.
#[tokio::test(flavor = "multi_thread")]
async fn test_server_mode_write_updates_sizes_without_safety() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = TransformationObject::new(&client, "safety", "server-rle");

    let data = vec![0x05u8; 300];
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::with_safety(Safety::None));
    object.create(TransformationType::Rle, TransformationMode::Server, &mut batch);
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_written.load(Ordering::SeqCst), 300);

    let mut batch = client.batch(Semantics::default());
    let status = object.status(&mut batch);
    assert!(batch.execute().await);
    assert_eq!(status.original_size(), 300);
    assert_eq!(status.transformed_size(), 4);
}

/// A failed run leaves the batch result false while siblings complete.
#[tokio::test]
async fn test_failed_run_does_not_poison_siblings() {
    let harness = strata_integration_tests::local_harness();
    let client = &harness.client;

    let good = TransformationObject::new(client, "safety", "good");
    let mut batch = client.batch(Semantics::default());
    good.create(TransformationType::None, TransformationMode::Client, &mut batch);
    assert!(batch.execute().await);

    // Reading an object that was never created fails its run.
    let ghost = TransformationObject::new(client, "safety", "ghost");
    let data = [1u8, 2, 3, 4];
    let bytes_written = AtomicU64::new(0);
    let mut ghost_buf = [0u8; 4];
    let ghost_read = AtomicU64::new(0);

    let mut batch = client.batch(Semantics::default());
    good.write(&data, 0, &bytes_written, &mut batch);
    ghost.read(&mut ghost_buf, 0, &ghost_read, &mut batch);
    assert!(!batch.execute().await, "aggregate result must be false");

    // The sibling write still happened.
    let mut readback = [0u8; 4];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    good.read(&mut readback, 0, &bytes_read, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(readback, data);
    assert_eq!(ghost_read.load(Ordering::SeqCst), 0);
}
