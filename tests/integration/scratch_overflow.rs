//! Reply splitting when the server's scratch region overflows.
//!
//! Two 768 KiB reads against a 1 MiB scratch region force the server to
//! flush the reply after the first operation; the client keeps receiving
//! until every operation is answered.

use std::sync::atomic::{AtomicU64, Ordering};

use strata_client::TransformationObject;
use strata_integration_tests::{TestServer, test_data_seeded};
use strata_types::{Semantics, TransformationMode, TransformationType};

const KIB: usize = 1024;

#[tokio::test(flavor = "multi_thread")]
async fn test_two_reads_overflow_one_stripe() {
    let server = TestServer::spawn_with_stripe(1024 * KIB).await;
    let client = server.client_with_max_operation_size(1024 * KIB as u64);
    let object = TransformationObject::new(&client, "stripe", "big");

    let data = test_data_seeded(1536 * KIB, 21);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::None, TransformationMode::Client, &mut batch);
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    // Both 768 KiB operations ride in one message; the server cannot
    // stage both in its 1 MiB scratch region at once.
    let mut first = vec![0u8; 768 * KIB];
    let mut second = vec![0u8; 768 * KIB];
    let first_read = AtomicU64::new(0);
    let second_read = AtomicU64::new(0);

    let mut batch = client.batch(Semantics::default());
    object.read(&mut first, 0, &first_read, &mut batch);
    object.read(&mut second, 768 * KIB as u64, &second_read, &mut batch);
    assert!(batch.execute().await);

    assert_eq!(first_read.load(Ordering::SeqCst), 768 * KIB as u64);
    assert_eq!(second_read.load(Ordering::SeqCst), 768 * KIB as u64);
    assert_eq!(first, &data[..768 * KIB]);
    assert_eq!(second, &data[768 * KIB..]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_many_small_reads_across_several_flushes() {
    let server = TestServer::spawn_with_stripe(64 * KIB).await;
    let client = server.client_with_max_operation_size(64 * KIB as u64);
    let object = TransformationObject::new(&client, "stripe", "many");

    let data = test_data_seeded(512 * KIB, 22);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::None, TransformationMode::Client, &mut batch);
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    // Thirty-two 16 KiB reads against a 64 KiB scratch region: the reply
    // must be split repeatedly.
    let mut readback = vec![0u8; 512 * KIB];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    for (i, window) in readback.chunks_mut(16 * KIB).enumerate() {
        object.read(window, (i * 16 * KIB) as u64, &bytes_read, &mut batch);
    }
    assert!(batch.execute().await);
    assert_eq!(readback, data);
}

/// A single operation larger than the scratch region still succeeds.
#[tokio::test(flavor = "multi_thread")]
async fn test_single_read_larger_than_stripe() {
    let server = TestServer::spawn_with_stripe(64 * KIB).await;
    let client = server.client_with_max_operation_size(256 * KIB as u64);
    let object = TransformationObject::new(&client, "stripe", "oversize");

    let data = test_data_seeded(256 * KIB, 23);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::None, TransformationMode::Client, &mut batch);
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    let mut readback = vec![0u8; 256 * KIB];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.read(&mut readback, 0, &bytes_read, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_read.load(Ordering::SeqCst), 256 * KIB as u64);
    assert_eq!(readback, data);
}
