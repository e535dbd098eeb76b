//! Chunked transformation objects: boundary splitting, on-demand chunk
//! creation, aggregation, and equivalence with flat objects.

use std::sync::atomic::{AtomicU64, Ordering};

use strata_backend::{ObjectHandle as _, ObjectStore};
use strata_client::{ChunkedTransformationObject, TransformationObject};
use strata_integration_tests::{TestServer, local_harness, runs_data_seeded, test_data_seeded};
use strata_types::{Semantics, TransformationMode, TransformationType};

/// A 100-byte write at offset 50 with 64-byte chunks lands in three
/// chunks at the expected local ranges.
#[tokio::test]
async fn test_write_straddles_chunk_boundaries() {
    let harness = local_harness();
    let client = &harness.client;
    let object = ChunkedTransformationObject::new(client, "bench", "tiled");

    let data: Vec<u8> = (0..100u8).collect();
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(
        TransformationType::None,
        TransformationMode::Client,
        64,
        &mut batch,
    );
    object.write(&data, 50, &bytes_written, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_written.load(Ordering::SeqCst), 100);

    let mut batch = client.batch(Semantics::default());
    let status = object.status(&mut batch);
    assert!(batch.execute().await);
    assert_eq!(status.chunk_count(), 3);
    assert_eq!(status.chunk_size(), 64);

    // Chunk 0 holds input[0..14] at local [50, 64).
    let mut handle = harness.object_store.open("bench", "tiled_0").await.unwrap();
    let mut chunk0 = vec![0u8; 64];
    handle.read(&mut chunk0, 0).await.unwrap();
    assert_eq!(&chunk0[50..64], &data[0..14]);

    // Chunk 1 holds input[14..78] at local [0, 64).
    let mut handle = harness.object_store.open("bench", "tiled_1").await.unwrap();
    let mut chunk1 = vec![0u8; 64];
    handle.read(&mut chunk1, 0).await.unwrap();
    assert_eq!(&chunk1[..], &data[14..78]);

    // Chunk 2 holds input[78..100] at local [0, 22).
    let mut handle = harness.object_store.open("bench", "tiled_2").await.unwrap();
    let mut chunk2 = vec![0u8; 22];
    handle.read(&mut chunk2, 0).await.unwrap();
    assert_eq!(&chunk2[..], &data[78..100]);
}

/// A chunked object and a flat object with the same transformation return
/// byte-identical reads for every window.
#[tokio::test(flavor = "multi_thread")]
async fn test_chunked_equals_flat() {
    let server = TestServer::spawn().await;
    let client = server.client();

    for ty in [
        TransformationType::None,
        TransformationType::Xor,
        TransformationType::Rle,
        TransformationType::Lz4,
    ] {
        let flat = TransformationObject::new(&client, "equiv", &format!("flat-{ty:?}"));
        let chunked =
            ChunkedTransformationObject::new(&client, "equiv", &format!("chunked-{ty:?}"));
        let data = runs_data_seeded(1000, 7);

        let flat_written = AtomicU64::new(0);
        let chunked_written = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::default());
        flat.create(ty, TransformationMode::Client, &mut batch);
        chunked.create(ty, TransformationMode::Client, 64, &mut batch);
        flat.write(&data, 0, &flat_written, &mut batch);
        chunked.write(&data, 0, &chunked_written, &mut batch);
        assert!(batch.execute().await, "{ty:?} setup");
        assert_eq!(flat_written.load(Ordering::SeqCst), 1000);
        assert_eq!(chunked_written.load(Ordering::SeqCst), 1000);

        for (offset, len) in [(0usize, 1000usize), (0, 64), (50, 100), (63, 2), (999, 1)] {
            let mut from_flat = vec![0u8; len];
            let mut from_chunked = vec![0u8; len];
            let flat_read = AtomicU64::new(0);
            let chunked_read = AtomicU64::new(0);

            let mut batch = client.batch(Semantics::default());
            flat.read(&mut from_flat, offset as u64, &flat_read, &mut batch);
            chunked.read(&mut from_chunked, offset as u64, &chunked_read, &mut batch);
            assert!(batch.execute().await);

            assert_eq!(
                from_flat, from_chunked,
                "{ty:?} window [{offset}, {})",
                offset + len
            );
            assert_eq!(from_flat, &data[offset..offset + len]);
            assert_eq!(flat_read.load(Ordering::SeqCst), len as u64);
            assert_eq!(chunked_read.load(Ordering::SeqCst), len as u64);
        }
    }
}

/// Writes past the last chunk grow the chunk count.
#[tokio::test(flavor = "multi_thread")]
async fn test_chunk_count_grows_on_demand() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = ChunkedTransformationObject::new(&client, "grow", "o");

    let mut batch = client.batch(Semantics::default());
    object.create(
        TransformationType::Xor,
        TransformationMode::Client,
        128,
        &mut batch,
    );
    assert!(batch.execute().await);

    let mut batch = client.batch(Semantics::default());
    let status = object.status(&mut batch);
    assert!(batch.execute().await);
    assert_eq!(status.chunk_count(), 1);

    let data = test_data_seeded(128 * 5, 1);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    let mut batch = client.batch(Semantics::default());
    let status = object.status(&mut batch);
    assert!(batch.execute().await);
    assert_eq!(status.chunk_count(), 5);
    assert_eq!(status.original_size(), 128 * 5);
}

/// Status aggregates sizes over all chunks.
#[tokio::test(flavor = "multi_thread")]
async fn test_status_sums_chunk_sizes() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = ChunkedTransformationObject::new(&client, "agg", "o");

    // 150 logical bytes over 64-byte chunks, highly compressible.
    let data = vec![0x09u8; 150];
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(
        TransformationType::Rle,
        TransformationMode::Client,
        64,
        &mut batch,
    );
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    let mut batch = client.batch(Semantics::default());
    let status = object.status(&mut batch);
    assert!(batch.execute().await);
    assert_eq!(status.original_size(), 150);
    assert_eq!(status.transformation_type(), Some(TransformationType::Rle));
    // Each chunk run-length encodes to a single pair.
    assert_eq!(status.transformed_size(), 6);
    assert!(status.modification_time() > 0);
}

/// Delete removes every chunk and the metadata record.
#[tokio::test]
async fn test_delete_removes_all_chunks() {
    let harness = local_harness();
    let client = &harness.client;
    let object = ChunkedTransformationObject::new(client, "bench", "gone");

    let data = test_data_seeded(200, 2);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(
        TransformationType::None,
        TransformationMode::Client,
        64,
        &mut batch,
    );
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);
    assert!(harness.object_store.open("bench", "gone_3").await.is_ok());

    let mut batch = client.batch(Semantics::default());
    object.delete(&mut batch);
    assert!(batch.execute().await);

    for chunk in ["gone_0", "gone_1", "gone_2", "gone_3"] {
        assert!(
            harness.object_store.open("bench", chunk).await.is_err(),
            "{chunk} should be deleted"
        );
    }
    assert!(harness.kv_store.get("bench", "gone").unwrap().is_none());
}

/// Reads past the last chunk stop at the end of the data.
#[tokio::test(flavor = "multi_thread")]
async fn test_read_past_end_is_short() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = ChunkedTransformationObject::new(&client, "short", "o");

    let data = test_data_seeded(100, 3);
    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(
        TransformationType::None,
        TransformationMode::Client,
        64,
        &mut batch,
    );
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    // Ask for more than exists: only the two existing chunks respond.
    let mut readback = vec![0u8; 256];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.read(&mut readback, 0, &bytes_read, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_read.load(Ordering::SeqCst), 100);
    assert_eq!(&readback[..100], &data[..]);
}
