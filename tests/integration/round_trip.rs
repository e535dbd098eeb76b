//! Round-trip properties over every transformation type and mode.
//!
//! Writes seeded data to fresh transformation objects through a real
//! server and reads windows back, checking byte equality, status
//! idempotence, size monotonicity and metadata consistency.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use strata_client::TransformationObject;
use strata_integration_tests::{TestServer, runs_data_seeded, test_data_seeded};
use strata_types::{Semantics, TransformationMode, TransformationType};

const ALL_TYPES: [TransformationType; 4] = [
    TransformationType::None,
    TransformationType::Xor,
    TransformationType::Rle,
    TransformationType::Lz4,
];

const ALL_MODES: [TransformationMode; 3] = [
    TransformationMode::Client,
    TransformationMode::Transport,
    TransformationMode::Server,
];

/// Data that compresses for the run-length codec but still exercises the
/// others.
fn data_for(ty: TransformationType, len: usize, seed: u64) -> Vec<u8> {
    match ty {
        TransformationType::Rle | TransformationType::Lz4 => runs_data_seeded(len, seed),
        _ => test_data_seeded(len, seed),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_full_round_trip_all_types_and_modes() {
    let server = TestServer::spawn().await;
    let client = server.client();

    for ty in ALL_TYPES {
        for mode in ALL_MODES {
            let name = format!("rt-{ty:?}-{mode:?}");
            let object = TransformationObject::new(&client, "round-trip", &name);
            let data = data_for(ty, 4096, 11);

            let bytes_written = AtomicU64::new(0);
            let mut batch = client.batch(Semantics::default());
            object.create(ty, mode, &mut batch);
            object.write(&data, 0, &bytes_written, &mut batch);
            assert!(batch.execute().await, "create+write {ty:?}/{mode:?}");
            assert_eq!(bytes_written.load(Ordering::SeqCst), data.len() as u64);

            let mut readback = vec![0u8; data.len()];
            let bytes_read = AtomicU64::new(0);
            let mut batch = client.batch(Semantics::default());
            object.read(&mut readback, 0, &bytes_read, &mut batch);
            assert!(batch.execute().await, "read {ty:?}/{mode:?}");
            assert_eq!(bytes_read.load(Ordering::SeqCst), data.len() as u64);
            assert_eq!(readback, data, "{ty:?}/{mode:?} round trip");
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_window_reads_match_source_slices() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let mut rng = StdRng::seed_from_u64(97);

    for ty in ALL_TYPES {
        let name = format!("windows-{ty:?}");
        let object = TransformationObject::new(&client, "round-trip", &name);
        let len = 64 * 1024;
        let data = data_for(ty, len, 42);

        let bytes_written = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::default());
        object.create(ty, TransformationMode::Client, &mut batch);
        object.write(&data, 0, &bytes_written, &mut batch);
        assert!(batch.execute().await);

        for _ in 0..8 {
            let offset = rng.random_range(0..len);
            let window = rng.random_range(1..=(len - offset));

            let mut readback = vec![0u8; window];
            let bytes_read = AtomicU64::new(0);
            let mut batch = client.batch(Semantics::default());
            object.read(&mut readback, offset as u64, &bytes_read, &mut batch);
            assert!(batch.execute().await);
            assert_eq!(bytes_read.load(Ordering::SeqCst), window as u64);
            assert_eq!(
                readback,
                &data[offset..offset + window],
                "{ty:?} window [{offset}, {})",
                offset + window
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_partial_codec_round_trip() {
    let server = TestServer::spawn().await;

    // 1 MiB splits into several operations at this threshold.
    let client = server.client_with_max_operation_size(256 * 1024);
    let object = TransformationObject::new(&client, "round-trip", "large-xor");
    let data = test_data_seeded(1024 * 1024, 5);

    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::Xor, TransformationMode::Client, &mut batch);
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_written.load(Ordering::SeqCst), data.len() as u64);

    let mut readback = vec![0u8; data.len()];
    let bytes_read = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.read(&mut readback, 0, &bytes_read, &mut batch);
    assert!(batch.execute().await);
    assert_eq!(bytes_read.load(Ordering::SeqCst), data.len() as u64);
    assert_eq!(readback, data);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_status_is_idempotent_within_a_batch() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = TransformationObject::new(&client, "round-trip", "status-twice");
    let data = runs_data_seeded(1000, 3);

    let bytes_written = AtomicU64::new(0);
    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::Rle, TransformationMode::Client, &mut batch);
    object.write(&data, 0, &bytes_written, &mut batch);
    assert!(batch.execute().await);

    let mut batch = client.batch(Semantics::default());
    let first = object.status(&mut batch);
    let second = object.status(&mut batch);
    assert!(batch.execute().await);

    assert_eq!(first.modification_time(), second.modification_time());
    assert_eq!(first.original_size(), second.original_size());
    assert_eq!(first.transformed_size(), second.transformed_size());
    assert_eq!(first.transformation_type(), second.transformation_type());
    assert_eq!(first.original_size(), 1000);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_size_grows_monotonically() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let object = TransformationObject::new(&client, "round-trip", "monotonic");

    let mut batch = client.batch(Semantics::default());
    object.create(TransformationType::Lz4, TransformationMode::Client, &mut batch);
    assert!(batch.execute().await);

    let mut max_end = 0u64;
    let writes: [(u64, usize); 4] = [(0, 500), (400, 300), (100, 50), (900, 200)];
    for (i, (offset, len)) in writes.into_iter().enumerate() {
        let data = test_data_seeded(len, i as u64);
        let bytes_written = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::default());
        object.write(&data, offset, &bytes_written, &mut batch);
        assert!(batch.execute().await);
        max_end = max_end.max(offset + len as u64);

        let mut batch = client.batch(Semantics::default());
        let status = object.status(&mut batch);
        assert!(batch.execute().await);
        assert!(
            status.original_size() >= max_end,
            "original_size {} < max_end {max_end} after write {i}",
            status.original_size()
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_metadata_matches_what_create_set() {
    let server = TestServer::spawn().await;
    let client = server.client();

    for ty in ALL_TYPES {
        let name = format!("meta-{ty:?}");
        let object = TransformationObject::new(&client, "round-trip", &name);

        let mut batch = client.batch(Semantics::default());
        object.create(ty, TransformationMode::Client, &mut batch);
        assert!(batch.execute().await);

        // A fresh handle has no cached state; everything below comes from
        // the KV record.
        let fresh = TransformationObject::new(&client, "round-trip", &name);
        let mut batch = client.batch(Semantics::default());
        let status = fresh.status(&mut batch);
        assert!(batch.execute().await);
        assert_eq!(status.transformation_type(), Some(ty));
        assert_eq!(status.original_size(), 0);
        assert_eq!(status.transformed_size(), 0);
    }
}

/// Two whole-object-codec writes in one batch form a single run; the
/// second must see the first one's edit even though nothing has reached
/// the server yet while the message is being built.
#[tokio::test(flavor = "multi_thread")]
async fn test_batched_whole_object_writes_compose() {
    let server = TestServer::spawn().await;
    let client = server.client();

    for ty in [TransformationType::Rle, TransformationType::Lz4] {
        let name = format!("composed-{ty:?}");
        let object = TransformationObject::new(&client, "round-trip", &name);

        let mut batch = client.batch(Semantics::default());
        object.create(ty, TransformationMode::Client, &mut batch);
        assert!(batch.execute().await);

        let first = vec![0x05u8; 300];
        let second = vec![0x07u8; 10];
        let wrote_first = AtomicU64::new(0);
        let wrote_second = AtomicU64::new(0);

        let mut batch = client.batch(Semantics::default());
        object.write(&first, 0, &wrote_first, &mut batch);
        object.write(&second, 295, &wrote_second, &mut batch);
        assert!(batch.execute().await, "{ty:?} batched writes");
        assert_eq!(wrote_first.load(Ordering::SeqCst), 300);
        assert_eq!(wrote_second.load(Ordering::SeqCst), 10);

        let mut readback = vec![0u8; 305];
        let bytes_read = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::default());
        object.read(&mut readback, 0, &bytes_read, &mut batch);
        assert!(batch.execute().await);
        assert_eq!(bytes_read.load(Ordering::SeqCst), 305);
        assert_eq!(&readback[..295], &[0x05u8; 295][..], "{ty:?} first write");
        assert_eq!(&readback[295..], &[0x07u8; 10][..], "{ty:?} second write");

        let mut batch = client.batch(Semantics::default());
        let status = object.status(&mut batch);
        assert!(batch.execute().await);
        assert_eq!(status.original_size(), 305, "{ty:?} logical size");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overwrites_converge_to_source_image() {
    let server = TestServer::spawn().await;
    let client = server.client();
    let mut rng = StdRng::seed_from_u64(1234);

    for ty in [TransformationType::Xor, TransformationType::Rle] {
        let name = format!("image-{ty:?}");
        let object = TransformationObject::new(&client, "round-trip", &name);

        let mut batch = client.batch(Semantics::default());
        object.create(ty, TransformationMode::Client, &mut batch);
        assert!(batch.execute().await);

        // Apply a random write sequence to the object and a local mirror.
        let mut mirror = vec![0u8; 8192];
        let mut high_water = 0usize;
        for i in 0..10 {
            // Stay within the written prefix so no unwritten gaps appear.
            let offset = rng.random_range(0..=high_water.min(4095));
            let len = rng.random_range(1..=4096usize);
            let data = runs_data_seeded(len, i);

            mirror[offset..offset + len].copy_from_slice(&data);
            high_water = high_water.max(offset + len);

            let bytes_written = AtomicU64::new(0);
            let mut batch = client.batch(Semantics::default());
            object.write(&data, offset as u64, &bytes_written, &mut batch);
            assert!(batch.execute().await, "{ty:?} write {i}");
        }

        let mut readback = vec![0u8; high_water];
        let bytes_read = AtomicU64::new(0);
        let mut batch = client.batch(Semantics::default());
        object.read(&mut readback, 0, &bytes_read, &mut batch);
        assert!(batch.execute().await);
        assert_eq!(readback, &mirror[..high_water], "{ty:?} final image");
    }
}
