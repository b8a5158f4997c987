//! Stories about moving data through the transfer worker.

use std::fs;
use std::time::Duration;

use sparkcheck::watch::WatchConfig;
use sparkcheck::worker::{TransferWorker, WorkerState};

use crate::helpers;

const CLAIM: &str = "sparkcheck-e2e-data";
const MOUNT: &str = "/mnt/spark-data";

fn worker(client: kube::Client, namespace: &str) -> TransferWorker {
    TransferWorker::new(
        client,
        namespace,
        CLAIM,
        MOUNT,
        WatchConfig::new(Duration::from_secs(5), Duration::from_secs(120)),
    )
}

#[tokio::test]
#[ignore = "requires a cluster with a default StorageClass"]
async fn story_upload_then_download_roundtrips_byte_identical() {
    let client = helpers::test_client().await;
    let namespace = helpers::test_namespace();
    helpers::ensure_namespace(&client, &namespace).await;
    helpers::ensure_claim(&client, &namespace, CLAIM).await;

    let src = tempfile::tempdir().unwrap();
    fs::create_dir_all(src.path().join("input/nested")).unwrap();
    fs::write(src.path().join("input/a.txt"), b"alpha").unwrap();
    fs::write(src.path().join("input/nested/b.bin"), [0u8, 1, 2, 255]).unwrap();

    let worker = worker(client.clone(), &namespace);
    worker.ensure_ready().await.unwrap();
    assert_eq!(worker.state().await.unwrap(), WorkerState::Ready);

    let up = worker.upload(src.path()).await.unwrap();
    assert_eq!(up.files, 2);

    // A second session against the same claim reuses the ready worker.
    let second = self::worker(client.clone(), &namespace);
    second.ensure_ready().await.unwrap();

    let listed = second.list_volume().await.unwrap();
    assert!(listed.iter().any(|p| p.ends_with("input/a.txt")));

    let dst = tempfile::tempdir().unwrap();
    let down = second.download(dst.path()).await.unwrap();
    assert!(down.files >= up.files);

    assert_eq!(fs::read(dst.path().join("input/a.txt")).unwrap(), b"alpha");
    assert_eq!(
        fs::read(dst.path().join("input/nested/b.bin")).unwrap(),
        vec![0u8, 1, 2, 255]
    );

    second.teardown().await;
    assert_eq!(second.state().await.unwrap(), WorkerState::Absent);
}

#[tokio::test]
#[ignore = "requires a cluster with a default StorageClass"]
async fn story_worker_bound_to_another_claim_is_a_conflict() {
    let client = helpers::test_client().await;
    let namespace = helpers::test_namespace();
    helpers::ensure_namespace(&client, &namespace).await;
    helpers::ensure_claim(&client, &namespace, CLAIM).await;

    let first = worker(client.clone(), &namespace);
    first.ensure_ready().await.unwrap();

    let other = TransferWorker::new(
        client.clone(),
        &namespace,
        "some-other-claim",
        MOUNT,
        WatchConfig::new(Duration::from_secs(5), Duration::from_secs(120)),
    );
    let err = other.ensure_ready().await.unwrap_err();
    assert!(matches!(err, sparkcheck::Error::Conflict { .. }));

    first.teardown().await;
}
