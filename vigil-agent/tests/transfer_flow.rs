//! Transfer manager scenarios: staged files, sentinels, storage outages,
//! and operator-facing edge cases, against real tempdirs and the mock
//! central server.

mod common;

use common::{ServerState, spawn, wait_until};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use vigil_agent::transfer::TransferManager;
use vigil_config::{Config, PathsConfig};
use vigil_core::api::{ApiClient, ApiSettings};

fn test_config(root: &Path) -> Config {
    let mut config = Config::from_env();
    config.camera.id = "camera_1".into();
    config.paths = PathsConfig {
        base: root.join("agent"),
        nfs_mount: root.join("mount"),
    };
    config.transfer.check_interval_s = 0.05;
    config.transfer.timeout_s = 5.0;
    config.ensure_directories().expect("staging dirs");
    config
}

fn create_mount(config: &Config) {
    for dir in [
        config.paths.pictures(),
        config.paths.thumbs(),
        config.paths.videos(),
    ] {
        std::fs::create_dir_all(dir).expect("mount subdir");
    }
}

/// Stage `name` in pending with its sentinel; mtime ordering follows call
/// order.
async fn stage(config: &Config, name: &str, contents: &[u8]) -> PathBuf {
    let path = config.paths.pending().join(name);
    std::fs::write(&path, contents).expect("stage file");
    std::fs::write(format!("{}.READY", path.display()), b"").expect("stage sentinel");
    tokio::time::sleep(Duration::from_millis(5)).await;
    path
}

async fn start_manager(
    config: &Config,
    base_url: &str,
) -> (CancellationToken, tokio::task::JoinHandle<()>) {
    let shutdown = CancellationToken::new();
    let api = Arc::new(
        ApiClient::new(
            ApiSettings {
                base_url: base_url.to_string(),
                camera_id: config.camera.id.clone(),
                camera_name: "Front Walkway".into(),
                camera_location: "Study".into(),
            },
            shutdown.clone(),
        )
        .expect("client"),
    );
    let manager = TransferManager::new(config, api, shutdown.clone());
    (shutdown.clone(), tokio::spawn(manager.run()))
}

fn pending_names(config: &Config) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(config.paths.pending())
        .expect("pending dir")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn happy_path_drains_all_four_artifacts_in_order() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    create_mount(&config);
    let server = spawn(Arc::new(ServerState::default())).await;

    stage(&config, "42_20251030_143022_a.jpg", b"picture-a").await;
    stage(&config, "42_20251030_143022_thumb.jpg", b"thumb").await;
    stage(&config, "42_20251030_143022_b.jpg", b"picture-b").await;
    stage(&config, "42_20251030_143022_video.h264", b"h264-stream").await;

    let (shutdown, task) = start_manager(&config, &server.base_url).await;
    assert!(
        wait_until(|| pending_names(&config).is_empty(), Duration::from_secs(5)).await,
        "pending directory drains"
    );
    shutdown.cancel();
    task.await.expect("manager exits");

    // Published under the type-tag subdirectories, contents intact.
    assert_eq!(
        std::fs::read(config.paths.pictures().join("42_20251030_143022_a.jpg")).unwrap(),
        b"picture-a"
    );
    assert_eq!(
        std::fs::read(config.paths.thumbs().join("42_20251030_143022_thumb.jpg")).unwrap(),
        b"thumb"
    );
    assert_eq!(
        std::fs::read(config.paths.pictures().join("42_20251030_143022_b.jpg")).unwrap(),
        b"picture-b"
    );
    assert_eq!(
        std::fs::read(config.paths.videos().join("42_20251030_143022_video.h264")).unwrap(),
        b"h264-stream"
    );
    // No stray .tmp files left behind.
    for dir in [config.paths.pictures(), config.paths.thumbs(), config.paths.videos()] {
        for entry in std::fs::read_dir(dir).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().into_owned();
            assert!(!name.ends_with(".tmp"), "leftover temp file {name}");
        }
    }

    // One notification per artifact, in sentinel-mtime order.
    let updates = server.state.file_updates.lock().unwrap();
    let order: Vec<(i64, String)> = updates
        .iter()
        .map(|(id, body)| (*id, body["file_type"].as_str().unwrap_or_default().to_string()))
        .collect();
    assert_eq!(
        order,
        vec![
            (42, "image_a".to_string()),
            (42, "thumbnail".to_string()),
            (42, "image_b".to_string()),
            (42, "video".to_string()),
        ]
    );
    assert_eq!(
        updates[0].1["file_path"],
        "camera_1/pictures/42_20251030_143022_a.jpg"
    );
}

#[tokio::test]
async fn storage_outage_defers_without_losing_files() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    // Mount is absent: transfers must wait, files must stay put.
    let server = spawn(Arc::new(ServerState::default())).await;

    stage(&config, "11_20251030_143022_a.jpg", b"picture-a").await;
    let (shutdown, task) = start_manager(&config, &server.base_url).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        pending_names(&config),
        vec![
            "11_20251030_143022_a.jpg".to_string(),
            "11_20251030_143022_a.jpg.READY".to_string(),
        ],
        "nothing moves while storage is down"
    );
    assert!(server.state.file_updates.lock().unwrap().is_empty());

    // Mount comes back; the next tick drains.
    create_mount(&config);
    assert!(
        wait_until(|| pending_names(&config).is_empty(), Duration::from_secs(5)).await,
        "recovery drains the backlog"
    );
    assert!(
        config
            .paths
            .pictures()
            .join("11_20251030_143022_a.jpg")
            .exists()
    );

    shutdown.cancel();
    task.await.expect("manager exits");
}

#[tokio::test]
async fn malformed_filenames_are_skipped_but_never_deleted() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    create_mount(&config);
    let server = spawn(Arc::new(ServerState::default())).await;

    stage(&config, "garbage.jpg", b"who knows").await;
    let (shutdown, task) = start_manager(&config, &server.base_url).await;

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        pending_names(&config),
        vec!["garbage.jpg".to_string(), "garbage.jpg.READY".to_string()],
        "operator decides what to do with this"
    );
    assert!(server.state.file_updates.lock().unwrap().is_empty());

    shutdown.cancel();
    task.await.expect("manager exits");
}

#[tokio::test]
async fn orphaned_sentinels_are_cleaned_up() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    create_mount(&config);
    let server = spawn(Arc::new(ServerState::default())).await;

    std::fs::write(
        config.paths.pending().join("9_20251030_143022_a.jpg.READY"),
        b"",
    )
    .unwrap();

    let (shutdown, task) = start_manager(&config, &server.base_url).await;
    assert!(
        wait_until(|| pending_names(&config).is_empty(), Duration::from_secs(5)).await,
        "orphaned sentinel removed"
    );
    assert!(server.state.file_updates.lock().unwrap().is_empty());

    shutdown.cancel();
    task.await.expect("manager exits");
}

#[tokio::test]
async fn partial_artifacts_without_sentinels_are_invisible() {
    // Crash-recovery shape: picture A completed, thumbnail died mid-write.
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    create_mount(&config);
    let server = spawn(Arc::new(ServerState::default())).await;

    stage(&config, "5_20251030_143022_a.jpg", b"picture-a").await;
    std::fs::write(
        config.paths.pending().join("5_20251030_143022_thumb.jpg"),
        b"trunc",
    )
    .unwrap();

    let (shutdown, task) = start_manager(&config, &server.base_url).await;
    assert!(
        wait_until(
            || !pending_names(&config).contains(&"5_20251030_143022_a.jpg".to_string()),
            Duration::from_secs(5)
        )
        .await,
        "the complete artifact transfers"
    );
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(
        pending_names(&config),
        vec!["5_20251030_143022_thumb.jpg".to_string()],
        "the partial thumbnail stays for the operator"
    );
    let updates = server.state.file_updates.lock().unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].1["file_type"], "image_a");

    shutdown.cancel();
    task.await.expect("manager exits");
}

#[tokio::test]
async fn api_notification_failure_does_not_block_the_transfer() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    create_mount(&config);
    let state = Arc::new(ServerState::default());
    state.fail_file_updates.store(true, Ordering::SeqCst);
    let server = spawn(Arc::clone(&state)).await;

    stage(&config, "13_20251030_143022_a.jpg", b"picture-a").await;
    let (shutdown, task) = start_manager(&config, &server.base_url).await;

    // The bounded update_file retries (1s + 2s) run their course first.
    assert!(
        wait_until(|| pending_names(&config).is_empty(), Duration::from_secs(10)).await,
        "the file still publishes and cleans up"
    );
    assert!(
        config
            .paths
            .pictures()
            .join("13_20251030_143022_a.jpg")
            .exists(),
        "bytes are durable on storage despite the failed report"
    );
    assert_eq!(state.file_update_attempts.load(Ordering::SeqCst), 3);

    shutdown.cancel();
    task.await.expect("manager exits");
}

#[tokio::test]
async fn rerun_overwrites_an_already_published_file() {
    // Retry-after-partial-failure: destination already has the file, the
    // pending pair still exists. A rerun must complete without error.
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    create_mount(&config);
    let server = spawn(Arc::new(ServerState::default())).await;

    std::fs::write(
        config.paths.pictures().join("8_20251030_143022_a.jpg"),
        b"stale",
    )
    .unwrap();
    stage(&config, "8_20251030_143022_a.jpg", b"fresh").await;

    let (shutdown, task) = start_manager(&config, &server.base_url).await;
    assert!(
        wait_until(|| pending_names(&config).is_empty(), Duration::from_secs(5)).await,
        "rerun drains"
    );
    assert_eq!(
        std::fs::read(config.paths.pictures().join("8_20251030_143022_a.jpg")).unwrap(),
        b"fresh"
    );

    shutdown.cancel();
    task.await.expect("manager exits");
}
