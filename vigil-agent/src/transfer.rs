//! Pending-directory drain to network storage.
//!
//! Polls the staging directory for `.READY` sentinels (oldest first), copies
//! each companion file to its destination subdirectory behind a `.tmp` name,
//! publishes it with an atomic rename, reports it to the central server, and
//! only then removes the local pair. Any failure before publication leaves
//! both files in place for the next tick: there is no retry cap and no
//! dead-letter directory. Files remain in pending until transferred or
//! manually removed. After publication, local cleanup is best-effort so a
//! transferred file is never re-reported.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_config::Config;
use vigil_core::api::ApiClient;
use vigil_core::artifacts::{self, PendingFile};

const STATS_INTERVAL: Duration = Duration::from_secs(60);
const STORAGE_SUBDIRS: [&str; 3] = ["pictures", "thumbs", "videos"];
const WRITE_PROBE: &str = ".transfer_health_check";

pub struct TransferManager {
    api: Arc<ApiClient>,
    camera_id: String,
    pending_dir: PathBuf,
    nfs_mount: PathBuf,
    check_interval: Duration,
    copy_timeout: Duration,
    shutdown: CancellationToken,
    files_transferred: u64,
    bytes_transferred: u64,
}

impl TransferManager {
    pub fn new(config: &Config, api: Arc<ApiClient>, shutdown: CancellationToken) -> Self {
        Self {
            camera_id: config.camera.id.clone(),
            pending_dir: config.paths.pending(),
            nfs_mount: config.paths.nfs_mount.clone(),
            check_interval: config.transfer.check_interval(),
            copy_timeout: config.transfer.timeout(),
            api,
            shutdown,
            files_transferred: 0,
            bytes_transferred: 0,
        }
    }

    pub async fn run(mut self) {
        info!(
            pending_dir = %self.pending_dir.display(),
            mount = %self.nfs_mount.display(),
            check_interval_s = self.check_interval.as_secs_f64(),
            "transfer manager started"
        );
        if !self.storage_available().await {
            warn!("network storage unavailable at startup, transfers will wait for the mount");
        }

        let mut last_stats = tokio::time::Instant::now();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.check_interval) => {}
            }

            match self.scan_sentinels().await {
                Ok(sentinels) => {
                    if !sentinels.is_empty() {
                        debug!(count = sentinels.len(), "pending transfers found");
                    }
                    for sentinel in sentinels {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        if self.process_sentinel(&sentinel).await {
                            self.files_transferred += 1;
                        }
                        // Failures retry on the next scan.
                    }
                }
                Err(err) => error!(error = %err, "pending directory scan failed"),
            }

            if last_stats.elapsed() >= STATS_INTERVAL {
                info!(
                    transferred = self.files_transferred,
                    total_mb = format!("{:.1}", self.bytes_transferred as f64 / (1024.0 * 1024.0)),
                    "transfer stats"
                );
                last_stats = tokio::time::Instant::now();
            }
        }

        info!(
            transferred = self.files_transferred,
            total_mb = format!("{:.1}", self.bytes_transferred as f64 / (1024.0 * 1024.0)),
            "transfer manager stopped"
        );
    }

    /// All sentinels in the staging directory, oldest modification first, so
    /// draining is FIFO across events.
    async fn scan_sentinels(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.pending_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_sentinel = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(artifacts::SENTINEL_SUFFIX));
            if !is_sentinel {
                continue;
            }
            let modified = entry
                .metadata()
                .await?
                .modified()
                .unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, path));
        }
        found.sort_by_key(|(modified, _)| *modified);
        Ok(found.into_iter().map(|(_, path)| path).collect())
    }

    /// Handle one sentinel. Returns true only for a completed transfer.
    async fn process_sentinel(&mut self, sentinel: &Path) -> bool {
        let Some(companion) = artifacts::companion_path(sentinel) else {
            return false;
        };

        if !companion.exists() {
            // Already transferred; the sentinel outlived its companion.
            debug!(sentinel = %sentinel.display(), "removing orphaned sentinel");
            if let Err(err) = tokio::fs::remove_file(sentinel).await {
                warn!(error = %err, "failed to remove orphaned sentinel");
            }
            return false;
        }

        let Some(pending) = PendingFile::from_sentinel(sentinel) else {
            // Never deleted: an operator has to decide what this file is.
            error!(
                file = %companion.display(),
                "unparseable staged filename, leaving in place"
            );
            return false;
        };

        if !self.storage_available().await {
            warn!(file = pending.file_name(), "network storage unavailable, deferring transfer");
            return false;
        }

        match self.transfer_file(&pending).await {
            Ok(bytes) => {
                self.bytes_transferred += bytes;
                true
            }
            Err(err) => {
                warn!(
                    file = pending.file_name(),
                    error = %err,
                    "transfer failed, will retry"
                );
                false
            }
        }
    }

    /// Mount present, required subdirectories present, write probe passes.
    async fn storage_available(&self) -> bool {
        for subdir in STORAGE_SUBDIRS {
            let dir = self.nfs_mount.join(subdir);
            match tokio::fs::metadata(&dir).await {
                Ok(meta) if meta.is_dir() => {}
                _ => {
                    debug!(dir = %dir.display(), "storage subdirectory missing");
                    return false;
                }
            }
        }

        let probe = self.nfs_mount.join(STORAGE_SUBDIRS[0]).join(WRITE_PROBE);
        match tokio::fs::File::create(&probe).await {
            Ok(_) => {
                tokio::fs::remove_file(&probe).await.ok();
                true
            }
            Err(err) => {
                debug!(error = %err, "storage write probe failed");
                false
            }
        }
    }

    /// Copy-with-timeout, atomic rename, server notification, local cleanup.
    async fn transfer_file(&self, pending: &PendingFile) -> anyhow::Result<u64> {
        let name = pending.file_name().to_string();
        let dest_dir = self.nfs_mount.join(pending.kind.dest_subdir());
        let dest = dest_dir.join(&name);
        let tmp = dest_dir.join(format!("{name}.tmp"));

        let copied = tokio::time::timeout(
            self.copy_timeout,
            tokio::fs::copy(&pending.path, &tmp),
        )
        .await;
        let bytes = match copied {
            Err(_elapsed) => {
                tokio::fs::remove_file(&tmp).await.ok();
                anyhow::bail!(
                    "copy exceeded the {:.0}s transfer timeout",
                    self.copy_timeout.as_secs_f64()
                );
            }
            Ok(Err(err)) => {
                tokio::fs::remove_file(&tmp).await.ok();
                return Err(err.into());
            }
            Ok(Ok(bytes)) => bytes,
        };

        // Publication: the destination name appears all-or-nothing.
        if let Err(err) = tokio::fs::rename(&tmp, &dest).await {
            tokio::fs::remove_file(&tmp).await.ok();
            return Err(err.into());
        }
        info!(
            file = %name,
            mb = format!("{:.2}", bytes as f64 / (1024.0 * 1024.0)),
            "copied to network storage"
        );

        // Server-side path is camera-scoped; the server maps it to its own
        // layout. Duration is recomputed there, so it is not sent.
        let server_path = format!("{}/{}/{}", self.camera_id, pending.kind.dest_subdir(), name);
        if let Err(err) = self
            .api
            .update_file(pending.event_id, pending.kind, &server_path, None)
            .await
        {
            warn!(
                event_id = pending.event_id,
                error = %err,
                "server notification failed (file already durable on storage)"
            );
        }

        // Cleanup is best-effort once the bytes are published and reported.
        // A leftover companion without its sentinel is invisible to later
        // scans, and a leftover sentinel without its companion is reaped as
        // an orphan; propagating either error would re-run the whole
        // transfer and send the server a duplicate notification for this
        // (event_id, file_type).
        if let Err(err) = tokio::fs::remove_file(&pending.path).await {
            warn!(file = %name, error = %err, "failed to remove transferred file from pending");
        }
        if let Err(err) = tokio::fs::remove_file(&pending.sentinel_path).await {
            warn!(file = %name, error = %err, "failed to remove sentinel after transfer");
        }
        Ok(bytes)
    }
}
