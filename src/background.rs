//! 暂存目录清理与空闲身份锁回收的后台任务。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{LOCK_PRUNE_INTERVAL_SECS, SPOOL_CLEAN_INTERVAL_SECS};
use crate::locking::IdentityLocks;
use crate::upload::{UploadConfig, cleanup_stale_spool};

pub fn spawn_background_tasks(locks: Arc<IdentityLocks>, upload: Arc<UploadConfig>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(LOCK_PRUNE_INTERVAL_SECS));
        loop {
            interval.tick().await;
            let pruned = locks.prune_idle().await;
            if pruned > 0 {
                debug!(pruned, "pruned idle identity locks");
            }
        }
    });

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(SPOOL_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            if let Err(err) = cleanup_stale_spool(&upload).await {
                warn!(error = %err, "spool cleanup failed");
            }
        }
    });
}
