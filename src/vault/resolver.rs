//! 根目录解析：为每个身份推导并幂等地创建私有根文件夹。
//!
//! 同一身份的解析在进程内由身份锁串行化；创建后会再次搜索，
//! 若其他进程同时创建了同名文件夹，则收敛到创建时间最早的那个。

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::profile::{ProfileStore, RootRecord};
use super::query::{FolderId, folder_by_name_query};
use super::VaultError;
use crate::drive::{DriveItem, ItemPatch, StorageProvider};
use crate::locking::IdentityLocks;

const MAX_IDENTITY_LEN: usize = 512;

/// 由前缀与完整身份拼接出根文件夹名称（不截断，避免不同用户撞名）。
pub fn derive_root_name(prefix: &str, identity: &str) -> Result<String, VaultError> {
    if identity.is_empty() {
        return Err(VaultError::InvalidInput("identity is required".into()));
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return Err(VaultError::InvalidInput("identity is too long".into()));
    }
    if identity.chars().any(char::is_control) {
        return Err(VaultError::InvalidInput(
            "identity contains control characters".into(),
        ));
    }
    Ok(format!("{prefix}{identity}"))
}

/// Earliest `createdTime` wins, ties broken by ID.
fn pick_canonical(candidates: &[DriveItem]) -> Option<&DriveItem> {
    candidates.iter().min_by(|a, b| {
        let by_time = match (parse_created(a), parse_created(b)) {
            (Some(a_time), Some(b_time)) => a_time.cmp(&b_time),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_time.then_with(|| a.id.cmp(&b.id))
    })
}

fn parse_created(item: &DriveItem) -> Option<DateTime<Utc>> {
    item.created_time
        .as_deref()
        .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
        .map(|value| value.with_timezone(&Utc))
}

pub struct RootResolver {
    provider: Arc<dyn StorageProvider>,
    profiles: Arc<dyn ProfileStore>,
    locks: Arc<IdentityLocks>,
    master: FolderId,
    name_prefix: String,
    lock_timeout: Duration,
}

impl RootResolver {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        profiles: Arc<dyn ProfileStore>,
        locks: Arc<IdentityLocks>,
        master: FolderId,
        name_prefix: String,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            profiles,
            locks,
            master,
            name_prefix,
            lock_timeout,
        }
    }

    /// 返回身份对应的根文件夹 ID，不存在时创建。
    pub async fn resolve(&self, identity: &str, email: Option<&str>) -> Result<FolderId, VaultError> {
        let name = derive_root_name(&self.name_prefix, identity)?;
        let _guard = self
            .locks
            .lock_with_timeout(identity, self.lock_timeout)
            .await
            .map_err(|_| {
                VaultError::UpstreamUnavailable("timed out waiting for root folder resolution".into())
            })?;

        match self.profiles.get(identity).await {
            Ok(Some(record)) => return FolderId::parse(&record.folder_id),
            Ok(None) => {}
            Err(err) => warn!(identity, error = %err, "profile store lookup failed"),
        }

        let query = folder_by_name_query(&name, &self.master);
        let existing = self.provider.list(&query, None).await?;
        let folder_id = match pick_canonical(&existing) {
            Some(folder) => {
                if existing.len() > 1 {
                    warn!(
                        identity,
                        count = existing.len(),
                        folder_id = folder.id,
                        "multiple root folders found, using the earliest"
                    );
                }
                folder.id.clone()
            }
            None => self.create_and_reconcile(identity, &name, &query).await?,
        };

        let folder_id = FolderId::parse(&folder_id)?;
        let record = RootRecord {
            owner_identity: identity.to_string(),
            folder_id: folder_id.to_string(),
            email: email.map(str::to_string),
            created_at: Utc::now(),
        };
        if let Err(err) = self.profiles.put(record).await {
            warn!(identity, error = %err, "profile store update failed");
        }
        Ok(folder_id)
    }

    async fn create_and_reconcile(
        &self,
        identity: &str,
        name: &str,
        query: &str,
    ) -> Result<String, VaultError> {
        let created = self.provider.create_folder(name, self.master.as_str()).await?;
        info!(identity, folder_id = created.id, "created root folder");

        let current = self.provider.list(query, None).await?;
        let Some(canonical) = pick_canonical(&current) else {
            return Ok(created.id);
        };
        if canonical.id == created.id {
            return Ok(created.id);
        }

        warn!(
            identity,
            duplicate = created.id,
            canonical = canonical.id,
            "concurrent root folder creation detected, discarding duplicate"
        );
        if let Err(err) = self
            .provider
            .update(&created.id, &ItemPatch::trashed(true))
            .await
        {
            warn!(identity, folder_id = created.id, error = %err, "failed to trash duplicate root folder");
        }
        Ok(canonical.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::MemoryDrive;
    use crate::vault::profile::MemoryProfileStore;

    async fn setup() -> (Arc<MemoryDrive>, FolderId, RootResolver) {
        let drive = Arc::new(MemoryDrive::new());
        let master = drive.create_top_level_folder("master").await;
        let master_id = FolderId::parse(&master.id).expect("master id");
        let resolver = RootResolver::new(
            drive.clone(),
            Arc::new(MemoryProfileStore::new()),
            Arc::new(IdentityLocks::new()),
            master_id.clone(),
            "vault_".to_string(),
            Duration::from_secs(5),
        );
        (drive, master_id, resolver)
    }

    async fn root_folders(drive: &MemoryDrive, master: &FolderId, name: &str) -> Vec<DriveItem> {
        drive
            .list(&folder_by_name_query(name, master), None)
            .await
            .expect("list")
    }

    #[test]
    fn derive_root_name_uses_full_identity() {
        assert_eq!(
            derive_root_name("vault_", "abcdef123456").expect("name"),
            "vault_abcdef123456"
        );
        assert_ne!(
            derive_root_name("vault_", "abcdefgh-1").expect("name"),
            derive_root_name("vault_", "abcdefgh-2").expect("name")
        );
        assert!(derive_root_name("vault_", "").is_err());
        assert!(derive_root_name("vault_", "a\nb").is_err());
    }

    #[tokio::test]
    async fn sequential_resolution_is_idempotent() {
        let (drive, master, resolver) = setup().await;
        let first = resolver.resolve("u1", None).await.expect("first");
        let second = resolver.resolve("u1", None).await.expect("second");
        assert_eq!(first, second);
        assert_eq!(root_folders(&drive, &master, "vault_u1").await.len(), 1);
    }

    #[tokio::test]
    async fn distinct_identities_get_distinct_roots() {
        let (_drive, _master, resolver) = setup().await;
        let a = resolver.resolve("u1", None).await.expect("u1");
        let b = resolver.resolve("u2", None).await.expect("u2");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn concurrent_resolution_creates_one_folder() {
        let (drive, master, resolver) = setup().await;
        let resolver = Arc::new(resolver);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve("u1", None).await })
            })
            .collect();
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.expect("join").expect("resolve"));
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(root_folders(&drive, &master, "vault_u1").await.len(), 1);
    }

    #[tokio::test]
    async fn preexisting_duplicates_converge_on_earliest() {
        let (drive, master, resolver) = setup().await;
        let older = drive.insert_folder_raw("vault_u1", master.as_str()).await;
        let _newer = drive.insert_folder_raw("vault_u1", master.as_str()).await;

        let resolved = resolver.resolve("u1", None).await.expect("resolve");
        assert_eq!(resolved.as_str(), older.id);
    }

    #[tokio::test]
    async fn trashed_root_is_not_reused() {
        let (drive, master, resolver) = setup().await;
        let stale = drive.insert_folder_raw("vault_u1", master.as_str()).await;
        drive
            .update(&stale.id, &ItemPatch::trashed(true))
            .await
            .expect("trash");

        let resolved = resolver.resolve("u1", None).await.expect("resolve");
        assert_ne!(resolved.as_str(), stale.id);
    }

    #[test]
    fn canonical_prefers_earliest_created_time() {
        let item = |id: &str, created: Option<&str>| DriveItem {
            id: id.to_string(),
            created_time: created.map(str::to_string),
            ..DriveItem::default()
        };
        let items = vec![
            item("b", Some("2024-01-02T00:00:00.000Z")),
            item("c", None),
            item("a", Some("2024-01-02T00:00:00.000Z")),
            item("z", Some("2024-01-03T00:00:00.000Z")),
        ];
        assert_eq!(pick_canonical(&items).map(|i| i.id.as_str()), Some("a"));
    }
}
