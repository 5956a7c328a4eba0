//! Per-user folder isolation over a shared storage account.
//!
//! Every operation resolves the caller's root folder, constrains the target
//! to that subtree, and only then talks to the storage provider.

pub mod profile;
pub mod query;
pub mod resolver;
pub mod scope;

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::drive::{DriveError, DriveItem, ItemPatch, NewFile, StorageProvider};
use query::{FolderId, SortSpec, View, build_query, order_for_view};
use resolver::RootResolver;
use scope::{Placement, RootAccess, ensure_within_root, placement_of, resolve_target_folder};

const MAX_NAME_LEN: usize = 255;

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("invalid folder id: {0}")]
    InvalidFolderId(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    ForbiddenScope(String),
    #[error("storage provider unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("storage provider error: {0}")]
    Upstream(String),
}

impl From<DriveError> for VaultError {
    fn from(error: DriveError) -> Self {
        match error {
            DriveError::Unavailable(msg) => VaultError::UpstreamUnavailable(msg),
            DriveError::NotFound(id) => VaultError::NotFound(id),
            other => VaultError::Upstream(other.to_string()),
        }
    }
}

/// 用户隔离策略，启动时选定。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum IsolationPolicy {
    /// Identity from the verified bearer credential, one private root per user.
    #[default]
    Token,
    /// Identity from a trusted `x-user-id` header, one private root per user.
    Header,
    /// Bearer credential verified, everyone works in the master folder.
    #[value(name = "none")]
    Shared,
}

/// An authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub identity: String,
    pub email: Option<String>,
}

#[derive(Clone, Debug)]
pub struct VaultSettings {
    pub master: FolderId,
    pub isolation: IsolationPolicy,
}

#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    pub folder_id: Option<String>,
    pub view: View,
    pub sort: SortSpec,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub files: Vec<DriveItem>,
    pub current_folder_id: FolderId,
    pub root_folder_id: FolderId,
}

/// 校验文件或文件夹名称。
pub fn validate_item_name(raw: &str) -> Result<String, VaultError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(VaultError::InvalidInput("name is required".into()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(VaultError::InvalidInput("name is too long".into()));
    }
    if name.chars().any(char::is_control) {
        return Err(VaultError::InvalidInput(
            "name contains control characters".into(),
        ));
    }
    Ok(name.to_string())
}

pub struct Vault {
    provider: Arc<dyn StorageProvider>,
    resolver: RootResolver,
    settings: VaultSettings,
}

impl Vault {
    pub fn new(
        provider: Arc<dyn StorageProvider>,
        resolver: RootResolver,
        settings: VaultSettings,
    ) -> Self {
        Self {
            provider,
            resolver,
            settings,
        }
    }

    /// 返回调用者的根文件夹，必要时创建。
    pub async fn root_for(&self, caller: &Caller) -> Result<FolderId, VaultError> {
        match self.settings.isolation {
            IsolationPolicy::Shared => Ok(self.settings.master.clone()),
            IsolationPolicy::Token | IsolationPolicy::Header => {
                self.resolver
                    .resolve(&caller.identity, caller.email.as_deref())
                    .await
            }
        }
    }

    /// Root plus a verified folder target inside it.
    async fn guarded_folder(
        &self,
        caller: &Caller,
        requested: Option<&str>,
    ) -> Result<(FolderId, FolderId), VaultError> {
        let root = self.root_for(caller).await?;
        let target = resolve_target_folder(&root, requested, &self.settings.master)?;
        ensure_within_root(
            self.provider.as_ref(),
            &root,
            &self.settings.master,
            &target,
            RootAccess::Allow,
        )
        .await?;
        Ok((root, target))
    }

    async fn guarded_item(&self, caller: &Caller, item_id: &str) -> Result<FolderId, VaultError> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(VaultError::InvalidInput("fileId is required".into()));
        }
        let item = FolderId::parse(item_id)?;
        let root = self.root_for(caller).await?;
        ensure_within_root(
            self.provider.as_ref(),
            &root,
            &self.settings.master,
            &item,
            RootAccess::Deny,
        )
        .await?;
        Ok(item)
    }

    pub async fn list(&self, caller: &Caller, request: ListRequest) -> Result<Listing, VaultError> {
        let (root, current) = match request.view {
            View::MyFiles => self.guarded_folder(caller, request.folder_id.as_deref()).await?,
            _ => {
                let root = self.root_for(caller).await?;
                (root.clone(), root)
            }
        };
        let query = build_query(request.view, &current, &root);
        let order_by = order_for_view(request.view, request.sort);
        let mut files = self.provider.list(&query, Some(&order_by)).await?;
        if request.view == View::Shared {
            files = self.without_other_tenants(&root, files).await?;
        }
        info!(
            identity = caller.identity,
            view = request.view.as_str(),
            folder_id = current.as_str(),
            count = files.len(),
            "list files"
        );
        Ok(Listing {
            files,
            current_folder_id: current,
            root_folder_id: root,
        })
    }

    /// Drops items that live under another caller's root.
    async fn without_other_tenants(
        &self,
        root: &FolderId,
        files: Vec<DriveItem>,
    ) -> Result<Vec<DriveItem>, VaultError> {
        let mut visible = Vec::with_capacity(files.len());
        for item in files {
            let placement =
                placement_of(self.provider.as_ref(), root, &self.settings.master, &item).await?;
            if placement != Placement::OtherTenant {
                visible.push(item);
            }
        }
        Ok(visible)
    }

    pub async fn create_folder(
        &self,
        caller: &Caller,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveItem, VaultError> {
        let name = validate_item_name(name)?;
        let (_, parent) = self.guarded_folder(caller, parent_id).await?;
        let folder = self.provider.create_folder(&name, parent.as_str()).await?;
        info!(
            identity = caller.identity,
            folder_id = folder.id,
            parent_id = parent.as_str(),
            "create folder"
        );
        Ok(folder)
    }

    /// 解析上传目标文件夹（含祖先校验）。
    pub async fn upload_target(
        &self,
        caller: &Caller,
        folder_id: Option<&str>,
    ) -> Result<FolderId, VaultError> {
        let (_, target) = self.guarded_folder(caller, folder_id).await?;
        Ok(target)
    }

    /// `target` must come from [`Vault::upload_target`].
    pub async fn upload(
        &self,
        target: &FolderId,
        name: &str,
        mime_type: &str,
        source: &Path,
    ) -> Result<DriveItem, VaultError> {
        let name = validate_item_name(name)?;
        let file = NewFile {
            name: &name,
            parent_id: target.as_str(),
            mime_type,
        };
        Ok(self.provider.upload(file, source).await?)
    }

    pub async fn trash(&self, caller: &Caller, item_id: &str) -> Result<DriveItem, VaultError> {
        self.set_trashed(caller, item_id, true).await
    }

    pub async fn restore(&self, caller: &Caller, item_id: &str) -> Result<DriveItem, VaultError> {
        self.set_trashed(caller, item_id, false).await
    }

    async fn set_trashed(
        &self,
        caller: &Caller,
        item_id: &str,
        trashed: bool,
    ) -> Result<DriveItem, VaultError> {
        let item = self.guarded_item(caller, item_id).await?;
        let updated = self
            .provider
            .update(item.as_str(), &ItemPatch::trashed(trashed))
            .await?;
        info!(
            identity = caller.identity,
            file_id = item.as_str(),
            trashed,
            "update trash state"
        );
        Ok(updated)
    }

    pub async fn rename(
        &self,
        caller: &Caller,
        item_id: &str,
        new_name: &str,
    ) -> Result<DriveItem, VaultError> {
        let new_name = validate_item_name(new_name)?;
        let item = self.guarded_item(caller, item_id).await?;
        let updated = self
            .provider
            .update(item.as_str(), &ItemPatch::rename(new_name))
            .await?;
        info!(identity = caller.identity, file_id = item.as_str(), "rename item");
        Ok(updated)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{caller, memory_vault};
    use super::*;

    #[tokio::test]
    async fn list_defaults_to_root_and_rejects_foreign_folders() {
        let (_drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let alice = caller("alice");
        let bob = caller("bob");

        let bob_docs = vault.create_folder(&bob, "docs", None).await.expect("mkdir");
        let listing = vault
            .list(&alice, ListRequest::default())
            .await
            .expect("list");
        assert_eq!(listing.current_folder_id, listing.root_folder_id);
        assert!(listing.files.is_empty());

        let result = vault
            .list(
                &alice,
                ListRequest {
                    folder_id: Some(bob_docs.id.clone()),
                    ..ListRequest::default()
                },
            )
            .await;
        assert!(matches!(result, Err(VaultError::ForbiddenScope(_))));
    }

    #[tokio::test]
    async fn master_folder_request_is_redirected_to_root() {
        let (_drive, master, vault) = memory_vault(IsolationPolicy::Token).await;
        let alice = caller("alice");
        let listing = vault
            .list(
                &alice,
                ListRequest {
                    folder_id: Some(master.to_string()),
                    ..ListRequest::default()
                },
            )
            .await
            .expect("list");
        assert_ne!(listing.current_folder_id, master);
        assert_eq!(listing.current_folder_id, listing.root_folder_id);
    }

    #[tokio::test]
    async fn mutations_require_ownership() {
        let (_drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let alice = caller("alice");
        let bob = caller("bob");
        let folder = vault.create_folder(&alice, "plans", None).await.expect("mkdir");

        for result in [
            vault.trash(&bob, &folder.id).await,
            vault.restore(&bob, &folder.id).await,
            vault.rename(&bob, &folder.id, "mine now").await,
        ] {
            assert!(matches!(result, Err(VaultError::ForbiddenScope(_))));
        }

        let renamed = vault
            .rename(&alice, &folder.id, "  roadmap ")
            .await
            .expect("rename");
        assert_eq!(renamed.name, "roadmap");
    }

    #[tokio::test]
    async fn root_folder_cannot_be_trashed() {
        let (_drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let alice = caller("alice");
        let root = vault.root_for(&alice).await.expect("root");
        let result = vault.trash(&alice, root.as_str()).await;
        assert!(matches!(result, Err(VaultError::ForbiddenScope(_))));
    }

    #[tokio::test]
    async fn shared_policy_works_in_master_folder() {
        let (_drive, master, vault) = memory_vault(IsolationPolicy::Shared).await;
        let alice = caller("alice");
        assert_eq!(vault.root_for(&alice).await.expect("root"), master);
        let folder = vault.create_folder(&alice, "team", None).await.expect("mkdir");
        assert_eq!(folder.parents, vec![master.to_string()]);
    }

    #[tokio::test]
    async fn create_folder_validates_name() {
        let (_drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let result = vault.create_folder(&caller("alice"), "   ", None).await;
        assert!(matches!(result, Err(VaultError::InvalidInput(_))));
    }

    async fn shared_listing(vault: &Vault, who: &Caller) -> Listing {
        vault
            .list(
                who,
                ListRequest {
                    view: View::Shared,
                    ..ListRequest::default()
                },
            )
            .await
            .expect("shared list")
    }

    #[tokio::test]
    async fn shared_view_hides_other_users_items() {
        let (drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let alice = caller("alice");
        let bob = caller("bob");
        let private = vault
            .create_folder(&alice, "alice-private", None)
            .await
            .expect("mkdir");
        drive.share_with_caller(&private.id).await;
        let partner = drive.create_top_level_folder("partner-deck").await;
        drive.share_with_caller(&partner.id).await;

        let bob_ids: Vec<String> = shared_listing(&vault, &bob)
            .await
            .files
            .into_iter()
            .map(|item| item.id)
            .collect();
        assert_eq!(bob_ids, vec![partner.id.clone()]);

        let alice_listing = shared_listing(&vault, &alice).await;
        assert_eq!(alice_listing.files.len(), 2);
    }

    #[tokio::test]
    async fn shared_view_lists_items_flagged_shared() {
        let (drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let alice = caller("alice");
        let folder = vault.create_folder(&alice, "shared-in", None).await.expect("mkdir");
        drive.share_with_caller(&folder.id).await;

        let listing = vault
            .list(
                &alice,
                ListRequest {
                    view: View::Shared,
                    ..ListRequest::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].id, folder.id);
    }
}
