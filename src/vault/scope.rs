//! 作用域守卫：限制操作只能落在调用者自己的子树内。

use tracing::warn;

use super::VaultError;
use super::query::FolderId;
use crate::drive::{DriveError, DriveItem, StorageProvider};

/// Upper bound on parent hops while proving ancestry.
pub const MAX_ANCESTRY_DEPTH: usize = 64;

/// 浅层规则：未指定或指向主文件夹时回落到调用者的根目录。
pub fn resolve_target_folder(
    root: &FolderId,
    requested: Option<&str>,
    master: &FolderId,
) -> Result<FolderId, VaultError> {
    match requested.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(root.clone()),
        Some(value) if value == master.as_str() => Ok(root.clone()),
        Some(value) => FolderId::parse(value),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RootAccess {
    /// The root folder itself is an acceptable target (listing, uploads).
    Allow,
    /// Only strict descendants (trash, restore, rename).
    Deny,
}

/// 沿 `parents` 向上遍历，确认 `candidate` 位于 `root` 之下。
pub async fn ensure_within_root(
    provider: &dyn StorageProvider,
    root: &FolderId,
    master: &FolderId,
    candidate: &FolderId,
    root_access: RootAccess,
) -> Result<(), VaultError> {
    if candidate == root {
        return match root_access {
            RootAccess::Allow => Ok(()),
            RootAccess::Deny => Err(VaultError::ForbiddenScope(
                "the root folder cannot be modified".into(),
            )),
        };
    }
    if candidate == master {
        return Err(forbidden(candidate));
    }

    let mut current = candidate.as_str().to_string();
    for depth in 0..MAX_ANCESTRY_DEPTH {
        let item = match provider.get(&current).await {
            Ok(item) => item,
            Err(DriveError::NotFound(_)) if depth == 0 => {
                return Err(VaultError::NotFound(candidate.to_string()));
            }
            Err(DriveError::NotFound(_)) => return Err(forbidden(candidate)),
            Err(err) => return Err(err.into()),
        };
        if item.parents.iter().any(|parent| parent == root.as_str()) {
            return Ok(());
        }
        if item.parents.iter().any(|parent| parent == master.as_str()) {
            return Err(forbidden(candidate));
        }
        match item.parents.first() {
            Some(parent) => current = parent.clone(),
            None => return Err(forbidden(candidate)),
        }
    }

    warn!(
        candidate = candidate.as_str(),
        root = root.as_str(),
        "ancestry walk exceeded depth limit"
    );
    Err(forbidden(candidate))
}

/// Where an item sits relative to the caller's root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Placement {
    /// The root itself or one of its descendants.
    InsideRoot,
    /// Under the master folder but outside the caller's root.
    OtherTenant,
    /// Not part of the master tree at all.
    Outside,
}

/// 沿 `parents` 向上遍历已取得的条目，判断其归属。
pub async fn placement_of(
    provider: &dyn StorageProvider,
    root: &FolderId,
    master: &FolderId,
    item: &DriveItem,
) -> Result<Placement, VaultError> {
    if item.id == root.as_str() {
        return Ok(Placement::InsideRoot);
    }
    if item.id == master.as_str() {
        return Ok(Placement::OtherTenant);
    }

    let mut parents = item.parents.clone();
    for _ in 0..MAX_ANCESTRY_DEPTH {
        if parents.iter().any(|parent| parent == root.as_str()) {
            return Ok(Placement::InsideRoot);
        }
        if parents.iter().any(|parent| parent == master.as_str()) {
            return Ok(Placement::OtherTenant);
        }
        let Some(parent) = parents.first().cloned() else {
            return Ok(Placement::Outside);
        };
        match provider.get(&parent).await {
            Ok(ancestor) => parents = ancestor.parents,
            Err(DriveError::NotFound(_)) => return Ok(Placement::Outside),
            Err(err) => return Err(err.into()),
        }
    }

    warn!(item = item.id, "ancestry walk exceeded depth limit");
    Ok(Placement::OtherTenant)
}

fn forbidden(candidate: &FolderId) -> VaultError {
    VaultError::ForbiddenScope(format!("{candidate} is outside the caller's folder"))
}
