//! 用户初始化处理器。

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::vault::query::FolderId;
use crate::vault::resolver::RootResolver;
use crate::vault::{Caller, Vault, VaultError};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResponse {
    success: bool,
    folder_id: FolderId,
}

/// 确保调用者的根文件夹存在并返回其 ID。
pub async fn initialize_user(
    Extension(vault): Extension<Arc<Vault>>,
    Extension(caller): Extension<Caller>,
) -> Result<JsonResponse<InitializeResponse>, ApiError> {
    let folder_id = vault.root_for(&caller).await?;
    info!(
        identity = caller.identity,
        folder_id = folder_id.as_str(),
        "user initialized"
    );
    Ok(JsonResponse(InitializeResponse {
        success: true,
        folder_id,
    }))
}

/// 管理员预先为指定身份创建根文件夹（`init-user` 子命令）。
pub async fn provision_user(
    resolver: &RootResolver,
    identity: &str,
    email: Option<&str>,
) -> Result<FolderId, VaultError> {
    let identity = identity.trim();
    let email = email.map(str::trim).filter(|email| !email.is_empty());
    let folder_id = resolver.resolve(identity, email).await?;
    info!(identity, folder_id = folder_id.as_str(), "user provisioned");
    Ok(folder_id)
}
