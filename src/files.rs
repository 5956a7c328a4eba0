//! 文件列表、建目录、回收站与重命名处理器。

use axum::extract::{Extension, Json, Query};
use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::drive::DriveItem;
use crate::error::ApiError;
use crate::vault::query::{SortSpec, View};
use crate::vault::{Caller, ListRequest, Listing, Vault};

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListQuery {
    folder_id: Option<String>,
    view: Option<String>,
    sort_field: Option<String>,
    sort_order: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileIdQuery {
    file_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateFolderBody {
    name: Option<String>,
    parent_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenameBody {
    file_id: Option<String>,
    new_name: Option<String>,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    success: bool,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
}

/// 按视图列出调用者可见的条目。
pub async fn list_files(
    Query(query): Query<ListQuery>,
    Extension(vault): Extension<Arc<Vault>>,
    Extension(caller): Extension<Caller>,
) -> Result<JsonResponse<Listing>, ApiError> {
    let request = ListRequest {
        folder_id: query.folder_id,
        view: View::parse(query.view.as_deref()),
        sort: SortSpec::parse(query.sort_field.as_deref(), query.sort_order.as_deref()),
    };
    Ok(JsonResponse(vault.list(&caller, request).await?))
}

/// 在指定父目录（默认根目录）下创建文件夹。
pub async fn create_folder(
    Extension(vault): Extension<Arc<Vault>>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<CreateFolderBody>,
) -> Result<JsonResponse<DriveItem>, ApiError> {
    let name = required(&body.name, "name")?;
    let folder = vault
        .create_folder(&caller, name, body.parent_id.as_deref())
        .await?;
    Ok(JsonResponse(folder))
}

/// 移入回收站（软删除）。
pub async fn delete_item(
    Query(query): Query<FileIdQuery>,
    Extension(vault): Extension<Arc<Vault>>,
    Extension(caller): Extension<Caller>,
) -> Result<JsonResponse<SuccessResponse>, ApiError> {
    let file_id = required(&query.file_id, "fileId")?;
    vault.trash(&caller, file_id).await?;
    Ok(JsonResponse(SuccessResponse { success: true }))
}

pub async fn restore_item(
    Query(query): Query<FileIdQuery>,
    Extension(vault): Extension<Arc<Vault>>,
    Extension(caller): Extension<Caller>,
) -> Result<JsonResponse<SuccessResponse>, ApiError> {
    let file_id = required(&query.file_id, "fileId")?;
    vault.restore(&caller, file_id).await?;
    Ok(JsonResponse(SuccessResponse { success: true }))
}

pub async fn rename_item(
    Extension(vault): Extension<Arc<Vault>>,
    Extension(caller): Extension<Caller>,
    Json(body): Json<RenameBody>,
) -> Result<JsonResponse<SuccessResponse>, ApiError> {
    let file_id = required(&body.file_id, "fileId")?;
    let new_name = required(&body.new_name, "newName")?;
    vault.rename(&caller, file_id, new_name).await?;
    Ok(JsonResponse(SuccessResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::IsolationPolicy;
    use crate::vault::testing::{caller, memory_vault};

    async fn setup() -> Arc<Vault> {
        let (_drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        Arc::new(vault)
    }

    #[tokio::test]
    async fn missing_parameters_are_bad_requests() {
        let vault = setup().await;
        let result = delete_item(
            Query(FileIdQuery { file_id: None }),
            Extension(vault.clone()),
            Extension(caller("u1")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = rename_item(
            Extension(vault.clone()),
            Extension(caller("u1")),
            Json(RenameBody {
                file_id: Some("abc".into()),
                new_name: Some("  ".into()),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));

        let result = create_folder(
            Extension(vault),
            Extension(caller("u1")),
            Json(CreateFolderBody {
                name: None,
                parent_id: None,
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn create_then_list_in_subfolder() {
        let vault = setup().await;
        let JsonResponse(docs) = create_folder(
            Extension(vault.clone()),
            Extension(caller("u1")),
            Json(CreateFolderBody {
                name: Some("docs".into()),
                parent_id: None,
            }),
        )
        .await
        .expect("docs");
        create_folder(
            Extension(vault.clone()),
            Extension(caller("u1")),
            Json(CreateFolderBody {
                name: Some("2024".into()),
                parent_id: Some(docs.id.clone()),
            }),
        )
        .await
        .expect("nested");

        let JsonResponse(listing) = list_files(
            Query(ListQuery {
                folder_id: Some(docs.id.clone()),
                ..ListQuery::default()
            }),
            Extension(vault),
            Extension(caller("u1")),
        )
        .await
        .expect("list");
        assert_eq!(listing.current_folder_id.as_str(), docs.id);
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "2024");
    }

    #[tokio::test]
    async fn foreign_item_cannot_be_trashed() {
        let vault = setup().await;
        let JsonResponse(folder) = create_folder(
            Extension(vault.clone()),
            Extension(caller("owner")),
            Json(CreateFolderBody {
                name: Some("private".into()),
                parent_id: None,
            }),
        )
        .await
        .expect("mkdir");

        let result = delete_item(
            Query(FileIdQuery {
                file_id: Some(folder.id),
            }),
            Extension(vault),
            Extension(caller("intruder")),
        )
        .await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }
}
