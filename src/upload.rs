//! 多文件上传处理器与暂存目录管理。
//!
//! 每个文件字段先写入暂存目录中的临时文件（受单文件大小限制），
//! 再整体转发给存储提供方；无论成功与否，暂存文件都会被删除。

use axum::extract::multipart::Field;
use axum::extract::{Extension, Multipart, Query};
use axum::response::Json as JsonResponse;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::drive::DriveItem;
use crate::error::ApiError;
use crate::vault::query::FolderId;
use crate::vault::{Caller, Vault};

const SPOOL_SUFFIX: &str = ".part";

#[derive(Debug)]
pub struct UploadConfig {
    pub spool_dir: PathBuf,
    pub max_file_size: u64,
    pub spool_ttl: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadQuery {
    folder_id: Option<String>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    files: Vec<DriveItem>,
}

/// 暂存文件；`release` 或 drop 时删除。
struct SpoolFile {
    path: PathBuf,
    file: Option<File>,
    released: bool,
}

impl SpoolFile {
    async fn create(dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}{SPOOL_SUFFIX}", Uuid::new_v4()));
        let file = File::create(&path).await?;
        Ok(Self {
            path,
            file: Some(file),
            released: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(data).await,
            None => Err(io::Error::other("spool file already closed")),
        }
    }

    /// Flushes and closes the handle so the content can be read back.
    async fn close(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn release(mut self) {
        self.file.take();
        if let Err(err) = fs::remove_file(&self.path).await
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!(path = ?self.path, error = %err, "failed to remove spool file");
        }
        self.released = true;
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        if !self.released {
            self.file.take();
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// 取路径的最后一段作为文件名。
fn final_component(raw: &str) -> Option<String> {
    raw.rsplit(['/', '\\'])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != "." && *name != "..")
        .map(str::to_string)
}

fn resolve_mime_type(declared: Option<&str>, name: &str) -> String {
    match declared.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => value.to_string(),
        None => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

async fn spool_field(
    field: &mut Field<'_>,
    spool: &mut SpoolFile,
    max_file_size: u64,
) -> Result<u64, ApiError> {
    let mut total_written: u64 = 0;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        if chunk.is_empty() {
            continue;
        }
        total_written += chunk.len() as u64;
        if max_file_size > 0 && total_written > max_file_size {
            return Err(ApiError::PayloadTooLarge(format!(
                "file exceeds the {max_file_size} byte limit"
            )));
        }
        spool
            .write_all(&chunk)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
    }
    spool
        .close()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(total_written)
}

async fn upload_one(
    vault: &Vault,
    upload: &UploadConfig,
    target: &FolderId,
    mut field: Field<'_>,
    name: &str,
    mime_type: &str,
) -> Result<DriveItem, ApiError> {
    let mut spool = SpoolFile::create(&upload.spool_dir)
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    let result = async {
        let size = spool_field(&mut field, &mut spool, upload.max_file_size).await?;
        debug!(name, size, path = ?spool.path(), "upload spooled");
        Ok::<_, ApiError>(vault.upload(target, name, mime_type, spool.path()).await?)
    }
    .await;
    spool.release().await;
    result
}

/// 接收 multipart 文件并上传到目标文件夹（默认根目录）。
pub async fn upload_file(
    Query(query): Query<UploadQuery>,
    Extension(vault): Extension<Arc<Vault>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    Extension(caller): Extension<Caller>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let target = vault
        .upload_target(&caller, query.folder_id.as_deref())
        .await?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.body_text()))?
    {
        let Some(raw_name) = field.file_name().map(str::to_string) else {
            debug!(field = field.name(), "skipping non-file form field");
            continue;
        };
        let name = final_component(&raw_name)
            .ok_or_else(|| ApiError::BadRequest("file name is required".into()))?;
        let mime_type = resolve_mime_type(field.content_type(), &name);
        let item = upload_one(&vault, &upload, &target, field, &name, &mime_type).await?;
        info!(
            identity = caller.identity,
            file_id = item.id,
            folder_id = target.as_str(),
            name,
            "file uploaded"
        );
        files.push(item);
    }

    if files.is_empty() {
        return Err(ApiError::BadRequest("no files uploaded".into()));
    }
    Ok(JsonResponse(UploadResponse { files }))
}

/// 清理过期的暂存文件（进程异常退出的残留）。
pub async fn cleanup_stale_spool(upload: &UploadConfig) -> Result<usize, io::Error> {
    if upload.spool_ttl.is_zero() {
        return Ok(0);
    }
    if fs::metadata(&upload.spool_dir).await.is_err() {
        return Ok(0);
    }

    let now = SystemTime::now();
    let mut removed = 0;
    let mut dir = fs::read_dir(&upload.spool_dir).await?;
    while let Some(entry) = dir.next_entry().await? {
        if !entry.file_name().to_string_lossy().ends_with(SPOOL_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let Ok(age) = now.duration_since(modified) else {
            continue;
        };
        if age >= upload.spool_ttl {
            let path = entry.path();
            match fs::remove_file(&path).await {
                Ok(()) => {
                    removed += 1;
                    info!(path = ?path, "removed stale spool file");
                }
                Err(err) => warn!(path = ?path, error = %err, "failed to remove stale spool file"),
            }
        }
    }
    Ok(removed)
}
