//! 远端存储提供方抽象：文件元数据模型与统一的操作接口。

mod google;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub use google::{GoogleDrive, GoogleDriveConfig};
pub use memory::MemoryDrive;

pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Fields requested for every item returned by the provider.
pub const ITEM_FIELDS: &str = "id,name,mimeType,parents,trashed,size,createdTime,modifiedTime,webViewLink,webContentLink,thumbnailLink";

/// 远端文件或文件夹的元数据，字段与 Drive v3 对象一致。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_link: Option<String>,
}

impl DriveItem {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// 元数据更新（重命名、移入/移出回收站）。
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed: Option<bool>,
}

impl ItemPatch {
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            trashed: None,
        }
    }

    pub fn trashed(trashed: bool) -> Self {
        Self {
            name: None,
            trashed: Some(trashed),
        }
    }
}

/// 新上传文件的描述。
#[derive(Clone, Copy, Debug)]
pub struct NewFile<'a> {
    pub name: &'a str,
    pub parent_id: &'a str,
    pub mime_type: &'a str,
}

#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("storage provider unavailable: {0}")]
    Unavailable(String),
    #[error("item not found: {0}")]
    NotFound(String),
    #[error("storage provider error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("unexpected provider response: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Remote file-storage API scoped by parent folder ID and query filter.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Lists every item matching `query`, following pagination to the end.
    async fn list(&self, query: &str, order_by: Option<&str>) -> Result<Vec<DriveItem>, DriveError>;

    async fn get(&self, id: &str) -> Result<DriveItem, DriveError>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveItem, DriveError>;

    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<DriveItem, DriveError>;

    /// Uploads the content of `source` as a new file.
    async fn upload(&self, file: NewFile<'_>, source: &Path) -> Result<DriveItem, DriveError>;
}
