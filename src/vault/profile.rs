//! 用户档案存储：缓存身份到根文件夹 ID 的映射。
//!
//! 仅作为优化，丢失时根目录解析器可以重新推导。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

use crate::atomic::write_atomic;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootRecord {
    pub owner_identity: String,
    pub folder_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get(&self, identity: &str) -> io::Result<Option<RootRecord>>;

    async fn put(&self, record: RootRecord) -> io::Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    records: Mutex<HashMap<String, RootRecord>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, identity: &str) -> io::Result<Option<RootRecord>> {
        Ok(self.records.lock().await.get(identity).cloned())
    }

    async fn put(&self, record: RootRecord) -> io::Result<()> {
        self.records
            .lock()
            .await
            .insert(record.owner_identity.clone(), record);
        Ok(())
    }
}

/// 以 JSON 文件持久化的档案存储，写入采用临时文件加重命名。
#[derive(Debug)]
pub struct JsonFileProfileStore {
    path: PathBuf,
    records: Mutex<Option<HashMap<String, RootRecord>>>,
}

impl JsonFileProfileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            records: Mutex::new(None),
        }
    }

    async fn load(&self) -> io::Result<HashMap<String, RootRecord>> {
        match fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).or_else(|err| {
                warn!(path = ?self.path, error = %err, "profile store unreadable, starting empty");
                Ok(HashMap::new())
            }),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl ProfileStore for JsonFileProfileStore {
    async fn get(&self, identity: &str) -> io::Result<Option<RootRecord>> {
        let mut records = self.records.lock().await;
        if records.is_none() {
            *records = Some(self.load().await?);
        }
        Ok(records
            .as_ref()
            .and_then(|records| records.get(identity).cloned()))
    }

    async fn put(&self, record: RootRecord) -> io::Result<()> {
        let mut records = self.records.lock().await;
        if records.is_none() {
            *records = Some(self.load().await?);
        }
        let map = records.get_or_insert_with(HashMap::new);
        map.insert(record.owner_identity.clone(), record);
        let bytes = serde_json::to_vec_pretty(map).map_err(io::Error::other)?;
        write_atomic(&self.path, &bytes).await
    }
}
