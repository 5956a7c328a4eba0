//! 进程内存储提供方：供本地开发与测试使用。
//!
//! 只解析查询构造器会生成的过滤与排序语法。

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;
use tokio::sync::Mutex;

use super::{DriveError, DriveItem, FOLDER_MIME_TYPE, ItemPatch, NewFile, StorageProvider};

#[derive(Debug)]
struct Entry {
    item: DriveItem,
    shared_with_me: bool,
    content: Vec<u8>,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: HashMap<String, Entry>,
    next_id: u64,
}

impl MemoryState {
    fn insert(&mut self, mut item: DriveItem, content: Vec<u8>) -> DriveItem {
        self.next_id += 1;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        item.id = format!("item-{:06}", self.next_id);
        item.created_time = Some(now.clone());
        item.modified_time = Some(now);
        self.items.insert(
            item.id.clone(),
            Entry {
                item: item.clone(),
                shared_with_me: false,
                content,
            },
        );
        item
    }

    fn require_parent(&self, parent_id: &str) -> Result<(), DriveError> {
        match self.items.get(parent_id) {
            Some(entry) if entry.item.is_folder() => Ok(()),
            _ => Err(DriveError::NotFound(parent_id.to_string())),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryDrive {
    state: Mutex<MemoryState>,
}

impl MemoryDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建没有父级的顶层文件夹（用作主文件夹）。
    pub async fn create_top_level_folder(&self, name: &str) -> DriveItem {
        let mut state = self.state.lock().await;
        state.insert(
            DriveItem {
                name: name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                ..DriveItem::default()
            },
            Vec::new(),
        )
    }

    #[cfg(test)]
    pub async fn share_with_caller(&self, id: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.items.get_mut(id) {
            entry.shared_with_me = true;
        }
    }

    #[cfg(test)]
    pub async fn content(&self, id: &str) -> Option<Vec<u8>> {
        let state = self.state.lock().await;
        state.items.get(id).map(|entry| entry.content.clone())
    }

    #[cfg(test)]
    pub async fn insert_folder_raw(&self, name: &str, parent_id: &str) -> DriveItem {
        let mut state = self.state.lock().await;
        state.insert(
            DriveItem {
                name: name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                parents: vec![parent_id.to_string()],
                ..DriveItem::default()
            },
            Vec::new(),
        )
    }
}

#[async_trait]
impl StorageProvider for MemoryDrive {
    async fn list(&self, query: &str, order_by: Option<&str>) -> Result<Vec<DriveItem>, DriveError> {
        let clauses = parse_query(query)?;
        let order = order_by.map(parse_order).transpose()?.unwrap_or_default();
        let state = self.state.lock().await;
        let mut items: Vec<DriveItem> = state
            .items
            .values()
            .filter(|entry| clauses.iter().all(|clause| clause.matches(entry)))
            .map(|entry| entry.item.clone())
            .collect();
        items.sort_by(|a, b| {
            order
                .iter()
                .map(|key| key.compare(a, b))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or_else(|| a.id.cmp(&b.id))
        });
        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<DriveItem, DriveError> {
        let state = self.state.lock().await;
        state
            .items
            .get(id)
            .map(|entry| entry.item.clone())
            .ok_or_else(|| DriveError::NotFound(id.to_string()))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveItem, DriveError> {
        let mut state = self.state.lock().await;
        state.require_parent(parent_id)?;
        Ok(state.insert(
            DriveItem {
                name: name.to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                parents: vec![parent_id.to_string()],
                ..DriveItem::default()
            },
            Vec::new(),
        ))
    }

    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<DriveItem, DriveError> {
        let mut state = self.state.lock().await;
        let entry = state
            .items
            .get_mut(id)
            .ok_or_else(|| DriveError::NotFound(id.to_string()))?;
        if let Some(name) = &patch.name {
            entry.item.name = name.clone();
        }
        if let Some(trashed) = patch.trashed {
            entry.item.trashed = trashed;
        }
        entry.item.modified_time = Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));
        Ok(entry.item.clone())
    }

    async fn upload(&self, file: NewFile<'_>, source: &Path) -> Result<DriveItem, DriveError> {
        let content = fs::read(source).await?;
        let mut state = self.state.lock().await;
        state.require_parent(file.parent_id)?;
        Ok(state.insert(
            DriveItem {
                name: file.name.to_string(),
                mime_type: file.mime_type.to_string(),
                parents: vec![file.parent_id.to_string()],
                size: Some(content.len().to_string()),
                ..DriveItem::default()
            },
            content,
        ))
    }
}

#[derive(Debug, PartialEq)]
enum Clause {
    InParents(String),
    Trashed(bool),
    SharedWithMe(bool),
    Name(String),
    MimeType(String),
}

impl Clause {
    fn matches(&self, entry: &Entry) -> bool {
        match self {
            Clause::InParents(id) => entry.item.parents.iter().any(|parent| parent == id),
            Clause::Trashed(value) => entry.item.trashed == *value,
            Clause::SharedWithMe(value) => entry.shared_with_me == *value,
            Clause::Name(name) => entry.item.name == *name,
            Clause::MimeType(mime) => entry.item.mime_type == *mime,
        }
    }
}

fn invalid_query(detail: impl Into<String>) -> DriveError {
    DriveError::Api {
        status: 400,
        message: detail.into(),
    }
}

fn parse_query(query: &str) -> Result<Vec<Clause>, DriveError> {
    split_clauses(query)
        .iter()
        .map(|clause| parse_clause(clause.trim()))
        .collect()
}

/// 在引号外的 ` and ` 处切分子句。
fn split_clauses(query: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut escaped = false;
    let mut rest = query;

    while let Some(ch) = rest.chars().next() {
        if !in_quote && rest.starts_with(" and ") {
            clauses.push(std::mem::take(&mut current));
            rest = &rest[" and ".len()..];
            continue;
        }
        if escaped {
            escaped = false;
        } else if in_quote && ch == '\\' {
            escaped = true;
        } else if ch == '\'' {
            in_quote = !in_quote;
        }
        current.push(ch);
        rest = &rest[ch.len_utf8()..];
    }
    clauses.push(current);
    clauses
}

fn parse_clause(clause: &str) -> Result<Clause, DriveError> {
    if let Some(literal) = clause.strip_suffix(" in parents") {
        return Ok(Clause::InParents(parse_literal(literal.trim())?));
    }
    let (key, value) = clause
        .split_once('=')
        .ok_or_else(|| invalid_query(format!("unsupported clause: {clause}")))?;
    let value = value.trim();
    match key.trim() {
        "trashed" => Ok(Clause::Trashed(parse_bool(value)?)),
        "sharedWithMe" => Ok(Clause::SharedWithMe(parse_bool(value)?)),
        "name" => Ok(Clause::Name(parse_literal(value)?)),
        "mimeType" => Ok(Clause::MimeType(parse_literal(value)?)),
        other => Err(invalid_query(format!("unsupported field: {other}"))),
    }
}

fn parse_bool(value: &str) -> Result<bool, DriveError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        other => Err(invalid_query(format!("invalid boolean: {other}"))),
    }
}

fn parse_literal(value: &str) -> Result<String, DriveError> {
    let inner = value
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .ok_or_else(|| invalid_query(format!("invalid literal: {value}")))?;
    let mut literal = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(next) => literal.push(next),
                None => return Err(invalid_query("dangling escape")),
            },
            '\'' => return Err(invalid_query(format!("unescaped quote in {value}"))),
            _ => literal.push(ch),
        }
    }
    Ok(literal)
}

#[derive(Debug)]
enum SortKey {
    Folder,
    Name,
    CreatedTime,
    ModifiedTime,
    QuotaBytesUsed,
}

#[derive(Debug)]
struct OrderKey {
    key: SortKey,
    descending: bool,
}

impl OrderKey {
    fn compare(&self, a: &DriveItem, b: &DriveItem) -> Ordering {
        let ordering = match self.key {
            SortKey::Folder => b.is_folder().cmp(&a.is_folder()),
            SortKey::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
            SortKey::CreatedTime => a.created_time.cmp(&b.created_time),
            SortKey::ModifiedTime => a.modified_time.cmp(&b.modified_time),
            SortKey::QuotaBytesUsed => byte_size(a).cmp(&byte_size(b)),
        };
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

fn byte_size(item: &DriveItem) -> u64 {
    item.size
        .as_deref()
        .and_then(|size| size.parse().ok())
        .unwrap_or(0)
}

fn parse_order(order_by: &str) -> Result<Vec<OrderKey>, DriveError> {
    order_by
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut words = part.split_whitespace();
            let key = match words.next().unwrap_or_default() {
                "folder" => SortKey::Folder,
                "name" => SortKey::Name,
                "createdTime" => SortKey::CreatedTime,
                "modifiedTime" => SortKey::ModifiedTime,
                "quotaBytesUsed" => SortKey::QuotaBytesUsed,
                other => return Err(invalid_query(format!("invalid orderBy key: {other}"))),
            };
            let descending = match words.next() {
                None | Some("asc") => false,
                Some("desc") => true,
                Some(other) => return Err(invalid_query(format!("invalid sort order: {other}"))),
            };
            Ok(OrderKey { key, descending })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_clauses_ignores_and_inside_literals() {
        let clauses = split_clauses("name = 'salt and pepper' and trashed = false");
        assert_eq!(clauses, vec!["name = 'salt and pepper'", "trashed = false"]);
    }

    #[test]
    fn parse_literal_unescapes_and_rejects_bare_quotes() {
        assert_eq!(parse_literal(r"'o\'brien\\x'").expect("literal"), r"o'brien\x");
        assert!(parse_literal("'a' or 'b'").is_err());
    }

    #[tokio::test]
    async fn list_filters_by_parent_and_trash_state() {
        let drive = MemoryDrive::new();
        let master = drive.create_top_level_folder("master").await;
        let child = drive
            .create_folder("docs", &master.id)
            .await
            .expect("create folder");
        let trashed = drive
            .create_folder("old", &master.id)
            .await
            .expect("create folder");
        drive
            .update(&trashed.id, &ItemPatch::trashed(true))
            .await
            .expect("trash");

        let live = drive
            .list(&format!("'{}' in parents and trashed = false", master.id), None)
            .await
            .expect("list");
        assert_eq!(live, vec![child]);

        let bin = drive
            .list(&format!("'{}' in parents and trashed = true", master.id), None)
            .await
            .expect("list");
        assert_eq!(bin.len(), 1);
        assert_eq!(bin[0].id, trashed.id);
    }

    #[tokio::test]
    async fn create_folder_requires_existing_parent() {
        let drive = MemoryDrive::new();
        let result = drive.create_folder("x", "missing").await;
        assert!(matches!(result, Err(DriveError::NotFound(_))));
    }

    #[test]
    fn order_rejects_unknown_keys() {
        assert!(parse_order("folder, name desc").is_ok());
        assert!(parse_order("size asc").is_err());
    }
}
