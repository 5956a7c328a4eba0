//! 查询构造：视图、排序与过滤表达式。
//!
//! 所有插入到过滤表达式中的 ID 都先经过校验，名称则统一转义。

use serde::Serialize;
use std::fmt;

use super::VaultError;
use crate::drive::FOLDER_MIME_TYPE;

const MAX_FOLDER_ID_LEN: usize = 256;

/// A provider item ID that is safe to interpolate into a filter expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct FolderId(String);

impl FolderId {
    pub fn parse(raw: &str) -> Result<Self, VaultError> {
        let valid = !raw.is_empty()
            && raw.len() <= MAX_FOLDER_ID_LEN
            && raw
                .bytes()
                .all(|byte| byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_');
        if !valid {
            return Err(VaultError::InvalidFolderId(raw.chars().take(64).collect()));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    #[default]
    MyFiles,
    Recent,
    Shared,
    Trash,
}

impl View {
    /// Unknown values fall back to `my-files`.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("recent") => View::Recent,
            Some("shared") => View::Shared,
            Some("trash") => View::Trash,
            _ => View::MyFiles,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            View::MyFiles => "my-files",
            View::Recent => "recent",
            View::Shared => "shared",
            View::Trash => "trash",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    Name,
    CreatedTime,
    Size,
}

impl SortField {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("createdTime") => SortField::CreatedTime,
            Some("size") => SortField::Size,
            _ => SortField::Name,
        }
    }

    /// 对应提供方的排序字段；大小以配额占用字节数近似。
    pub fn order_key(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::CreatedTime => "createdTime",
            SortField::Size => "quotaBytesUsed",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn parse(field: Option<&str>, order: Option<&str>) -> Self {
        Self {
            field: SortField::parse(field),
            order: SortOrder::parse(order),
        }
    }
}

/// 转义查询字符串字面量中的反斜杠与单引号。
pub fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch == '\\' || ch == '\'' {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// 根据视图构造过滤表达式。
pub fn build_query(view: View, target: &FolderId, root: &FolderId) -> String {
    match view {
        View::MyFiles => format!("'{target}' in parents and trashed = false"),
        View::Recent => format!("'{root}' in parents and trashed = false"),
        View::Shared => "sharedWithMe = true and trashed = false".to_string(),
        View::Trash => format!("'{root}' in parents and trashed = true"),
    }
}

pub fn build_order_by(sort: SortSpec) -> String {
    match sort.field {
        SortField::Name => format!("folder, name {}", sort.order.as_str()),
        field => format!("{} {}", field.order_key(), sort.order.as_str()),
    }
}

/// `recent` 视图总是按创建时间倒序，忽略请求的排序。
pub fn order_for_view(view: View, sort: SortSpec) -> String {
    match view {
        View::Recent => "createdTime desc".to_string(),
        _ => build_order_by(sort),
    }
}

/// Finds live folders named `name` directly under `parent`.
pub fn folder_by_name_query(name: &str, parent: &FolderId) -> String {
    format!(
        "name = '{}' and '{parent}' in parents and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false",
        escape_literal(name)
    )
}
