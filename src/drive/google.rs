//! Google Drive v3 REST 客户端。
//!
//! 通过刷新令牌换取访问令牌，并缓存到过期前一分钟。

use async_trait::async_trait;
use axum::body::Bytes;
use futures_util::stream::{self, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::{self, File};
use tokio::sync::Mutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use uuid::Uuid;

use super::{DriveError, DriveItem, FOLDER_MIME_TYPE, ITEM_FIELDS, ItemPatch, NewFile, StorageProvider};

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const LIST_PAGE_SIZE: &str = "1000";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct GoogleDriveConfig {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Debug)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveItem>,
    next_page_token: Option<String>,
}

pub struct GoogleDrive {
    config: GoogleDriveConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleDrive {
    pub fn new(config: GoogleDriveConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            token: Mutex::new(None),
        }
    }

    /// 返回有效的访问令牌，必要时用刷新令牌重新获取。
    async fn access_token(&self) -> Result<String, DriveError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now()
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|err| DriveError::Unavailable(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(DriveError::Unavailable(format!(
                "token refresh failed {status}: {text}"
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|err| DriveError::Decode(err.to_string()))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        debug!(expires_in = lifetime.as_secs(), "drive access token refreshed");
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN),
        });
        Ok(token.access_token)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        target: &str,
    ) -> Result<T, DriveError> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| DriveError::Unavailable(err.to_string()))?;
        let response = check_status(response, target).await?;
        response
            .json()
            .await
            .map_err(|err| DriveError::Decode(err.to_string()))
    }
}

async fn check_status(response: Response, target: &str) -> Result<Response, DriveError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(DriveError::NotFound(target.to_string()));
    }
    let message = response.text().await.unwrap_or_default();
    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
        return Err(DriveError::Unavailable(format!("{status}: {message}")));
    }
    Err(DriveError::Api {
        status: status.as_u16(),
        message,
    })
}

/// Query parameters for one `files.list` page.
fn list_params<'a>(
    query: &'a str,
    fields: &'a str,
    order_by: Option<&'a str>,
    page_token: Option<&'a str>,
) -> Vec<(&'static str, &'a str)> {
    let mut params = vec![
        ("q", query),
        ("fields", fields),
        ("pageSize", LIST_PAGE_SIZE),
        ("spaces", "drive"),
    ];
    if let Some(order_by) = order_by {
        params.push(("orderBy", order_by));
    }
    if let Some(token) = page_token {
        params.push(("pageToken", token));
    }
    params
}

/// `multipart/related` parts surrounding the streamed file content.
struct MultipartFrame {
    head: String,
    tail: String,
}

impl MultipartFrame {
    fn new(boundary: &str, metadata: &serde_json::Value, mime_type: &str) -> Self {
        let head = format!(
            "--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{boundary}\r\nContent-Type: {mime_type}\r\n\r\n"
        );
        let tail = format!("\r\n--{boundary}--\r\n");
        Self { head, tail }
    }

    fn content_length(&self, content_len: u64) -> u64 {
        self.head.len() as u64 + content_len + self.tail.len() as u64
    }
}

#[async_trait]
impl StorageProvider for GoogleDrive {
    async fn list(&self, query: &str, order_by: Option<&str>) -> Result<Vec<DriveItem>, DriveError> {
        let fields = format!("nextPageToken,files({ITEM_FIELDS})");
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let request = self
                .client
                .get(format!("{DRIVE_API_BASE}/files"))
                .query(&list_params(query, &fields, order_by, page_token.as_deref()));
            let page: FileList = self.send(request, "files").await?;
            items.extend(page.files);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(items)
    }

    async fn get(&self, id: &str) -> Result<DriveItem, DriveError> {
        let request = self
            .client
            .get(format!("{DRIVE_API_BASE}/files/{id}"))
            .query(&[("fields", ITEM_FIELDS)]);
        self.send(request, id).await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveItem, DriveError> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let request = self
            .client
            .post(format!("{DRIVE_API_BASE}/files"))
            .query(&[("fields", ITEM_FIELDS)])
            .json(&metadata);
        let folder: DriveItem = self.send(request, parent_id).await?;
        info!(folder_id = folder.id, parent_id, "drive folder created");
        Ok(folder)
    }

    async fn update(&self, id: &str, patch: &ItemPatch) -> Result<DriveItem, DriveError> {
        let request = self
            .client
            .patch(format!("{DRIVE_API_BASE}/files/{id}"))
            .query(&[("fields", ITEM_FIELDS)])
            .json(patch);
        self.send(request, id).await
    }

    async fn upload(&self, file: NewFile<'_>, source: &Path) -> Result<DriveItem, DriveError> {
        let metadata = serde_json::json!({
            "name": file.name,
            "parents": [file.parent_id],
        });
        let boundary = format!("drive-vault-{}", Uuid::new_v4().simple());
        let frame = MultipartFrame::new(&boundary, &metadata, file.mime_type);

        let content_len = fs::metadata(source).await?.len();
        let total_len = frame.content_length(content_len);
        let content = File::open(source).await?;
        let MultipartFrame { head, tail } = frame;
        let body = stream::once(async move { Ok::<_, std::io::Error>(Bytes::from(head)) })
            .chain(ReaderStream::new(content))
            .chain(stream::once(async move { Ok(Bytes::from(tail)) }));

        let request = self
            .client
            .post(format!("{UPLOAD_API_BASE}/files"))
            .query(&[("uploadType", "multipart"), ("fields", ITEM_FIELDS)])
            .header(
                CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .header(CONTENT_LENGTH, total_len)
            .body(reqwest::Body::wrap_stream(body));
        let uploaded: DriveItem = self.send(request, file.parent_id).await?;
        info!(
            file_id = uploaded.id,
            parent_id = file.parent_id,
            size = content_len,
            "drive file uploaded"
        );
        Ok(uploaded)
    }
}
