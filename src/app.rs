//! 路由装配：处理器、认证中间件、安全头与请求追踪。

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info_span};

use crate::auth::{self, Authenticator};
use crate::http::{self, resolve_client_ip};
use crate::upload::UploadConfig;
use crate::vault::Vault;
use crate::{account, files, health, upload};

pub fn build_router(
    vault: Arc<Vault>,
    authenticator: Arc<Authenticator>,
    upload_config: Arc<UploadConfig>,
    cors: Option<CorsLayer>,
) -> Router {
    let app = Router::new()
        .route("/initializeUser", post(account::initialize_user))
        .route(
            "/uploadFile",
            post(upload::upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/listFiles", get(files::list_files))
        .route("/createFolder", post(files::create_folder))
        .route("/deleteItem", delete(files::delete_item))
        .route("/restoreItem", post(files::restore_item))
        .route("/renameItem", post(files::rename_item))
        .route("/health", get(health::health))
        .layer(middleware::from_fn(auth::auth_middleware))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(Extension(vault))
        .layer(Extension(authenticator))
        .layer(Extension(upload_config));

    match cors {
        Some(cors_layer) => app.layer(cors_layer),
        None => app,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::{StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::auth::JwtVerifier;
    use crate::auth::testing::{TEST_SECRET, sign_token};
    use crate::vault::IsolationPolicy;
    use crate::vault::testing::memory_vault;

    const BOUNDARY: &str = "scenario-boundary";

    struct TestApp {
        router: Router,
        _spool: TempDir,
    }

    async fn test_app() -> TestApp {
        let spool = tempfile::tempdir().expect("tempdir");
        let (_drive, _master, vault) = memory_vault(IsolationPolicy::Token).await;
        let authenticator = Authenticator {
            policy: IsolationPolicy::Token,
            verifier: Some(Arc::new(JwtVerifier::with_secret(TEST_SECRET))),
        };
        let upload = UploadConfig {
            spool_dir: spool.path().join("spool"),
            max_file_size: 1024 * 1024,
            spool_ttl: Duration::from_secs(3600),
        };
        TestApp {
            router: build_router(
                Arc::new(vault),
                Arc::new(authenticator),
                Arc::new(upload),
                None,
            ),
            _spool: spool,
        }
    }

    fn token(subject: &str) -> String {
        format!("Bearer {}", sign_token(TEST_SECRET, subject, 600))
    }

    async fn send(app: &TestApp, request: Request<AxumBody>) -> (StatusCode, Value) {
        let response = app
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, body)
    }

    fn request(method: &str, uri: &str, subject: &str) -> Request<AxumBody> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, token(subject))
            .body(AxumBody::empty())
            .expect("request")
    }

    fn json_request(method: &str, uri: &str, subject: &str, body: Value) -> Request<AxumBody> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, token(subject))
            .header(header::CONTENT_TYPE, "application/json")
            .body(AxumBody::from(body.to_string()))
            .expect("request")
    }

    fn upload_request(uri: &str, subject: &str, filename: &str, content: &str) -> Request<AxumBody> {
        let body = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\r\n{content}\r\n--{BOUNDARY}--\r\n"
        );
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, token(subject))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(body))
            .expect("request")
    }

    fn ids(listing: &Value) -> Vec<String> {
        listing["files"]
            .as_array()
            .expect("files")
            .iter()
            .filter_map(|file| file["id"].as_str().map(str::to_string))
            .collect()
    }

    #[tokio::test]
    async fn upload_trash_restore_round_trip() {
        let app = test_app().await;

        let (status, init) = send(&app, request("POST", "/initializeUser", "u1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(init["success"], json!(true));
        let root = init["folderId"].as_str().expect("folderId").to_string();

        let (status, uploaded) = send(
            &app,
            upload_request("/uploadFile", "u1", "report.pdf", "%PDF-1.4"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let file_id = uploaded["files"][0]["id"].as_str().expect("id").to_string();
        assert_eq!(uploaded["files"][0]["parents"], json!([root]));

        let (_, listing) = send(&app, request("GET", "/listFiles?view=my-files", "u1")).await;
        assert_eq!(listing["currentFolderId"], json!(root));
        assert_eq!(listing["rootFolderId"], json!(root));
        assert_eq!(ids(&listing), vec![file_id.clone()]);

        let (status, deleted) = send(
            &app,
            request("DELETE", &format!("/deleteItem?fileId={file_id}"), "u1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted, json!({ "success": true }));

        let (_, trash) = send(&app, request("GET", "/listFiles?view=trash", "u1")).await;
        assert_eq!(ids(&trash), vec![file_id.clone()]);
        let (_, listing) = send(&app, request("GET", "/listFiles", "u1")).await;
        assert!(ids(&listing).is_empty());

        let (status, _) = send(
            &app,
            request("POST", &format!("/restoreItem?fileId={file_id}"), "u1"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, listing) = send(&app, request("GET", "/listFiles?view=my-files", "u1")).await;
        assert_eq!(ids(&listing), vec![file_id]);
        let (_, trash) = send(&app, request("GET", "/listFiles?view=trash", "u1")).await;
        assert!(ids(&trash).is_empty());
    }

    #[tokio::test]
    async fn users_cannot_reach_each_others_items() {
        let app = test_app().await;
        let (_, init) = send(&app, request("POST", "/initializeUser", "alice")).await;
        let alice_root = init["folderId"].as_str().expect("folderId").to_string();
        let (status, folder) = send(
            &app,
            json_request("POST", "/createFolder", "alice", json!({ "name": "private" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let folder_id = folder["id"].as_str().expect("id").to_string();

        let (status, _) = send(
            &app,
            request("GET", &format!("/listFiles?folderId={alice_root}"), "bob"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            request("DELETE", &format!("/deleteItem?fileId={folder_id}"), "bob"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            json_request(
                "POST",
                "/renameItem",
                "bob",
                json!({ "fileId": folder_id, "newName": "taken" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(
            &app,
            upload_request(&format!("/uploadFile?folderId={folder_id}"), "bob", "x.txt", "x"),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, bob_listing) = send(&app, request("GET", "/listFiles", "bob")).await;
        assert_ne!(bob_listing["rootFolderId"], json!(alice_root));
        assert!(ids(&bob_listing).is_empty());
    }

    #[tokio::test]
    async fn credential_and_parameter_errors_map_to_statuses() {
        let app = test_app().await;

        let unauthenticated = Request::builder()
            .uri("/listFiles")
            .body(AxumBody::empty())
            .expect("request");
        let (status, body) = send(&app, unauthenticated).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].is_string());

        let forged = Request::builder()
            .uri("/listFiles")
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", sign_token("wrong-secret", "u1", 600)),
            )
            .body(AxumBody::empty())
            .expect("request");
        let (status, _) = send(&app, forged).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, request("DELETE", "/deleteItem", "u1")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request("GET", "/listFiles?folderId=bad'id", "u1"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            request("POST", "/restoreItem?fileId=missing-item", "u1"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_needs_no_credential_and_sets_security_headers() {
        let app = test_app().await;
        let response = app
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(AxumBody::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::X_CONTENT_TYPE_OPTIONS)
                .and_then(|value| value.to_str().ok()),
            Some("nosniff")
        );
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body["status"], json!("OK"));
    }
}
