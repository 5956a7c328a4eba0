//! TLS 证书加载。

use axum_server::tls_rustls::RustlsConfig;
use std::io;
use tokio::fs;
use tracing::info;

use crate::config::Args;

/// 证书与私钥同时配置时构建 Rustls 配置，否则返回 `None`（纯 HTTP）。
pub async fn build_rustls_config(args: &Args) -> io::Result<Option<RustlsConfig>> {
    let (cert_path, key_path) = match (&args.tls_cert, &args.tls_key) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => return Ok(None),
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "both --tls-cert and --tls-key are required for HTTPS",
            ));
        }
    };

    let cert = fs::read(cert_path).await?;
    let key = fs::read(key_path).await?;
    info!(cert = cert_path, "loaded TLS certificate");
    RustlsConfig::from_pem(cert, key).await.map(Some)
}
