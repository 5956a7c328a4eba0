//! 健康检查处理器。

use axum::response::Json as JsonResponse;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthStatus {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> JsonResponse<HealthStatus> {
    JsonResponse(HealthStatus {
        status: "OK",
        version: env!("CARGO_PKG_VERSION"),
    })
}
