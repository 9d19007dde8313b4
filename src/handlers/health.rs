//! `/health` 存活检查与 `/ready` 就绪检查

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
    time::Instant,
};

use crate::{db, middleware::AppState};

static STARTED_AT: OnceLock<Instant> = OnceLock::new();

/// 记录进程启动时刻，只有第一次调用生效
pub fn set_start_time() {
    STARTED_AT.get_or_init(Instant::now);
}

pub fn get_uptime() -> u64 {
    STARTED_AT.get().map_or(0, |at| at.elapsed().as_secs())
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    Up,
    Down { reason: String },
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub checks: BTreeMap<&'static str, CheckStatus>,
}

/// 不碰任何依赖
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: get_uptime(),
    })
}

/// 数据库可用（若配置了）并且投递调度器未进入关闭流程
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ReadinessResponse>) {
    let mut checks = BTreeMap::new();

    if let Some(pool) = &state.db {
        let status = match db::health_check(pool).await {
            db::HealthStatus::Healthy => CheckStatus::Up,
            db::HealthStatus::Unhealthy(reason) => CheckStatus::Down { reason },
        };
        checks.insert("database", status);
    }

    let dispatcher = if state.dispatcher.is_shutting_down() {
        CheckStatus::Down {
            reason: "shutting down".to_string(),
        }
    } else {
        CheckStatus::Up
    };
    checks.insert("delivery_dispatcher", dispatcher);

    let ready = checks.values().all(|status| *status == CheckStatus::Up);
    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(ReadinessResponse { ready, checks }))
}
