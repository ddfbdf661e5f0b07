//! Built-in diagnostic endpoints served while the toggler keeps the listener up.

use crate::toggle::asyncutil::{TaskStats, TaskTracker};
use crate::toggle::build_info;
use crate::toggle::profile::{self, ProfileError, DEFAULT_PROFILE_SECONDS};
use axum::extract::{Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEBUG_PATH: &str = "/debug/pprof";

const ENDPOINTS: &[(&str, &str)] = &[
    ("cmdline", "command line of the running process, NUL separated"),
    ("profile", "CPU profile in pprof format; ?seconds=N (default 30)"),
    ("build", "build host and build time"),
    ("tasks", "tasks spawned by the toggler (json)"),
    ("runtime", "tokio runtime counters (json)"),
];

#[derive(Clone)]
struct DiagState {
    base: Arc<str>,
    tasks: TaskTracker,
    request_timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
struct ProfileParams {
    seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
struct RuntimeStats {
    workers: usize,
    alive_tasks: usize,
}

/// `"/extra/"` -> `"/extra"`, `"extra"` -> `"/extra"`, `"/"` or `""` -> `""`.
pub fn normalize_prefix(prefix: &str) -> String {
    let t = prefix.trim().trim_end_matches('/');
    if t.is_empty() {
        return String::new();
    }
    if t.starts_with('/') {
        t.to_string()
    } else {
        format!("/{t}")
    }
}

/// Full path of the endpoint index for a given prefix, e.g. `/extra/debug/pprof/`.
pub fn index_path(prefix: &str) -> String {
    format!("{}{DEBUG_PATH}/", normalize_prefix(prefix))
}

/// Builds the router served by the controlled service.
///
/// `extra` routes are mounted under the same prefix as the built-in ones.
pub fn diagnostic_router(
    prefix: &str,
    tasks: TaskTracker,
    extra: Option<Router>,
    request_timeout: Option<Duration>,
) -> Router {
    let prefix = normalize_prefix(prefix);
    let st = DiagState {
        base: Arc::from(format!("{prefix}{DEBUG_PATH}/")),
        tasks,
        request_timeout,
    };

    let mut inner = Router::new()
        .route(DEBUG_PATH, get(|| async { Redirect::permanent("pprof/") }))
        .route(&format!("{DEBUG_PATH}/"), get(index))
        .route(&format!("{DEBUG_PATH}/cmdline"), get(cmdline))
        .route(&format!("{DEBUG_PATH}/profile"), get(cpu_profile))
        .route(&format!("{DEBUG_PATH}/build"), get(build))
        .route(&format!("{DEBUG_PATH}/tasks"), get(tasks_stats))
        .route(&format!("{DEBUG_PATH}/runtime"), get(runtime_stats))
        .with_state(st);
    if let Some(extra) = extra {
        inner = inner.merge(extra);
    }

    let mut router = if prefix.is_empty() {
        inner
    } else {
        Router::new().nest(&prefix, inner)
    };
    if let Some(limit) = request_timeout {
        router = router.layer(middleware::from_fn_with_state(limit, enforce_request_timeout));
    }
    router
}

async fn enforce_request_timeout(State(limit): State<Duration>, req: Request, next: Next) -> Response {
    match tokio::time::timeout(limit, next.run(req)).await {
        Ok(resp) => resp,
        Err(_) => (StatusCode::REQUEST_TIMEOUT, "request timed out").into_response(),
    }
}

async fn index(State(st): State<DiagState>) -> String {
    let mut out = format!("{}\n\n", build_info::banner());
    for (name, about) in ENDPOINTS {
        out.push_str(&format!("{}{name}\t{about}\n", st.base));
    }
    out
}

async fn cmdline() -> Response {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        args.join("\0"),
    )
        .into_response()
}

async fn cpu_profile(State(st): State<DiagState>, Query(params): Query<ProfileParams>) -> Response {
    let seconds = params.seconds.unwrap_or(DEFAULT_PROFILE_SECONDS);
    let duration = match profile::validate_duration(seconds, st.request_timeout) {
        Ok(d) => d,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    match profile::capture_cpu_profile(duration).await {
        Ok(body) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/octet-stream"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"profile\""),
            ],
            body,
        )
            .into_response(),
        Err(e @ ProfileError::Busy) => (StatusCode::CONFLICT, e.to_string()).into_response(),
        Err(e @ ProfileError::Unsupported) => (StatusCode::NOT_IMPLEMENTED, e.to_string()).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn build() -> String {
    build_info::banner()
}

async fn tasks_stats(State(st): State<DiagState>) -> Json<TaskStats> {
    Json(st.tasks.stats())
}

async fn runtime_stats() -> Json<RuntimeStats> {
    let metrics = tokio::runtime::Handle::current().metrics();
    Json(RuntimeStats {
        workers: metrics.num_workers(),
        alive_tasks: metrics.num_alive_tasks(),
    })
}
