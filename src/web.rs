//! Local HTTP API for the admin dashboard: module toggles, per-module
//! config, log tail and backup restore. Binds to loopback by default.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::context::AppContext;
use crate::modules::ModuleRegistry;

/// Most recent log lines returned by `/api/logs`.
const LOG_TAIL_LINES: usize = 200;

#[derive(Clone)]
pub struct WebState {
    pub app: Arc<AppContext>,
    pub modules: Arc<ModuleRegistry>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .route("/api/modules", get(list_modules))
        .route(
            "/api/modules/:name/config",
            get(get_module_config).post(set_module_config),
        )
        .route("/api/modules/:name/enabled", post(set_module_enabled))
        .route("/api/logs", get(tail_logs))
        .route("/api/backups", get(list_backups))
        .route("/api/backups/:name/restore", post(restore_backup))
        .with_state(state)
}

pub async fn serve(state: WebState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.app.config.web_host, state.app.config.web_port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Dashboard API listening on http://{addr}");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn status(State(state): State<WebState>) -> Json<Value> {
    let catalog = state.app.catalog();
    let enabled = catalog.iter().filter(|info| info.enabled).count();
    Json(json!({
        "status": "ok",
        "uptime_seconds": state.app.uptime().as_secs(),
        "modules_loaded": catalog.len(),
        "modules_enabled": enabled,
        "commands": state.app.commands.len(),
    }))
}

async fn list_modules(State(state): State<WebState>) -> Json<Value> {
    Json(json!({ "modules": state.app.catalog() }))
}

async fn get_module_config(
    State(state): State<WebState>,
    Path(name): Path<String>,
) -> Response {
    if state.modules.get(&name).is_none() {
        return not_found(&name);
    }
    Json(state.app.store.module_config(&name)).into_response()
}

async fn set_module_config(
    State(state): State<WebState>,
    Path(name): Path<String>,
    Json(patch): Json<Map<String, Value>>,
) -> Response {
    if state.modules.get(&name).is_none() {
        return not_found(&name);
    }
    state.app.store.update_module_config(&name, patch);
    if let Err(e) = state.app.store.save() {
        warn!("Failed to persist config for module '{name}': {e}");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": "config not persisted" })),
        )
            .into_response();
    }
    info!("Module '{name}' config updated via dashboard");
    Json(state.app.store.module_config(&name)).into_response()
}

#[derive(Deserialize)]
struct EnabledBody {
    enabled: bool,
}

async fn set_module_enabled(
    State(state): State<WebState>,
    Path(name): Path<String>,
    Json(body): Json<EnabledBody>,
) -> Response {
    let Some(module) = state.modules.get(&name) else {
        return not_found(&name);
    };
    module.set_enabled(body.enabled);
    state
        .app
        .store
        .set(&format!("modules.{name}.enabled"), json!(body.enabled));
    if let Err(e) = state.app.store.save() {
        warn!("Failed to persist enabled flag for module '{name}': {e}");
    }
    Json(json!({ "name": name, "enabled": body.enabled })).into_response()
}

async fn tail_logs(State(state): State<WebState>) -> Response {
    let file = std::path::Path::new(&state.app.config.log_dir)
        .join(format!("log-{}.txt", Utc::now().format("%Y-%m-%d")));
    match std::fs::read_to_string(&file) {
        Ok(content) => {
            let lines: Vec<&str> = content.lines().collect();
            let start = lines.len().saturating_sub(LOG_TAIL_LINES);
            Json(json!({ "lines": lines[start..] })).into_response()
        }
        Err(_) => Json(json!({ "lines": [] })).into_response(),
    }
}

async fn list_backups(State(state): State<WebState>) -> Json<Value> {
    Json(json!({ "backups": state.app.store.backup_list() }))
}

async fn restore_backup(
    State(state): State<WebState>,
    Path(name): Path<String>,
) -> Response {
    // load_backup persists the restored tree itself.
    if !state.app.store.load_backup(&name) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("backup '{name}' not found") })),
        )
            .into_response();
    }
    info!("Backup '{name}' restored via dashboard");
    Json(json!({ "restored": name })).into_response()
}

fn not_found(name: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("module '{name}' not found") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::testutil::StubModule;
    use crate::modules::Capabilities;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> WebState {
        let app = crate::context::testutil::test_context(dir);
        let mut modules = ModuleRegistry::new();
        modules.insert(Arc::new(StubModule::new("welcome", Capabilities::default())));
        WebState {
            app,
            modules: Arc::new(modules),
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_status_route() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let response = app
            .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn test_module_config_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/modules/welcome/config")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"join_message":"hi {username}"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/api/modules/welcome/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["join_message"], "hi {username}");
    }

    #[tokio::test]
    async fn test_unknown_module_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(dir.path()));

        let response = app
            .oneshot(
                Request::get("/api/modules/nope/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_restore_writes_exactly_one_backup() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = router(state.clone());

        state.app.store.save().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(3));
        state.app.store.save().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(3));
        let backups = state.app.store.backup_list();
        let latest = backups.first().unwrap().clone();
        let count_before = backups.len();

        let response = app
            .oneshot(
                Request::post(format!("/api/backups/{latest}/restore"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Restoring persists once, so exactly one backup is added.
        assert_eq!(state.app.store.backup_list().len(), count_before + 1);
    }

    #[tokio::test]
    async fn test_enabled_toggle_updates_store() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::post("/api/modules/welcome/enabled")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"enabled":false}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.app.store.get_bool("modules.welcome.enabled", true));
    }
}
