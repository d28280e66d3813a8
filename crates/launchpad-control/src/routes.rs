use std::fmt::Display;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::JsonRejection},
    response::Html,
    routing::{get, post},
};
use launchpad_agent::{ControllerError, StopOutcome, output::LogTail};
use launchpad_process::{DEFAULT_PORT, ExitSummary, ServerConfig, ServerConfigPatch};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

const CONFIG_LOCKED: &str = "Cannot change config while server is running";

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/start-server", post(start_server))
        .route("/stop-server", post(stop_server))
        .route("/server-status", get(server_status))
        .route("/api/config", get(get_config).post(update_config))
        .route("/api/logs", get(tail_logs))
        .with_state(state)
}

#[derive(Debug, Serialize)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_config: Option<ServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ServerConfig>,
}

impl Envelope {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            error: None,
            server_config: None,
            config: None,
        }
    }

    fn err(error: impl Display) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
            server_config: None,
            config: None,
        }
    }
}

/// `{}` while stopped, the running config otherwise.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ConfigView {
    Running(ServerConfig),
    Empty {},
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub running: bool,
    pub config: ConfigView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_exit: Option<ExitSummary>,
}

#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub config: ServerConfig,
    pub running: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    #[serde(default)]
    pub cursor: u64,
    #[serde(default)]
    pub limit: usize,
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn start_server(
    State(state): State<AppState>,
    payload: Result<Json<ServerConfigPatch>, JsonRejection>,
) -> Json<Envelope> {
    let patch = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => return Json(Envelope::err(rejection.body_text())),
    };
    let mut config = match patch.into_config() {
        Ok(c) => c,
        Err(e) => return Json(Envelope::err(e)),
    };
    config.port = DEFAULT_PORT;

    let res = state.controller.start(config.clone()).await;
    if !matches!(res, Err(ControllerError::AlreadyRunning)) {
        *state.requested.write().await = config.clone();
    }

    match res {
        Ok(_) => Json(Envelope {
            server_config: Some(config),
            ..Envelope::ok("Server started successfully")
        }),
        Err(e) => {
            tracing::warn!(error = %e, "start request failed");
            Json(Envelope::err(e))
        }
    }
}

async fn stop_server(State(state): State<AppState>) -> Json<Envelope> {
    match state.controller.stop().await {
        Ok(StopOutcome::Graceful) => Json(Envelope::ok("Server stopped successfully")),
        Ok(StopOutcome::Terminated) => {
            Json(Envelope::ok("Server stopped (terminated after timeout)"))
        }
        Err(e) => {
            tracing::warn!(error = %e, "stop request failed");
            Json(Envelope::err(e))
        }
    }
}

async fn server_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.controller.status();
    let running = status.is_running();
    let config = match status.config {
        Some(c) if running => ConfigView::Running(c),
        _ => ConfigView::Empty {},
    };
    Json(StatusResponse {
        running,
        config,
        last_exit: status.last_exit,
    })
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let config = state.requested.read().await.clone();
    Json(ConfigResponse {
        config,
        running: state.controller.is_running(),
    })
}

async fn update_config(
    State(state): State<AppState>,
    payload: Result<Json<ServerConfigPatch>, JsonRejection>,
) -> Json<Envelope> {
    let mut requested = state.requested.write().await;
    if state.controller.is_running() {
        return Json(Envelope::err(CONFIG_LOCKED));
    }

    let patch = match payload {
        Ok(Json(p)) => p,
        Err(rejection) => return Json(Envelope::err(rejection.body_text())),
    };
    match patch.apply_to(&requested) {
        Ok(config) => {
            *requested = config.clone();
            Json(Envelope {
                config: Some(config),
                ..Envelope::ok("Configuration updated")
            })
        }
        Err(e) => Json(Envelope::err(e)),
    }
}

async fn tail_logs(State(state): State<AppState>, Query(q): Query<LogsQuery>) -> Json<LogTail> {
    Json(state.controller.tail_logs(q.cursor, q.limit).await)
}

#[cfg(all(test, unix))]
mod tests {
    use std::{path::Path, time::Duration};

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use launchpad_agent::{
        AgentSettings, ServerController, ServerLayout, launch::LaunchSpec,
        settings::JAR_FILE_NAME,
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const COOPERATIVE: &str = r#"echo "Done (0.1s)!"; while read -r line; do if [ "$line" = stop ]; then exit 0; fi; done"#;

    fn settings(dir: &Path, jar_url: String) -> AgentSettings {
        AgentSettings {
            layout: ServerLayout::new(dir),
            jar_url,
            launch: LaunchSpec::new("/bin/sh", ["-c", COOPERATIVE]),
            bootstrap: LaunchSpec::new("/bin/sh", ["-c", "mkdir -p world"]),
            stop_command: "stop".to_string(),
            stop_timeout: Duration::from_secs(5),
            bootstrap_timeout: Duration::from_secs(5),
            log_max_lines: 1000,
        }
    }

    // Jar already present, so nothing is downloaded.
    fn local_app(dir: &Path) -> Router {
        std::fs::write(dir.join(JAR_FILE_NAME), b"jar").unwrap();
        let c = ServerController::new(settings(dir, "http://127.0.0.1:9/unused".into())).unwrap();
        router(AppState::new(c))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Value {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn start_scenario_downloads_configures_and_runs() {
        let jar_host = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/server/jar"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"PK-fake-jar".to_vec()))
            .expect(1)
            .mount(&jar_host)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let c = ServerController::new(settings(
            dir.path(),
            format!("{}/server/jar", jar_host.uri()),
        ))
        .unwrap();
        let app = router(AppState::new(c));

        let v = send(
            &app,
            "POST",
            "/start-server",
            Some(json!({"motd": "Hi", "maxPlayers": 5})),
        )
        .await;
        assert_eq!(v["success"], true, "{v}");
        assert_eq!(v["message"], "Server started successfully");
        assert_eq!(v["server_config"]["motd"], "Hi");
        assert_eq!(v["server_config"]["max_players"], 5);
        assert_eq!(v["server_config"]["port"], 25565);

        assert_eq!(
            std::fs::read(dir.path().join(JAR_FILE_NAME)).unwrap(),
            b"PK-fake-jar"
        );
        let props = std::fs::read_to_string(dir.path().join("server.properties")).unwrap();
        assert!(props.contains("max-players=5\n"));
        assert!(props.contains("motd=Hi\n"));

        let status = send(&app, "GET", "/server-status", None).await;
        assert_eq!(status["running"], true);
        assert_eq!(status["config"]["motd"], "Hi");

        let v = send(
            &app,
            "POST",
            "/api/config",
            Some(json!({"difficulty": "hard"})),
        )
        .await;
        assert_eq!(
            v,
            json!({"success": false, "error": "Cannot change config while server is running"})
        );
        let cfg = send(&app, "GET", "/api/config", None).await;
        assert_eq!(cfg["running"], true);
        assert_eq!(cfg["config"]["difficulty"], "easy");

        let v = send(&app, "POST", "/stop-server", None).await;
        assert_eq!(
            v,
            json!({"success": true, "message": "Server stopped successfully"})
        );

        let status = send(&app, "GET", "/server-status", None).await;
        assert_eq!(status["running"], false);
        assert_eq!(status["config"], json!({}));
    }

    #[tokio::test]
    async fn stop_when_stopped_reports_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let app = local_app(dir.path());

        let v = send(&app, "POST", "/stop-server", None).await;
        assert_eq!(v, json!({"success": false, "error": "Server is not running"}));
    }

    #[tokio::test]
    async fn second_start_is_rejected_and_port_is_forced() {
        let dir = tempfile::tempdir().unwrap();
        let app = local_app(dir.path());

        let v = send(
            &app,
            "POST",
            "/start-server",
            Some(json!({"gamemode": "creative", "port": 1234})),
        )
        .await;
        assert_eq!(v["success"], true, "{v}");
        assert_eq!(v["server_config"]["port"], 25565);
        assert_eq!(v["server_config"]["gamemode"], "creative");

        let v = send(&app, "POST", "/start-server", Some(json!({"motd": "other"}))).await;
        assert_eq!(
            v,
            json!({"success": false, "error": "Server is already running"})
        );
        // The rejected request does not replace the shown config.
        let cfg = send(&app, "GET", "/api/config", None).await;
        assert_eq!(cfg["config"]["gamemode"], "creative");
        assert_eq!(cfg["config"]["motd"], "A Minecraft Server");

        let v = send(&app, "POST", "/stop-server", None).await;
        assert_eq!(v["success"], true);
    }

    #[tokio::test]
    async fn config_update_merges_while_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let app = local_app(dir.path());

        let cfg = send(&app, "GET", "/api/config", None).await;
        assert_eq!(cfg["running"], false);
        assert_eq!(cfg["config"]["max_players"], 20);

        let v = send(
            &app,
            "POST",
            "/api/config",
            Some(json!({"maxPlayers": 12, "difficulty": "peaceful"})),
        )
        .await;
        assert_eq!(v["success"], true);
        assert_eq!(v["message"], "Configuration updated");
        assert_eq!(v["config"]["max_players"], 12);
        assert_eq!(v["config"]["difficulty"], "peaceful");
        assert_eq!(v["config"]["motd"], "A Minecraft Server");

        let v = send(&app, "POST", "/api/config", Some(json!({"motd": "x"}))).await;
        assert_eq!(v["config"]["max_players"], 12);
        assert_eq!(v["config"]["motd"], "x");
    }

    #[tokio::test]
    async fn invalid_payloads_get_error_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let app = local_app(dir.path());

        let v = send(
            &app,
            "POST",
            "/start-server",
            Some(json!({"gamemode": "hardcore"})),
        )
        .await;
        assert_eq!(v["success"], false);
        assert!(v["error"].is_string());

        let v = send(&app, "POST", "/api/config", Some(json!({"maxPlayers": 0}))).await;
        assert_eq!(v["success"], false);
        assert!(v["error"].as_str().unwrap().contains("maxPlayers"));

        let v = send(&app, "POST", "/start-server", None).await;
        assert_eq!(v["success"], false);

        let status = send(&app, "GET", "/server-status", None).await;
        assert_eq!(status["running"], false);
    }

    #[tokio::test]
    async fn logs_and_index_are_served() {
        let dir = tempfile::tempdir().unwrap();
        let app = local_app(dir.path());

        let v = send(&app, "POST", "/start-server", Some(json!({}))).await;
        assert_eq!(v["success"], true, "{v}");

        let logs = send(&app, "GET", "/api/logs?cursor=0&limit=50", None).await;
        let lines = logs["lines"].as_array().unwrap();
        assert!(
            lines
                .iter()
                .any(|l| l.as_str().unwrap().starts_with("[launchpad] exec:"))
        );
        assert!(logs["cursor"].as_u64().unwrap() >= 1);

        send(&app, "POST", "/stop-server", None).await;

        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("/start-server"));
    }
}
