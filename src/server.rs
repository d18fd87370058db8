use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{
    config::Config,
    orchestrator::{Orchestrator, PlanOverrides, ScanPlan},
    ports,
    progress::LiveStats,
    targets,
    types::ScanReport,
};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    inner: Arc<RwLock<ServerState>>, // shared mutable state for progress/results
}

#[derive(Debug, Default)]
struct ServerState {
    state: ScanState,
    target: Option<String>,
    error: Option<String>,
    report: Option<ScanReport>,
    progress: Option<Arc<LiveStats>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    #[default]
    Idle,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub state: ScanState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub total: u64,
    pub scanned: u64,
    pub open: u64,
    pub rate: f64,
    pub percent: f64,
    pub eta_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub target: String,
    /// Port specification, e.g. `"22,80,8000-8100"`.
    #[serde(default)]
    pub ports: Option<String>,
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub service: bool,
    #[serde(default)]
    pub banner: bool,
    #[serde(default)]
    pub stealth: bool,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(RwLock::new(ServerState::default())),
        }
    }
}

/// The `/api` routes, with request tracing.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/scan", post(post_scan))
        .route("/results", get(get_results))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, config: Config) -> Result<()> {
    let app = router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving API on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn get_status(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    let snap = s.progress.as_ref().map(|p| p.snapshot());
    let out = Status {
        state: s.state,
        target: s.target.clone(),
        total: snap.map_or(0, |p| p.total),
        scanned: snap.map_or(0, |p| p.scanned),
        open: snap.map_or(0, |p| p.open),
        rate: snap.map_or(0.0, |p| p.rate),
        percent: snap.map_or(0.0, |p| p.percent),
        eta_secs: snap.map_or(0, |p| p.eta_secs),
        error: s.error.clone(),
    };
    (StatusCode::OK, Json(out))
}

async fn get_results(State(app): State<AppState>) -> impl IntoResponse {
    let s = app.inner.read().await;
    if let Some(res) = s.report.as_ref() {
        (StatusCode::OK, Json(res.clone())).into_response()
    } else {
        StatusCode::NO_CONTENT.into_response()
    }
}

async fn post_scan(State(app): State<AppState>, Json(req): Json<ScanRequest>) -> impl IntoResponse {
    let ports = match req.ports.as_deref().map(ports::parse_port_spec).transpose() {
        Ok(p) => p,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid ports: {e:#}")).into_response(),
    };
    let overrides = PlanOverrides {
        ports,
        profile: req.profile,
        concurrency: req.concurrency,
        timeout_ms: req.timeout_ms,
        service_detection: req.service,
        banner_grab: req.banner,
        stealth: req.stealth,
        inspect_tls: false,
    };
    let mut orchestrator = match ScanPlan::resolve(&app.config, &overrides)
        .and_then(|plan| Orchestrator::new(plan, None).map_err(Into::into))
    {
        Ok(o) => o,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("{e:#}")).into_response(),
    };

    let target = req.target.trim().to_string();
    if let Err(e) = targets::resolve_host(&target).await {
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }
    let progress = orchestrator.new_stats();

    // Scans run to completion, so a second request has to wait for the first.
    {
        let mut s = app.inner.write().await;
        if s.state == ScanState::Running {
            return (StatusCode::CONFLICT, "a scan is already running").into_response();
        }
        *s = ServerState {
            state: ScanState::Running,
            target: Some(target.clone()),
            error: None,
            report: None,
            progress: Some(progress.clone()),
        };
    }

    let app2 = app.clone();
    tokio::spawn(async move {
        let res = orchestrator
            .scan_target_with(&target, progress, |_| {})
            .await;

        let mut s = app2.inner.write().await;
        match res {
            Ok(report) => {
                s.state = ScanState::Done;
                s.report = Some(report);
            }
            Err(e) => {
                error!(%target, error = %e, "scan failed");
                s.state = ScanState::Failed;
                s.error = Some(e.to_string());
            }
        }
    });

    let total = app.inner.read().await.progress.as_ref().map_or(0, |p| p.total());
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "state": ScanState::Running, "total": total })),
    )
        .into_response()
}
