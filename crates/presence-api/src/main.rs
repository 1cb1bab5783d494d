//! Presence API - sighting ingestion and administrative server

use automation_engine::{AutomationError, Collaborators, PresenceEngine};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use kv_store::{Bounded, KvStore, MemoryStore, StoreError};
use presence_core::{GaugeObserver, PresenceError, SystemClock};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod admin;
mod config;
mod services;
mod sightings;
mod websocket;

use config::Config;
use services::{AssistantBackend, MacVendors, NotifierBackend};

/// Store snapshot file inside the data directory
const STORE_FILE: &str = "store.json";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PresenceEngine>,
    pub observer: Arc<GaugeObserver>,
}

/// API response wrapper using serde_json::Value for flexibility
#[derive(Serialize)]
pub struct ApiResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl ApiResponse {
    pub(crate) fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: Some(serde_json::to_value(data).unwrap_or(serde_json::Value::Null)),
            error: None,
        }
    }

    pub(crate) fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

pub type ApiResult = (StatusCode, Json<ApiResponse>);

pub(crate) fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

/// Map an engine error onto a status code and error envelope
pub(crate) fn failure(e: AutomationError) -> ApiResult {
    let status = match &e {
        AutomationError::NotFound(_) | AutomationError::Presence(PresenceError::NotFound(_)) => {
            StatusCode::NOT_FOUND
        }
        AutomationError::Invalid(_)
        | AutomationError::InvalidCron(_)
        | AutomationError::Presence(PresenceError::Invalid(_)) => StatusCode::BAD_REQUEST,
        AutomationError::Store(StoreError::Timeout(_))
        | AutomationError::Presence(PresenceError::Store(StoreError::Timeout(_))) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::warn!("Request failed: {}", e);
    }
    (status, Json(ApiResponse::error(e.to_string())))
}

/// Health check
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// WebSocket handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state))
}

/// Build the router
pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Sighting ingestion
        .route("/api/v1/sightings/address", post(sightings::report_address))
        .route("/api/v1/sightings/addresses", post(sightings::report_addresses))
        .route("/api/v1/sightings/ble", post(sightings::report_ble))
        // Devices
        .route("/api/v1/devices", get(admin::list_devices))
        .route(
            "/api/v1/devices/:id",
            get(admin::get_device)
                .put(admin::update_device)
                .delete(admin::delete_device),
        )
        .route("/api/v1/devices/:id/power", get(admin::device_power))
        // People, homes, BLE
        .route(
            "/api/v1/people",
            get(admin::list_people).post(admin::upsert_person),
        )
        .route("/api/v1/people/:name", delete(admin::delete_person))
        .route("/api/v1/homes", get(admin::list_homes))
        .route("/api/v1/bles", get(admin::list_bles))
        // Timed commands
        .route(
            "/api/v1/commands",
            get(admin::list_commands).post(admin::create_command),
        )
        .route("/api/v1/commands/:id", delete(admin::delete_command))
        .route(
            "/api/v1/commands/prefix/:id",
            delete(admin::delete_command_prefix),
        )
        .route("/api/v1/commands/:id/complete", post(admin::complete_command))
        .route(
            "/api/v1/commands/owner/:owner/complete",
            post(admin::complete_owner_commands),
        )
        .route("/api/v1/observations", get(admin::list_observations))
        // WebSocket
        .route("/ws", get(ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.logging.filter)
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    tracing::info!("Starting Presence API server");

    let data_dir = config.server.data_dir.clone();
    tokio::fs::create_dir_all(&data_dir).await?;

    let memory = MemoryStore::with_snapshot(data_dir.join(STORE_FILE)).await?;
    let store: Arc<dyn KvStore> = Arc::new(Bounded::new(
        Arc::new(memory),
        config.presence.call_timeout(),
    ));

    let client = reqwest::Client::builder()
        .timeout(config.presence.call_timeout())
        .build()?;
    let assistant = AssistantBackend::from_config(&config, client.clone());
    let notifier = NotifierBackend::from_config(&config, client.clone());
    tracing::info!(
        "Assistant relay: {}, notifications: {}",
        if assistant.is_live() { "live" } else { "debug" },
        if notifier.is_live() { "live" } else { "debug" }
    );

    let observer = Arc::new(GaugeObserver::new());
    let collaborators = Collaborators {
        assistant: Arc::new(assistant),
        notifier: Arc::new(notifier),
        vendors: Arc::new(MacVendors::new(client, &config.vendors.url)),
        observer: observer.clone(),
        clock: Arc::new(SystemClock),
    };

    let engine = Arc::new(PresenceEngine::new(
        store,
        collaborators,
        config.presence.clone(),
    ));
    engine.seed(&data_dir).await?;
    engine.start()?;

    let state = AppState { engine, observer };
    let app = router(state);

    let addr = config.bind_addr()?;
    tracing::info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use presence_core::services::testing::{FixedVendor, RecordingNotifier, ScriptedAssistant};
    use presence_core::{ManualClock, PresenceConfig};
    use tower::ServiceExt;

    pub(crate) struct TestApp {
        pub state: AppState,
        pub notifier: Arc<RecordingNotifier>,
        pub assistant: Arc<ScriptedAssistant>,
    }

    pub(crate) fn test_app() -> TestApp {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let assistant = Arc::new(ScriptedAssistant::new());
        let observer = Arc::new(GaugeObserver::new());
        let collaborators = Collaborators {
            assistant: assistant.clone(),
            notifier: notifier.clone(),
            vendors: Arc::new(FixedVendor(Some("Acme".to_string()))),
            observer: observer.clone(),
            clock: Arc::new(ManualClock::new(1_000)),
        };
        let engine = Arc::new(PresenceEngine::new(
            store,
            collaborators,
            PresenceConfig::default(),
        ));
        TestApp {
            state: AppState { engine, observer },
            notifier,
            assistant,
        }
    }

    /// Send one request through the router and decode the JSON body
    pub(crate) async fn send(
        state: &AppState,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app.state, "GET", "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[test]
    fn test_failure_status_codes() {
        let (status, Json(body)) = failure(AutomationError::NotFound("device x".to_string()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(!body.success);

        let (status, _) = failure(AutomationError::Presence(PresenceError::Invalid(
            "empty name".to_string(),
        )));
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = failure(AutomationError::Store(StoreError::Timeout("get")));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
