//! HTTP and WebSocket surface.

use crate::app::Services;
use crate::core::error::RateError;
use crate::core::rate::{RatePair, RateRecord};
use crate::core::store::TaskLogEntry;
use crate::hub::LiveConnection;
use crate::reconciler::ManualOp;
use crate::scheduler::{SchedulerState, TriggerOutcome};
use crate::session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const DEFAULT_LOG_LIMIT: usize = 100;

pub fn create_router(services: Arc<Services>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws/currency", get(ws_handler))
        .route("/api/v1/tasks/run", post(run_task))
        .route("/api/v1/currency/rates", get(list_rates).post(create_rate))
        .route(
            "/api/v1/currency/rates/{base}/{target}",
            get(get_rate).patch(update_rate).delete(delete_rate),
        )
        .route("/api/v1/currency/task-logs", get(task_logs))
        .with_state(services)
}

pub async fn serve(services: Arc<Services>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{addr}");
    axum::serve(listener, create_router(services))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
}

/// Maps domain errors onto HTTP statuses.
struct ApiError(RateError);

impl From<RateError> for ApiError {
    fn from(e: RateError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RateError::NotFound(_) => StatusCode::NOT_FOUND,
            RateError::AlreadyExists(_) | RateError::ConcurrentTrigger => StatusCode::CONFLICT,
            RateError::InvalidRate { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RateError::Store(e) => {
                warn!(error = %format!("{e:#}"), "Request failed on store access");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                detail: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub bus_connected: bool,
    pub scheduler_state: SchedulerState,
    pub connections: usize,
}

async fn health_check(State(services): State<Arc<Services>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        bus_connected: services.publisher.is_connected(),
        scheduler_state: services.scheduler.state(),
        connections: services.hub.len().await,
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: String,
    pub message: String,
}

async fn run_task(State(services): State<Arc<Services>>) -> Result<Response, ApiError> {
    match services.scheduler.trigger().await {
        TriggerOutcome::Accepted => Ok((
            StatusCode::ACCEPTED,
            Json(TaskResponse {
                status: "accepted".to_string(),
                message: "Currency update task started".to_string(),
            }),
        )
            .into_response()),
        TriggerOutcome::Rejected => Err(RateError::ConcurrentTrigger.into()),
    }
}

async fn list_rates(
    State(services): State<Arc<Services>>,
) -> Result<Json<Vec<RateRecord>>, ApiError> {
    let mut rates = services.store.list_all().await.map_err(RateError::Store)?;
    rates.sort_by(|a, b| {
        (&a.base_currency, &a.target_currency).cmp(&(&b.base_currency, &b.target_currency))
    });
    Ok(Json(rates))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRateRequest {
    pub base_currency: String,
    pub target_currency: String,
    pub rate: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRateRequest {
    pub rate: f64,
}

async fn create_rate(
    State(services): State<Arc<Services>>,
    Json(req): Json<CreateRateRequest>,
) -> Result<Response, ApiError> {
    let pair = RatePair::new(&req.base_currency, &req.target_currency);
    let change = services
        .reconciler
        .apply_manual(ManualOp::Create {
            pair,
            rate: req.rate,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(change.after)).into_response())
}

async fn get_rate(
    State(services): State<Arc<Services>>,
    Path((base, target)): Path<(String, String)>,
) -> Result<Json<RateRecord>, ApiError> {
    let pair = RatePair::new(&base, &target);
    let record = services
        .store
        .get(&pair)
        .await
        .map_err(RateError::Store)?
        .ok_or(RateError::NotFound(pair))?;
    Ok(Json(record))
}

async fn update_rate(
    State(services): State<Arc<Services>>,
    Path((base, target)): Path<(String, String)>,
    Json(req): Json<UpdateRateRequest>,
) -> Result<Json<Option<RateRecord>>, ApiError> {
    let change = services
        .reconciler
        .apply_manual(ManualOp::Update {
            pair: RatePair::new(&base, &target),
            rate: req.rate,
        })
        .await?;
    Ok(Json(change.after))
}

async fn delete_rate(
    State(services): State<Arc<Services>>,
    Path((base, target)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    services
        .reconciler
        .apply_manual(ManualOp::Delete {
            pair: RatePair::new(&base, &target),
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    limit: Option<usize>,
}

async fn task_logs(
    State(services): State<Arc<Services>>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<TaskLogEntry>>, ApiError> {
    let logs = services
        .store
        .task_logs(query.limit.unwrap_or(DEFAULT_LOG_LIMIT))
        .await
        .map_err(RateError::Store)?;
    Ok(Json(logs))
}

/// Sending half of an upgraded socket.
struct WsConnection {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl LiveConnection for WsConnection {
    async fn send(&self, text: &str) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.to_string().into()))
            .await
            .context("WebSocket send failed")
    }

    async fn close(&self) {
        let _ = self.sink.lock().await.close().await;
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(services): State<Arc<Services>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| live_session(socket, services))
}

async fn live_session(socket: WebSocket, services: Arc<Services>) {
    let (sink, mut stream) = socket.split();
    let conn = Arc::new(WsConnection {
        sink: Mutex::new(sink),
    });

    let id = match services.hub.register(conn).await {
        Ok(id) => id,
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Live session rejected");
            return;
        }
    };

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let reply = session::respond(text.as_str(), services.store.as_ref()).await;
                if let Some(reply) = reply {
                    if !services.hub.send_to(id, &reply).await {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(%id, error = %e, "WebSocket receive failed");
                break;
            }
        }
    }

    services.hub.unregister(id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::test_support::FakeBus;
    use crate::core::config::AppConfig;
    use crate::core::rate::RateSnapshot;
    use crate::core::source::RateSource;
    use crate::store::MemoryRateStore;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    struct ParkedSource(Arc<Notify>);

    #[async_trait]
    impl RateSource for ParkedSource {
        async fn fetch(&self, base: &str) -> Result<RateSnapshot> {
            self.0.notified().await;
            Ok(RateSnapshot::live(base, BTreeMap::new()))
        }
    }

    fn services() -> (Arc<Services>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let services = Services::new(
            &AppConfig::default(),
            Arc::new(MemoryRateStore::new()),
            Arc::new(ParkedSource(gate.clone())),
            Arc::new(FakeBus::default()),
        );
        (Arc::new(services), gate)
    }

    async fn call(
        services: &Arc<Services>,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = create_router(services.clone())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let (services, _) = services();
        let (status, body) = call(&services, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["bus_connected"], false);
        assert_eq!(body["scheduler_state"], "idle");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_rate_crud() {
        let (services, _) = services();

        let (status, body) = call(
            &services,
            "POST",
            "/api/v1/currency/rates",
            Some(json!({"base_currency": "usd", "target_currency": "eur", "rate": 0.9})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["base_currency"], "USD");
        assert_eq!(body["rate"], 0.9);

        let (status, body) = call(
            &services,
            "POST",
            "/api/v1/currency/rates",
            Some(json!({"base_currency": "USD", "target_currency": "EUR", "rate": 0.91})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Currency rate already exists: USD/EUR");

        let (status, body) = call(
            &services,
            "PATCH",
            "/api/v1/currency/rates/USD/EUR",
            Some(json!({"rate": 0.95})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rate"], 0.95);

        let (status, _) = call(
            &services,
            "PATCH",
            "/api/v1/currency/rates/USD/EUR",
            Some(json!({"rate": 0})),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let (status, body) = call(&services, "GET", "/api/v1/currency/rates", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (status, body) = call(&services, "GET", "/api/v1/currency/rates/usd/eur", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target_currency"], "EUR");
        assert_eq!(body["rate"], 0.95);

        let (status, _) = call(&services, "DELETE", "/api/v1/currency/rates/USD/EUR", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = call(&services, "DELETE", "/api/v1/currency/rates/USD/EUR", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, body) = call(&services, "GET", "/api/v1/currency/rates/USD/EUR", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Currency rate not found: USD/EUR");
        assert!(services.store.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_task_conflict() {
        let (services, gate) = services();

        let (status, body) = call(&services, "POST", "/api/v1/tasks/run", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "accepted");

        let (status, body) = call(&services, "POST", "/api/v1/tasks/run", None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["detail"], "Task is already running");

        gate.notify_one();
        while services.scheduler.state() != SchedulerState::Idle {
            tokio::task::yield_now().await;
        }

        let (status, body) = call(
            &services,
            "GET",
            "/api/v1/currency/task-logs?limit=2",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let logs = body.as_array().unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0]["status"], "success");
        assert_eq!(logs[1]["status"], "started");
    }
}
