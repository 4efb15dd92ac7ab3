//! Thin HTTP control surface over the Coordination Manager (§2, §6):
//! submit a requirement, query task/agent/system status, manage agents.
//! No business logic lives here — every handler just (de)serializes and
//! delegates.

use crate::{
    auth::{auth_middleware, create_auth_state},
    capabilities::AgentSpec,
    config::{ApiConfig, Config},
    coordination::CoordinationManager,
    error::KernelError,
    models::{AgentId, AgentType, TaskId},
    rate_limit::{rate_limit_middleware, RateLimitConfig},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

const SERVICE_NAME: &str = "coretask";
const SERVICE_VERSION: &str = "0.1.0";

const ROUTE_HEALTH: &str = "/health";
const ROUTE_REQUIREMENTS: &str = "/requirements";
const ROUTE_TASKS: &str = "/tasks";
const ROUTE_TASK_BY_ID: &str = "/tasks/{task_id}";
const ROUTE_AGENTS: &str = "/agents";
const ROUTE_AGENT_BY_ID: &str = "/agents/{agent_id}";
const ROUTE_SYSTEM_STATUS: &str = "/system/status";

#[derive(Clone)]
pub struct ApiServer {
    config: ApiConfig,
    kernel: Arc<CoordinationManager>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequirementRequest {
    pub requirement: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitRequirementResponse {
    pub tasks: Vec<crate::tasks::Task>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub max_concurrent_tasks: u32,
}

#[derive(Debug, Serialize)]
pub struct CreateAgentResponse {
    pub agent_id: AgentId,
}

#[derive(Debug, Serialize)]
pub struct SystemStatusResponse {
    pub total_agents: usize,
    pub active_sessions: usize,
    pub tasks: crate::tasks::TaskStatistics,
    pub assignments: crate::assignment::AssignmentStatistics,
    pub health: crate::health::HealthStatistics,
}

impl From<KernelError> for (StatusCode, Json<ErrorResponse>) {
    fn from(err: KernelError) -> Self {
        let status = match &err {
            KernelError::Validation(_) => StatusCode::BAD_REQUEST,
            KernelError::NotFound(_) => StatusCode::NOT_FOUND,
            KernelError::Capacity(_) | KernelError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            KernelError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            KernelError::Unauthorized => StatusCode::UNAUTHORIZED,
            KernelError::Configuration(_) | KernelError::Serialization(_) | KernelError::Recoverable(_) | KernelError::Fatal(_) | KernelError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse { error: err.to_string() }))
    }
}

impl ApiServer {
    pub fn new(config: &Config, kernel: Arc<CoordinationManager>) -> Self {
        Self { config: config.api.clone(), kernel }
    }

    pub async fn run(&self) -> crate::error::Result<()> {
        let app = self.build_router();

        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(|e| KernelError::Internal(e.into()))?;

        info!("API server listening on {}:{}", self.config.host, self.config.port);

        axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
            .await
            .map_err(|e| KernelError::Internal(e.into()))?;

        Ok(())
    }

    /// Order matters: rate limit -> auth -> trace -> CORS -> routes.
    pub fn build_router(&self) -> Router {
        let auth_state = create_auth_state(self.config.clone());
        let rate_limiter = RateLimitConfig::new();

        let cors_layer = CorsLayer::new()
            .allow_origin(self.config.allowed_origins.iter().filter_map(|origin| origin.parse().ok()).collect::<Vec<_>>())
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST, axum::http::Method::DELETE])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::header::AUTHORIZATION,
                axum::http::HeaderName::from_static("x-api-key"),
            ])
            .max_age(std::time::Duration::from_secs(3600));

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_REQUIREMENTS, post(submit_requirement))
            .route(ROUTE_TASKS, get(list_tasks))
            .route(ROUTE_TASK_BY_ID, get(get_task))
            .route(ROUTE_AGENTS, get(list_agents).post(create_agent))
            .route(ROUTE_AGENT_BY_ID, delete(destroy_agent))
            .route(ROUTE_SYSTEM_STATUS, get(get_system_status))
            .layer(
                ServiceBuilder::new()
                    .layer(middleware::from_fn_with_state(rate_limiter, rate_limit_middleware))
                    .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
                    .layer(TraceLayer::new_for_http())
                    .layer(cors_layer),
            )
            .with_state(self.clone())
    }
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
    }))
}

async fn submit_requirement(
    State(server): State<ApiServer>,
    Json(request): Json<SubmitRequirementRequest>,
) -> Result<(StatusCode, Json<SubmitRequirementResponse>), (StatusCode, Json<ErrorResponse>)> {
    let tasks = server.kernel.tasks.decompose(&request.requirement).await.map_err(|e: KernelError| -> (StatusCode, Json<ErrorResponse>) { e.into() })?;
    Ok((StatusCode::CREATED, Json(SubmitRequirementResponse { tasks })))
}

async fn list_tasks(State(server): State<ApiServer>) -> Json<Vec<crate::tasks::Task>> {
    Json(server.kernel.tasks.all_tasks().await)
}

async fn get_task(
    State(server): State<ApiServer>,
    Path(task_id): Path<TaskId>,
) -> Result<Json<crate::tasks::Task>, (StatusCode, Json<ErrorResponse>)> {
    server
        .kernel
        .tasks
        .get(&task_id)
        .await
        .map(Json)
        .ok_or_else(|| KernelError::not_found(format!("task {task_id} not found")).into())
}

async fn list_agents(State(server): State<ApiServer>) -> Json<Vec<crate::coordination::Agent>> {
    Json(server.kernel.list_agents().await)
}

async fn create_agent(
    State(server): State<ApiServer>,
    Json(request): Json<CreateAgentRequest>,
) -> Result<(StatusCode, Json<CreateAgentResponse>), (StatusCode, Json<ErrorResponse>)> {
    let spec = AgentSpec {
        name: request.name,
        agent_type: request.agent_type,
        capabilities: request.capabilities,
        max_concurrent_tasks: request.max_concurrent_tasks,
    };
    let agent_id = server.kernel.create_agent(spec).await.map_err(|e: KernelError| -> (StatusCode, Json<ErrorResponse>) { e.into() })?;
    Ok((StatusCode::CREATED, Json(CreateAgentResponse { agent_id })))
}

async fn destroy_agent(
    State(server): State<ApiServer>,
    Path(agent_id): Path<AgentId>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    server.kernel.destroy_agent(&agent_id).await.map_err(|e: KernelError| -> (StatusCode, Json<ErrorResponse>) { e.into() })?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_system_status(State(server): State<ApiServer>) -> Json<SystemStatusResponse> {
    let stats = server.kernel.statistics().await;
    Json(SystemStatusResponse {
        total_agents: stats.total_agents,
        active_sessions: stats.active_sessions,
        tasks: stats.tasks,
        assignments: stats.assignments,
        health: stats.health,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{AgentFactory, AgentWorker, FileStat, FileStore, SystemClock, UuidGenerator, WorkerOutcome, WorkerStatus};
    use crate::error::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use tower::ServiceExt;

    struct StubWorker;
    #[async_trait]
    impl AgentWorker for StubWorker {
        fn id(&self) -> &str {
            "stub"
        }
        fn name(&self) -> &str {
            "stub"
        }
        async fn status(&self) -> WorkerStatus {
            WorkerStatus::Idle
        }
        async fn workload(&self) -> u32 {
            0
        }
        async fn shutdown(&self) {}
        async fn execute(&self, _task: crate::tasks::Task, _context: HashMap<String, String>) -> Result<WorkerOutcome> {
            unimplemented!()
        }
    }

    struct StubFactory;
    #[async_trait]
    impl AgentFactory for StubFactory {
        async fn build(&self, _agent_id: &str, _spec: &AgentSpec) -> Result<Arc<dyn AgentWorker>> {
            Ok(Arc::new(StubWorker))
        }
    }

    struct NullStore;
    #[async_trait]
    impl FileStore for NullStore {
        async fn read(&self, _path: &str) -> Result<Vec<u8>> {
            Ok(vec![])
        }
        async fn write(&self, _path: &str, _content: &[u8]) -> Result<()> {
            Ok(())
        }
        async fn stat(&self, _path: &str) -> Result<FileStat> {
            Ok(FileStat { size: 0, exists: false })
        }
        async fn delete(&self, _path: &str) -> Result<()> {
            Ok(())
        }
    }

    fn server() -> ApiServer {
        let config = Config::default();
        let kernel = CoordinationManager::new(config.clone(), Arc::new(StubFactory), Arc::new(UuidGenerator), Arc::new(SystemClock), Arc::new(NullStore));
        ApiServer::new(&config, kernel)
    }

    #[tokio::test]
    async fn health_check_needs_no_auth() {
        let app = server().build_router();
        let response = app.oneshot(Request::builder().uri(ROUTE_HEALTH).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unconfigured_auth_allows_requests_through() {
        let app = server().build_router();
        let response = app.oneshot(Request::builder().uri(ROUTE_AGENTS).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
