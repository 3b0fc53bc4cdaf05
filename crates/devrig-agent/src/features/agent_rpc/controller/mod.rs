use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use devrig_proto::{AgentRequest, AgentResponse, HEALTH_PATH, RPC_PATH};

use crate::features::agent_rpc::service::AgentRpcService;

#[derive(Clone)]
pub struct AgentRpcController {
    service: AgentRpcService,
}

impl AgentRpcController {
    pub fn new(service: AgentRpcService) -> Self {
        Self { service }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route(HEALTH_PATH, get(health))
            .route(RPC_PATH, post(call))
            .with_state(self)
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn call(
    State(controller): State<AgentRpcController>,
    Json(request): Json<AgentRequest>,
) -> Json<AgentResponse> {
    Json(controller.service.handle(request).await)
}
