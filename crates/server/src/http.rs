//! HTTP API
//!
//! Conversation lifecycle lives here; the live audio/transcript stream is
//! on the WebSocket side (`websocket`). Every conversation created over
//! HTTP is addressed by the id returned from `POST /api/conversations`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use parley_core::OrchestratorError;

use crate::state::AppState;
use crate::websocket::ws_handler;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/api/agents", get(list_agents))
        .route("/api/conversations", post(create_conversation))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/:id", get(get_conversation))
        .route("/api/conversations/:id", delete(end_conversation))
        .route("/api/conversations/:id/switch", post(switch_agent))
        .route("/ws/:id", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn metrics_endpoint(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Serialize)]
struct AgentSummary {
    id: String,
    display_name: String,
    tools: Vec<String>,
}

async fn list_agents(State(state): State<AppState>) -> Json<Vec<AgentSummary>> {
    let mut agents: Vec<AgentSummary> = state
        .agents
        .agent_ids()
        .into_iter()
        .filter_map(|id| state.agents.get(&id))
        .map(|agent| AgentSummary {
            id: agent.id.clone(),
            display_name: agent.display_name.clone(),
            tools: agent.tools.clone(),
        })
        .collect();
    agents.sort_by(|a, b| a.id.cmp(&b.id));
    Json(agents)
}

#[derive(Debug, Deserialize)]
struct CreateConversationRequest {
    agent_id: String,
}

#[derive(Debug, Serialize)]
struct ConversationResponse {
    conversation_id: String,
    agent_id: Option<String>,
    state: String,
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> Response {
    if state.at_capacity() {
        return error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "conversation capacity reached",
        );
    }

    let (id, orchestrator) = state.create_conversation();
    if let Err(e) = orchestrator.start(&request.agent_id).await {
        state.remove_conversation(&id);
        return orchestrator_error(e);
    }

    tracing::info!(conversation = %id, agent = %request.agent_id, "Conversation created");
    (
        StatusCode::CREATED,
        Json(ConversationResponse {
            conversation_id: id,
            agent_id: orchestrator.active_agent_id(),
            state: orchestrator.state().to_string(),
        }),
    )
        .into_response()
}

async fn list_conversations(State(state): State<AppState>) -> Json<Vec<ConversationResponse>> {
    let conversations = state
        .conversations
        .iter()
        .map(|entry| ConversationResponse {
            conversation_id: entry.key().clone(),
            agent_id: entry.value().orchestrator.active_agent_id(),
            state: entry.value().orchestrator.state().to_string(),
        })
        .collect();
    Json(conversations)
}

#[derive(Debug, Serialize)]
struct ConversationDetail {
    conversation_id: String,
    agent_id: Option<String>,
    state: String,
    turns: Vec<parley_core::ConversationTurn>,
    dropped_frames: u64,
    pending_tools: usize,
}

async fn get_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(conversation) = state.conversations.get(&id) else {
        return error_body(StatusCode::NOT_FOUND, "conversation not found");
    };
    let orchestrator = &conversation.orchestrator;
    Json(ConversationDetail {
        conversation_id: id.clone(),
        agent_id: orchestrator.active_agent_id(),
        state: orchestrator.state().to_string(),
        turns: orchestrator.turns(),
        dropped_frames: orchestrator.dropped_frame_count(),
        pending_tools: orchestrator.pending_invocation_count(),
    })
    .into_response()
}

async fn end_conversation(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(conversation) = state.remove_conversation(&id) else {
        return error_body(StatusCode::NOT_FOUND, "conversation not found");
    };
    if let Err(e) = conversation.orchestrator.stop().await {
        tracing::warn!(conversation = %id, error = %e, "Error while stopping conversation");
    }
    tracing::info!(conversation = %id, "Conversation ended");
    StatusCode::NO_CONTENT.into_response()
}

#[derive(Debug, Deserialize)]
struct SwitchRequestBody {
    target_agent_id: String,
}

async fn switch_agent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SwitchRequestBody>,
) -> Response {
    let Some(orchestrator) = state
        .conversations
        .get(&id)
        .map(|c| c.orchestrator.clone())
    else {
        return error_body(StatusCode::NOT_FOUND, "conversation not found");
    };

    match orchestrator.request_switch(&request.target_agent_id).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "status": "switch_pending" })),
        )
            .into_response(),
        Err(e) => orchestrator_error(e),
    }
}

fn orchestrator_error(e: OrchestratorError) -> Response {
    let status = match &e {
        OrchestratorError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::SwitchAlreadyPending | OrchestratorError::AlreadyActive => {
            StatusCode::CONFLICT
        }
        OrchestratorError::NotActive(_) => StatusCode::CONFLICT,
        OrchestratorError::SessionStartFailed { .. }
        | OrchestratorError::StreamUnavailable(_)
        | OrchestratorError::StreamFailure(_)
        | OrchestratorError::SwitchFailed { .. } => StatusCode::BAD_GATEWAY,
    };
    error_body(status, &e.to_string())
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use parley_config::{AgentRegistry, Settings};
    use parley_core::AgentDefinition;
    use parley_tools::ToolRegistry;
    use parley_transport::{ScriptedSession, ScriptedTransport};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state(sessions: Vec<ScriptedSession>) -> AppState {
        let agents = AgentRegistry::new(vec![
            AgentDefinition::new("support", "You help customers."),
            AgentDefinition::new("sales", "You sell."),
        ])
        .unwrap();
        let metrics = PrometheusBuilder::new()
            .build_recorder()
            .handle();
        AppState::new(
            Settings::default(),
            Arc::new(agents),
            Arc::new(ToolRegistry::new()),
            Arc::new(ScriptedTransport::new(sessions)),
            metrics,
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = create_router(test_state(vec![]));
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_list_agents() {
        let app = create_router(test_state(vec![]));
        let response = app
            .oneshot(Request::get("/api/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let agents = body_json(response).await;
        assert_eq!(agents[0]["id"], "sales");
        assert_eq!(agents[1]["id"], "support");
    }

    #[tokio::test]
    async fn test_create_and_end_conversation() {
        let state = test_state(vec![ScriptedSession::new(vec![])]);
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/conversations")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent_id": "support"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let created = body_json(response).await;
        assert_eq!(created["agent_id"], "support");
        let id = created["conversation_id"].as_str().unwrap().to_string();
        assert_eq!(state.conversations.len(), 1);

        let response = app
            .oneshot(
                Request::delete(format!("/api/conversations/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.conversations.len(), 0);
    }

    #[tokio::test]
    async fn test_create_with_unknown_agent_is_404() {
        let state = test_state(vec![ScriptedSession::new(vec![])]);
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::post("/api/conversations")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent_id": "ghost"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        // Failed creation leaves no conversation behind
        assert_eq!(state.conversations.len(), 0);
    }

    #[tokio::test]
    async fn test_create_when_stream_unavailable_is_502() {
        let state = test_state(vec![
            ScriptedSession::failing(),
            ScriptedSession::failing(),
            ScriptedSession::failing(),
        ]);
        let app = create_router(state.clone());

        let response = app
            .oneshot(
                Request::post("/api/conversations")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent_id": "support"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(state.conversations.len(), 0);
    }

    #[tokio::test]
    async fn test_capacity_is_503() {
        let mut settings = Settings::default();
        settings.server.max_sessions = 1;
        let mut state = test_state(vec![ScriptedSession::new(vec![])]);
        state.settings = settings;
        let app = create_router(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/conversations")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent_id": "support"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .oneshot(
                Request::post("/api/conversations")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"agent_id": "sales"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_switch_unknown_conversation_is_404() {
        let app = create_router(test_state(vec![]));
        let response = app
            .oneshot(
                Request::post("/api/conversations/nope/switch")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"target_agent_id": "sales"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
