use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::error::TurnError;
use crate::models::{
    ChatMessageRequest, ChatMessageResponse, SearchTestRequest, SearchTestResponse,
};
use crate::web_search::SearchProvider;

#[derive(Clone)]
struct AppState {
    chat: ChatService,
    search: Arc<dyn SearchProvider>,
}

pub async fn run_server(
    config: AppConfig,
    chat: ChatService,
    search: Arc<dyn SearchProvider>,
) -> Result<()> {
    let state = AppState { chat, search };

    let app = Router::new()
        .route("/api/chat/message", post(chat_message))
        .route("/api/search/test", post(search_test))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn chat_message(
    State(state): State<AppState>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, ApiError> {
    let turn_id = Uuid::new_v4();
    tracing::debug!("turn {turn_id} started on thread {}", request.thread_id);

    let message = state.chat.process_turn(request.into_turn_request()).await?;
    Ok(Json(ChatMessageResponse { message }))
}

async fn search_test(
    State(state): State<AppState>,
    Json(request): Json<SearchTestRequest>,
) -> Result<Json<SearchTestResponse>, ApiError> {
    let results = state
        .search
        .search(&request.query)
        .await
        .map_err(TurnError::from)?;

    Ok(Json(SearchTestResponse {
        success: true,
        results,
    }))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<TurnError> for ApiError {
    fn from(value: TurnError) -> Self {
        let status = match &value {
            TurnError::BadRequest(_) => StatusCode::BAD_REQUEST,
            TurnError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TurnError::RunTimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            TurnError::RunFailed(_) | TurnError::NoResponse | TurnError::Backend(_) => {
                StatusCode::BAD_GATEWAY
            }
        };

        Self {
            status,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
