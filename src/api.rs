use axum::{
    extract::{rejection::JsonRejection, Json, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

use crate::{
    app_state::{AppState, Status},
    conversation::turns_from_messages,
    error::RagError,
    models::{ChatMessage, ChatRole, RetrievalResult, SourcePreview},
};

type ApiError = (StatusCode, Json<serde_json::Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ChatPayload {
    #[serde(default)]
    question: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub source: String,
    pub text: String,
}

impl From<RetrievalResult> for SourceRef {
    fn from(result: RetrievalResult) -> Self {
        Self {
            source: result.source,
            text: result.text,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[derive(Deserialize)]
pub struct ConversationPayload {
    #[serde(default)]
    message: String,
    #[serde(default)]
    history: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct ConversationResponse {
    message: ChatMessage,
    sources: Vec<SourcePreview>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/conversation", post(conversation_handler))
        .route("/api/status", get(status_handler))
        .with_state(app_state)
}

/// Router completo con CORS abierto y trazas HTTP.
pub fn create_app(app_state: AppState) -> Router {
    create_router(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

// --- Handlers ---

#[axum::debug_handler]
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatPayload>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(payload) = payload.map_err(rejected_body)?;
    let result = state
        .ask(&payload.question, &[])
        .await
        .map_err(api_error)?;

    info!("Consulta respondida con {} fuentes", result.sources.len());
    Ok(Json(ChatResponse {
        answer: result.answer,
        sources: result.sources.into_iter().map(SourceRef::from).collect(),
    }))
}

#[axum::debug_handler]
async fn conversation_handler(
    State(state): State<AppState>,
    payload: Result<Json<ConversationPayload>, JsonRejection>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let Json(payload) = payload.map_err(rejected_body)?;
    let history = state.bound_history(turns_from_messages(&payload.history));
    let result = state
        .ask(&payload.message, &history)
        .await
        .map_err(api_error)?;

    Ok(Json(ConversationResponse {
        message: ChatMessage {
            role: ChatRole::Assistant,
            content: result.answer,
        },
        sources: result.sources.iter().map(SourcePreview::from).collect(),
    }))
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status())
}

/// Un cuerpo que no es JSON válido para el endpoint es entrada inválida.
fn rejected_body(rejection: JsonRejection) -> ApiError {
    api_error(RagError::InvalidInput(rejection.body_text()))
}

/// Traduce un `RagError` a respuesta HTTP; el detalle completo va al log.
fn api_error(err: RagError) -> ApiError {
    let status = match &err {
        RagError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RagError::OperationTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("Error al procesar la consulta RAG ({}): {err:?}", err.kind());
    (
        status,
        Json(json!({
            "error": {
                "kind": err.kind(),
                "message": err.to_string(),
            }
        })),
    )
}
