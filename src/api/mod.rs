use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use validator::Validate;

use crate::commands::Dispatcher;
use crate::config::ModelChoice;
use crate::document::{Upload, UploadKind};
use crate::llm::chat::ChatTurn;

/// One dispatcher behind a mutex: turns are handled strictly one at a time.
#[derive(Clone)]
pub struct AppState {
    dispatcher: Arc<Mutex<Dispatcher>>,
    model: ModelChoice,
}

#[derive(Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 4000))]
    prompt: String,
    #[validate(length(min = 1, max = 255))]
    file_name: Option<String>,
    #[validate(length(max = 1_000_000))]
    file_content: Option<String>,
}

impl ChatRequest {
    fn upload(&self) -> Result<Option<Upload>, String> {
        let Some(content) = &self.file_content else {
            return Ok(None);
        };
        let file_name = self.file_name.clone().unwrap_or_else(|| "upload.txt".to_string());
        match UploadKind::from_file_name(&file_name).map_err(|e| e.to_string())? {
            UploadKind::Text => Ok(Some(Upload::from_text(file_name, content.clone()))),
            UploadKind::Pdf => Err("PDF uploads are only supported from the command line".to_string()),
        }
    }
}

#[derive(Serialize)]
pub struct TranscriptResponse {
    turns: Vec<ChatTurn>,
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    model: String,
    has_api_key: bool,
    memory_records: usize,
}

#[derive(Serialize)]
struct ApiResponse {
    status: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ApiResponse {
            status: message.into(),
        }),
    )
        .into_response()
}

/// Create and configure the API router
pub fn create_api(dispatcher: Dispatcher, model: ModelChoice) -> Router {
    let state = AppState {
        dispatcher: Arc::new(Mutex::new(dispatcher)),
        model,
    };

    // Fully permissive CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/chat", post(chat_handler))
        .route("/reset", post(reset_handler))
        .route("/transcript", get(transcript_handler))
        .route("/health", get(health_check))
        .layer(cors)
        .with_state(state)
}

async fn chat_handler(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Response {
    if let Err(e) = request.validate() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, format!("Invalid request: {}", e));
    }

    let upload = match request.upload() {
        Ok(upload) => upload,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    let mut dispatcher = state.dispatcher.lock().await;
    let report = dispatcher.handle_turn(&request.prompt, upload).await;

    Json(report).into_response()
}

async fn reset_handler(State(state): State<AppState>) -> Json<TranscriptResponse> {
    let mut dispatcher = state.dispatcher.lock().await;
    dispatcher.reset().await;
    Json(TranscriptResponse {
        turns: dispatcher.transcript().to_vec(),
    })
}

async fn transcript_handler(State(state): State<AppState>) -> Json<TranscriptResponse> {
    let dispatcher = state.dispatcher.lock().await;
    Json(TranscriptResponse {
        turns: dispatcher.transcript().to_vec(),
    })
}

async fn health_check(State(state): State<AppState>) -> Response {
    let dispatcher = state.dispatcher.lock().await;
    let memory_records = match dispatcher.store().len().await {
        Ok(len) => len,
        Err(e) => {
            log::error!("Health check could not reach the memory store: {}", e);
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Memory store unavailable");
        }
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        model: state.model.to_string(),
        has_api_key: dispatcher.has_provider(),
        memory_records,
    })
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::LogRenderer;
    use crate::database::{LocalIndex, MemoryStore};
    use crate::llm::chat::ChatSession;
    use crate::llm::embeddings::HashingEmbedder;
    use crate::providers::traits::CompletionProvider;
    use anyhow::Result;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    /// Classifies every prompt as off-topic, then echoes it back.
    struct Echo;

    #[async_trait]
    impl CompletionProvider for Echo {
        async fn complete(&self, prompt: &str) -> Result<String> {
            if prompt.starts_with("Classify") {
                Ok("off_topic".to_string())
            } else {
                Ok(format!("echo: {}", prompt))
            }
        }
    }

    async fn router(dir: &tempfile::TempDir, with_key: bool) -> Router {
        let store: Arc<dyn MemoryStore> = Arc::new(
            LocalIndex::load(dir.path(), Arc::new(HashingEmbedder::default()))
                .await
                .unwrap(),
        );
        let provider: Option<Box<dyn CompletionProvider>> = if with_key {
            Some(Box::new(Echo))
        } else {
            None
        };
        let dispatcher = Dispatcher::new(provider, store, ChatSession::new(), Box::new(LogRenderer));
        create_api(dispatcher, ModelChoice::Llama3)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_runs_a_turn() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            router(&dir, true).await,
            post_json("/chat", serde_json::json!({ "prompt": "tell me a joke" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["intent"], "off_topic");
        assert_eq!(body["messages"][0], "echo: tell me a joke");
    }

    #[tokio::test]
    async fn chat_without_key_asks_for_one() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            router(&dir, false).await,
            post_json("/chat", serde_json::json!({ "prompt": "hello" })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert!(body["intent"].is_null());
        assert_eq!(body["notice"], "Please add your Model API key to continue.");
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (status, _) = send(
            router(&dir, true).await,
            post_json("/chat", serde_json::json!({ "prompt": "" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn pdf_upload_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            router(&dir, true).await,
            post_json(
                "/chat",
                serde_json::json!({
                    "prompt": "save this",
                    "file_name": "resume.pdf",
                    "file_content": "%PDF-1.4"
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["status"].as_str().unwrap().contains("PDF"));
    }

    #[tokio::test]
    async fn reset_returns_greeting_only() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(&dir, true).await;
        send(
            app.clone(),
            post_json("/chat", serde_json::json!({ "prompt": "hello" })),
        )
        .await;

        let (status, body) = send(app.clone(), post_json("/reset", Value::Null)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["turns"].as_array().unwrap().len(), 1);
        assert_eq!(body["turns"][0]["text"], "How can I help you?");

        let request = Request::builder().uri("/transcript").body(Body::empty()).unwrap();
        let (_, body) = send(app, request).await;
        assert_eq!(body["turns"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn health_reports_store_size() {
        let dir = tempfile::tempdir().unwrap();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(router(&dir, false).await, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["model"], "Llama3 - 8B");
        assert_eq!(body["has_api_key"], false);
        assert_eq!(body["memory_records"], 0);
    }
}
