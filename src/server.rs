//! HTTP server for the dashboard's assistant widget.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/api/chat` | Answer `{question, context}` → `{answer}` |
//! | `POST` | `/api/ask` | Alias of `/api/chat` |
//! | `POST` | `/api/scan` | Scan `{routes?}` (default routes when omitted) |
//! | `GET`  | `/api/pages` | Cached page texts |
//! | `POST` | `/api/pages` | Store `{key, html}` for the page currently on screen |
//! | `DELETE` | `/api/pages` | Clear the page cache |
//! | `GET`  | `/api/context` | Combined context string |
//! | `GET`/`POST` | `/api/sessions` | List sessions / start a new chat |
//! | `GET`/`DELETE` | `/api/sessions/{id}` | Fetch / delete a session |
//! | `POST` | `/api/sessions/{id}/select` | Make a session active |
//! | `POST` | `/api/sessions/{id}/messages` | Send `{text}`, returns the bot reply |
//!
//! # Error Contract
//!
//! Errors outside `/api/chat` use:
//!
//! ```json
//! { "error": { "code": "not_found", "message": "chat session not found: ..." } }
//! ```
//!
//! `/api/chat` always answers `{ "answer": "..." }`, with the status code
//! telling clients whether the answer is a real one.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the dashboard can call
//! the server from the browser.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::answer::{answer_question, AnswerOutcome, MISSING_INPUT};
use crate::chat::{create_backend, ChatClient, ChatError, ChatStore};
use crate::config::Config;
use crate::db;
use crate::llm::{create_model, GenerativeModel};
use crate::models::{ChatSession, Message, PageEntry, ScanReport};
use crate::page_store::PageStore;
use crate::scan::Scanner;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    model: Arc<dyn GenerativeModel>,
    scanner: Scanner,
    chat: Arc<ChatClient>,
}

impl AppState {
    /// Wires the stores, scanner and chat client around `model`.
    pub async fn build(config: &Config, model: Arc<dyn GenerativeModel>) -> anyhow::Result<Self> {
        let pool = db::open(config).await?;
        let pages = PageStore::new(pool.clone());
        let scanner = Scanner::new(config, pages)?;
        let chat_store = ChatStore::new(pool);
        chat_store.load().await?;

        let backend = create_backend(config, model.clone())?;
        let chat = ChatClient::new(
            chat_store,
            scanner.clone(),
            backend,
            config.scan.routes.clone(),
            config.chat.clone(),
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            model,
            scanner,
            chat: Arc::new(chat),
        })
    }

    fn pages(&self) -> &PageStore {
        self.scanner.store()
    }

    fn chats(&self) -> &ChatStore {
        self.chat.store()
    }
}

/// Starts the HTTP server on `[server].bind` with the configured model.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let model: Arc<dyn GenerativeModel> = Arc::from(create_model(&config.llm)?);
    let state = AppState::build(config, model).await?;

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "assistant server listening");
    println!("Assistant server listening on http://{}", bind_addr);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .route("/api/ask", post(handle_chat))
        .route("/api/scan", post(handle_scan))
        .route(
            "/api/pages",
            get(handle_list_pages)
                .post(handle_scan_page)
                .delete(handle_clear_pages),
        )
        .route("/api/context", get(handle_context))
        .route(
            "/api/sessions",
            get(handle_list_sessions).post(handle_new_session),
        )
        .route(
            "/api/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/api/sessions/{id}/select", post(handle_select_session))
        .route("/api/sessions/{id}/messages", post(handle_send_message))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(err: anyhow::Error) -> AppError {
    tracing::error!(error = %format!("{:#}", err), "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

/// Maps [`ChatError::SessionNotFound`] to 404, anything else to 500.
fn classify(err: anyhow::Error) -> AppError {
    match err.downcast_ref::<ChatError>() {
        Some(e @ ChatError::SessionNotFound(_)) => not_found(e.to_string()),
        None => internal(err),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatBody {
    #[serde(default)]
    question: Option<String>,
    #[serde(default)]
    context: Option<String>,
}

/// Answers with the outcome's status. Unparseable bodies are treated as a
/// request with nothing in it.
async fn handle_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Response {
    let outcome = match body {
        Ok(Json(ChatBody {
            question: Some(question),
            context: Some(context),
        })) => {
            answer_question(
                &question,
                &context,
                state.model.as_ref(),
                state.config.llm.prompt_char_limit,
            )
            .await
        }
        _ => AnswerOutcome {
            answer: MISSING_INPUT.to_string(),
            status: 400,
        },
    };

    let status =
        StatusCode::from_u16(outcome.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(outcome)).into_response()
}

// ============ Pages ============

#[derive(Deserialize)]
struct ScanBody {
    #[serde(default)]
    routes: Option<Vec<String>>,
}

async fn handle_scan(
    State(state): State<AppState>,
    body: Result<Json<ScanBody>, JsonRejection>,
) -> Json<ScanReport> {
    // An empty or missing body scans the configured routes
    let routes = body
        .ok()
        .and_then(|Json(b)| b.routes)
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| state.config.scan.routes.clone());
    Json(state.scanner.scan_all_routes(&routes).await)
}

#[derive(Deserialize)]
struct PageBody {
    #[serde(default)]
    key: Option<String>,
    html: String,
}

#[derive(Serialize)]
struct PageStored {
    key: String,
    changed: bool,
}

async fn handle_scan_page(
    State(state): State<AppState>,
    body: Result<Json<PageBody>, JsonRejection>,
) -> Result<Json<PageStored>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    let key = body
        .key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| crate::scan::UNKNOWN_KEY.to_string());
    let changed = state
        .scanner
        .scan_current_page(Some(key.as_str()), &body.html)
        .await
        .map_err(internal)?;
    Ok(Json(PageStored { key, changed }))
}

async fn handle_list_pages(
    State(state): State<AppState>,
) -> Result<Json<Vec<PageEntry>>, AppError> {
    Ok(Json(state.pages().page_map().await.map_err(internal)?))
}

#[derive(Serialize)]
struct Cleared {
    removed: u64,
}

async fn handle_clear_pages(State(state): State<AppState>) -> Result<Json<Cleared>, AppError> {
    let removed = state.pages().clear().await.map_err(internal)?;
    Ok(Json(Cleared { removed }))
}

#[derive(Serialize)]
struct ContextResponse {
    context: String,
}

async fn handle_context(State(state): State<AppState>) -> Json<ContextResponse> {
    Json(ContextResponse {
        context: state.pages().get_combined_context().await,
    })
}

// ============ Sessions ============

async fn handle_list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<ChatSession>>, AppError> {
    Ok(Json(state.chats().list().await.map_err(internal)?))
}

async fn handle_new_session(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<ChatSession>), AppError> {
    let session = state.chats().new_chat().await.map_err(internal)?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ChatSession>, AppError> {
    state
        .chats()
        .get(&id)
        .await
        .map_err(internal)?
        .map(Json)
        .ok_or_else(|| not_found(format!("chat session not found: {}", id)))
}

async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if state.chats().delete(&id).await.map_err(internal)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(format!("chat session not found: {}", id)))
    }
}

async fn handle_select_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.chats().select(&id).await.map_err(classify)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SendBody {
    text: String,
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<SendBody>, JsonRejection>,
) -> Result<Json<Message>, AppError> {
    let Json(body) = body.map_err(|e| bad_request(e.body_text()))?;
    state
        .chat
        .send_in(&id, &body.text)
        .await
        .map_err(classify)?
        .map(Json)
        .ok_or_else(|| bad_request("text must not be empty"))
}
