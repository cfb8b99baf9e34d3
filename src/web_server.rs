use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    serve, Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use minijinja::{path_loader, Environment};
use minijinja_autoreload::AutoReloader;
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::conversation::{Conversation, ConversationPhase, Sender, Submission};
use crate::error::ModelError;
use crate::markup::DisplaySegment;

/// Event pushed to every connected WebSocket client.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastMessage {
    fn session(view: &SessionView) -> Self {
        Self {
            message_type: "session".to_string(),
            payload: serde_json::to_value(view).unwrap_or_default(),
        }
    }

    fn error(message: &str) -> Self {
        Self {
            message_type: "error".to_string(),
            payload: serde_json::json!({ "message": message }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub sender: Sender,
    pub text: String,
    /// Display time, taken when the view is built.
    pub time: String,
    pub segments: Vec<DisplaySegment>,
}

/// Snapshot of the conversation as the browser sees it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub phase: ConversationPhase,
    pub loading: bool,
    pub question_index: usize,
    pub total_questions: usize,
    pub messages: Vec<MessageView>,
}

impl SessionView {
    pub fn from_conversation(conversation: &Conversation) -> Self {
        let time = chrono::Local::now().format("%H:%M").to_string();
        let messages = conversation
            .rendered_transcript()
            .into_iter()
            .map(|(message, segments)| MessageView {
                sender: message.sender,
                text: message.text.clone(),
                time: time.clone(),
                segments,
            })
            .collect();

        Self {
            phase: conversation.phase(),
            loading: conversation.is_loading(),
            question_index: conversation.question_index(),
            total_questions: conversation.questions().len(),
            messages,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub text: String,
}

#[derive(Debug, thiserror::Error)]
enum SubmitError {
    #[error("A reply is still being generated; wait for it before sending another message")]
    Busy,
    #[error("The model task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IntoResponse for SubmitError {
    fn into_response(self) -> Response {
        let status = match self {
            SubmitError::Busy => StatusCode::CONFLICT,
            SubmitError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<AutoReloader>,
    conversation: Arc<Mutex<Conversation>>,
    // Channel for broadcasting session updates to all connected WebSocket clients
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl AppState {
    pub fn new(templates_dir: impl Into<PathBuf>, mut conversation: Conversation) -> Self {
        conversation.initialize();
        let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100); // Capacity of 100 messages
        Self {
            templates: Arc::new(create_minijinja_env(templates_dir.into())),
            conversation: Arc::new(Mutex::new(conversation)),
            broadcast_tx,
        }
    }

    async fn view(&self) -> SessionView {
        SessionView::from_conversation(&*self.conversation.lock().await)
    }

    fn publish(&self, view: &SessionView) {
        // No receivers just means no browser has a socket open.
        if self.broadcast_tx.send(BroadcastMessage::session(view)).is_err() {
            debug!("No WebSocket clients to notify");
        }
    }
}

/// Web server settings taken from the command line.
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: IpAddr,
    pub port: u16,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9900,
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        }
    }
}

// Minijinja Environment setup
pub fn create_minijinja_env(templates_dir: PathBuf) -> AutoReloader {
    // Use AutoReloader so template edits show up without a restart
    AutoReloader::new(move |notifier| {
        let mut env = Environment::new();
        env.set_loader(path_loader(&templates_dir));
        notifier.watch_path(&templates_dir, true);
        Ok(env)
    })
}

fn render_index(templates: &AutoReloader, session: &SessionView) -> Result<String, minijinja::Error> {
    let env = templates.acquire_env()?;
    let tmpl = env.get_template("index.html")?;
    let html = tmpl.render(minijinja::context! {
        title => "HealthMate Assistant",
        subtitle => "Your personal health and wellness guide",
        session => session,
    })?;
    Ok(html)
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, Html<String>)> {
    let session = state.view().await;
    render_index(&state.templates, &session)
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn session_handler(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.view().await)
}

async fn submit_handler(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SessionView>, SubmitError> {
    submit(state, request.text).await.map(Json)
}

/// Applies one user message. The session lock is not held during the model
/// call, which runs in its own task. A call that panics is completed with
/// [`ModelError::Aborted`] so the conversation leaves the loading state.
async fn submit(state: AppState, text: String) -> Result<SessionView, SubmitError> {
    let (request, client) = {
        let mut conversation = state.conversation.lock().await;
        if conversation.is_loading() {
            warn!("Rejecting submission while a reply is pending");
            return Err(SubmitError::Busy);
        }

        match conversation.begin_submit(&text) {
            Submission::Ignored => return Ok(SessionView::from_conversation(&conversation)),
            Submission::NextQuestion => {
                let view = SessionView::from_conversation(&conversation);
                state.publish(&view);
                return Ok(view);
            }
            Submission::AwaitingModel(request) => {
                state.publish(&SessionView::from_conversation(&conversation));
                (request, conversation.client())
            }
        }
    };

    let task_state = state.clone();
    let view = tokio::spawn(async move {
        info!(kind = ?request.kind, "Requesting model reply from {}", client.name());
        let provider = client.name().to_string();
        let call = {
            let request = request.clone();
            tokio::spawn(async move { request.send(client.as_ref()).await })
        };
        let outcome = call.await.unwrap_or_else(|e| {
            error!("Model task for {} did not finish: {}", provider, e);
            Err(ModelError::Aborted {
                provider,
                reason: e.to_string(),
            })
        });

        let mut conversation = task_state.conversation.lock().await;
        conversation.complete(&request, outcome);
        let view = SessionView::from_conversation(&conversation);
        task_state.publish(&view);
        view
    })
    .await?;

    Ok(view)
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(sender: &mut futures::stream::SplitSink<WebSocket, Message>, msg: &BroadcastMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json_msg) => sender.send(Message::Text(json_msg)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize broadcast message: {}", e);
            true
        }
    }
}

// Handle individual WebSocket connections
async fn handle_socket(socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut broadcast_rx = state.broadcast_tx.subscribe();
    let (mut sender, mut receiver) = socket.split();
    // Replies meant for this client only, such as rejected submissions
    let (reply_tx, mut reply_rx) = mpsc::channel::<BroadcastMessage>(8);

    let initial = BroadcastMessage::session(&state.view().await);
    if !send_json(&mut sender, &initial).await {
        warn!("Failed to send session snapshot to new WebSocket client");
        return;
    }

    loop {
        tokio::select! {
            // Session update for every client
            Ok(msg) = broadcast_rx.recv() => {
                if !send_json(&mut sender, &msg).await {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
            }

            Some(msg) = reply_rx.recv() => {
                if !send_json(&mut sender, &msg).await {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
            }

            // Message received from the client
            incoming = receiver.next() => {
                let Some(Ok(msg)) = incoming else {
                    // Client disconnected without sending a Close message
                    info!("WebSocket client disconnected");
                    break;
                };
                match msg {
                    Message::Text(text) => {
                        debug!("Received text message from client: {}", text);
                        match serde_json::from_str::<SubmitRequest>(&text) {
                            Ok(request) => {
                                let state = state.clone();
                                let reply_tx = reply_tx.clone();
                                tokio::spawn(async move {
                                    if let Err(e) = submit(state, request.text).await {
                                        let _ = reply_tx.send(BroadcastMessage::error(&e.to_string())).await;
                                    }
                                });
                            }
                            Err(e) => {
                                warn!("Ignoring malformed client message: {}", e);
                                let _ = reply_tx
                                    .send(BroadcastMessage::error("Expected {\"text\": \"...\"}"))
                                    .await;
                            }
                        }
                    }
                    Message::Binary(_) => {
                        warn!("Received unexpected binary message from client");
                    }
                    Message::Ping(_) | Message::Pong(_) => {
                        // Axum answers pings automatically
                    }
                    Message::Close(_) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                }
            }
        }
    }
    info!("WebSocket connection closed");
}

/// Builds the router serving the chat page, API, WebSocket and static files.
pub fn app(state: AppState, static_dir: &Path) -> Router {
    // Serve static files from the static directory
    let static_files_service = ServeDir::new(static_dir).not_found_service(tower::service_fn(|_: axum::extract::Request| async {
        Ok::<_, std::convert::Infallible>((StatusCode::NOT_FOUND, "Not Found").into_response())
    }));

    Router::new()
        .route("/", get(index_handler))
        .route("/api/session", get(session_handler))
        .route("/api/messages", post(submit_handler))
        .route("/ws", get(ws_handler))
        // Static files live under /static so they never shadow other routes
        .nest_service("/static", static_files_service)
        .with_state(state)
        .layer(TraceLayer::new_for_http()) // Add request logging
}

pub async fn start_web_server(config: WebConfig, conversation: Conversation) -> Result<()> {
    let state = AppState::new(config.templates_dir.clone(), conversation);
    let app = app(state, &config.static_dir);

    let addr = SocketAddr::new(config.host, config.port);
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm_interaction::ModelClient;
    use async_trait::async_trait;

    struct CannedClient;

    #[async_trait]
    impl ModelClient for CannedClient {
        fn name(&self) -> &str {
            "canned"
        }

        async fn generate(&self, _prompt: &str, _context: Option<&str>) -> Result<String, ModelError> {
            Ok("**Summary:** all good".to_string())
        }
    }

    #[test]
    fn test_session_view_renders_bot_segments() {
        let mut conversation = Conversation::new(Arc::new(CannedClient), vec!["**Name?**".to_string()]).unwrap();
        conversation.initialize();
        let view = SessionView::from_conversation(&conversation);

        assert_eq!(view.phase, ConversationPhase::Questions);
        assert_eq!(view.total_questions, 1);
        assert_eq!(view.messages.len(), 1);
        assert_eq!(view.messages[0].segments, vec![DisplaySegment::bold("Name?")]);
        assert_eq!(view.messages[0].time.len(), 5);
    }

    #[test]
    fn test_broadcast_session_message_shape() {
        let conversation = Conversation::with_default_questions(Arc::new(CannedClient));
        let msg = BroadcastMessage::session(&SessionView::from_conversation(&conversation));
        assert_eq!(msg.message_type, "session");
        assert_eq!(msg.payload["phase"], "questions");
        assert_eq!(msg.payload["loading"], false);
    }

    #[test]
    fn test_busy_maps_to_conflict() {
        assert_eq!(SubmitError::Busy.into_response().status(), StatusCode::CONFLICT);
    }
}
