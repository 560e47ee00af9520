use crate::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bytes::Bytes;
use futures::Stream;
use liquid::{
    convert::{convert_to_model_messages, ClientMessage},
    errors::ModelError,
    models::{args::Args, conversation::Conversation, message::ModelResponse, part::ToolCallPart},
    providers::{
        base::{StreamedResponse, Usage},
        parts_manager::StreamDelta,
    },
};
use serde::Deserialize;
use serde_json::json;
use std::{
    convert::Infallible,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct ChatRequest {
    messages: Vec<ClientMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatQuery {
    #[serde(default = "default_protocol")]
    protocol: String,
}

fn default_protocol() -> String {
    "data".to_string()
}

// Custom SSE response type that implements the Vercel AI SDK data stream protocol
pub struct SseResponse {
    rx: ReceiverStream<String>,
}

impl SseResponse {
    fn new(rx: ReceiverStream<String>) -> Self {
        Self { rx }
    }
}

impl Stream for SseResponse {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.rx)
            .poll_next(cx)
            .map(|opt| opt.map(|s| Ok(Bytes::from(s))))
    }
}

impl IntoResponse for SseResponse {
    fn into_response(self) -> axum::response::Response {
        let body = axum::body::Body::from_stream(self);

        (
            [
                ("Content-Type", "text/event-stream"),
                ("Cache-Control", "no-cache"),
                ("Connection", "keep-alive"),
                ("x-vercel-ai-data-stream", "v1"),
            ],
            body,
        )
            .into_response()
    }
}

// Protocol-specific message formatting
struct ProtocolFormatter;

impl ProtocolFormatter {
    fn format_text(text: &str) -> String {
        let encoded_text = serde_json::to_string(text).unwrap_or_else(|_| String::new());
        format!("0:{}\n", encoded_text)
    }

    /// Tool calls start with "9:". Raw arguments are written out as received
    /// unless they would break the line framing.
    fn format_tool_call(call: &ToolCallPart) -> String {
        let args = match &call.args {
            Args::Raw(text) if !text.contains(['\n', '\r']) && call.parsed_args().is_ok() => {
                text.trim().to_string()
            }
            args => match args.parse() {
                Ok(map) => serde_json::Value::Object(map).to_string(),
                Err(e) => {
                    tracing::warn!(tool_call_id = %call.tool_call_id, error = %e, "sending tool call without its invalid arguments");
                    "{}".to_string()
                }
            },
        };
        format!(
            "9:{{\"toolCallId\":{},\"toolName\":{},\"args\":{}}}\n",
            json!(call.tool_call_id),
            json!(call.tool_name),
            args
        )
    }

    /// Finish messages start with "e:" and are always the last line
    fn format_finish(reason: &str, usage: &Usage) -> String {
        let finish = json!({
            "finishReason": reason,
            "usage": {
                "promptTokens": usage.prompt_tokens,
                "completionTokens": usage.completion_tokens
            },
            "isContinued": false
        });
        format!("e:{}\n", finish)
    }
}

#[derive(Debug, thiserror::Error)]
enum ReplyError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("client disconnected")]
    Disconnected(#[from] mpsc::error::SendError<String>),
}

async fn send_tool_calls(response: &ModelResponse, tx: &mpsc::Sender<String>) -> Result<(), ReplyError> {
    for call in response.tool_calls() {
        tx.send(ProtocolFormatter::format_tool_call(call)).await?;
    }
    Ok(())
}

/// Forward text as it streams in; tool calls are sent once their arguments
/// are complete
async fn forward_stream(
    mut streamed: StreamedResponse,
    tx: &mpsc::Sender<String>,
) -> Result<Usage, ReplyError> {
    loop {
        // Heartbeat, used to detect disconnected clients and abandon the stream
        match timeout(Duration::from_millis(500), streamed.next()).await {
            Ok(Some(Ok(StreamDelta::Text { content, .. }))) => {
                if !content.is_empty() {
                    tx.send(ProtocolFormatter::format_text(&content)).await?;
                }
            }
            Ok(Some(Ok(_))) => continue,
            Ok(Some(Err(e))) => return Err(e.into()),
            Ok(None) => break,
            Err(_) => {
                if tx.is_closed() {
                    tracing::info!(
                        unterminated = ?streamed.unterminated_tool_calls(),
                        "client went away, abandoning stream"
                    );
                    return Ok(streamed.usage());
                }
            }
        }
    }

    send_tool_calls(&streamed.get(), tx).await?;
    Ok(streamed.usage())
}

async fn reply(state: &AppState, conversation: &Conversation, tx: &mpsc::Sender<String>) -> Result<Usage, ReplyError> {
    let agent_model = state
        .model
        .agent_model(&state.function_tools, true, &[])
        .await?;

    match agent_model.request_stream(conversation.messages(), None).await {
        Ok(streamed) => forward_stream(streamed, tx).await,
        Err(ModelError::NotSupported(_)) => {
            tracing::debug!(model = %agent_model.model_name(), "streaming not supported, requesting full response");
            let (response, usage) = agent_model.request(conversation.messages(), None).await?;
            let text = response.text();
            if !text.is_empty() {
                tx.send(ProtocolFormatter::format_text(&text)).await?;
            }
            send_tool_calls(&response, tx).await?;
            Ok(usage)
        }
        Err(e) => Err(e.into()),
    }
}

async fn handler(
    State(state): State<AppState>,
    Query(query): Query<ChatQuery>,
    Json(request): Json<ChatRequest>,
) -> Result<SseResponse, StatusCode> {
    tracing::info!(protocol = %query.protocol, messages = request.messages.len(), "received chat request");
    if query.protocol != "data" {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Create channel for streaming
    let (tx, rx) = mpsc::channel(100);
    let stream = ReceiverStream::new(rx);

    if request.messages.is_empty() {
        let _ = tx
            .send(ProtocolFormatter::format_finish("stop", &Usage::default()))
            .await;
        return Ok(SseResponse::new(stream));
    }

    let (live_prompt, history) = convert_to_model_messages(&request.messages);
    tracing::debug!(?live_prompt, turns = history.len(), "converted chat history");

    let conversation = Conversation::from(history);
    if let Err(e) = conversation.validate() {
        tracing::warn!(error = %e, "rejecting malformed conversation");
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    // Spawn task to handle streaming
    tokio::spawn(async move {
        let (reason, usage) = match reply(&state, &conversation, &tx).await {
            Ok(usage) => ("stop", usage),
            Err(ReplyError::Disconnected(_)) => return,
            Err(ReplyError::Model(e)) => {
                tracing::error!(error = %e, "model request failed");
                ("error", Usage::default())
            }
        };

        // Send finish message
        let _ = tx.send(ProtocolFormatter::format_finish(reason, &usage)).await;
    });

    Ok(SseResponse::new(stream))
}

// Configure routes for this module
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(handler))
        .with_state(state)
}
