//! OpenAI-compatible provider
//!
//! Sends converse requests to any `/v1/chat/completions` endpoint (LiteLLM,
//! vLLM, OpenAI itself) and translates the SSE chunk stream back into the
//! gateway's event order: message-start, content deltas, message-stop and a
//! single trailing metadata event.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::net::{HttpClient, join_url};
use crate::providers::types::{
    ContentBlock, ConverseRequest, ConverseResponse, Message, Metrics, Role, StopReason,
    TokenUsage,
};
use crate::providers::{ModelProvider, ProviderError, ProviderEventStream};
use crate::stream::{BlockStart, Delta, LineBuffer, StreamEvent};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OpenAiCompatConfig {
    /// Provider id that catalog models reference.
    pub id: String,
    /// Base URL, e.g. `http://localhost:4000`.
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OaiResponse {
    #[serde(default)]
    choices: Vec<OaiChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiChoice {
    #[serde(default)]
    message: Option<OaiMessage>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OaiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCall>,
}

#[derive(Debug, Deserialize)]
struct OaiToolCall {
    id: String,
    function: OaiFunction,
}

#[derive(Debug, Deserialize)]
struct OaiFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OaiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    prompt_tokens_details: Option<OaiPromptDetails>,
}

#[derive(Debug, Deserialize)]
struct OaiPromptDetails {
    #[serde(default)]
    cached_tokens: u32,
}

impl From<OaiUsage> for TokenUsage {
    fn from(u: OaiUsage) -> Self {
        Self {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_input_tokens: u.prompt_tokens_details.map_or(0, |d| d.cached_tokens),
            cache_write_input_tokens: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct OaiStreamChunk {
    #[serde(default)]
    choices: Vec<OaiStreamChoice>,
    #[serde(default)]
    usage: Option<OaiUsage>,
}

#[derive(Debug, Deserialize)]
struct OaiStreamChoice {
    #[serde(default)]
    delta: Option<OaiDelta>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OaiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OaiToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct OaiToolCallDelta {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OaiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OaiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ---------------------------------------------------------------------------
// Provider
// ---------------------------------------------------------------------------

pub struct OpenAiCompatProvider {
    config: OpenAiCompatConfig,
    client: HttpClient,
}

impl OpenAiCompatProvider {
    pub fn new(config: OpenAiCompatConfig) -> Result<Self, ProviderError> {
        let client = HttpClient::with_timeout_secs(config.timeout_secs)
            .map_err(|e| ProviderError::Other(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { config, client })
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response, ProviderError> {
        let url = join_url(&self.config.base_url, "/v1/chat/completions");
        let mut req = self.client.inner().post(&url).json(body);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let code = status.as_u16();
        if code == 429 {
            let retry_after_secs = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return Err(ProviderError::RateLimited { retry_after_secs });
        }
        let message = resp.text().await.unwrap_or_default();
        Err(ProviderError::Api {
            status: code,
            message,
        })
    }
}

/// Build the chat-completions body for a converse request.
fn build_request_body(request: &ConverseRequest, stream: bool) -> Value {
    let mut messages = Vec::new();
    if let Some(ref system) = request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &request.messages {
        convert_message(message, &mut messages);
    }

    let mut body = json!({
        "model": request.model_id,
        "messages": messages,
        "stream": stream,
    });

    if stream {
        body["stream_options"] = json!({ "include_usage": true });
    }
    if let Some(max) = request.max_tokens {
        body["max_tokens"] = json!(max);
    }
    if let Some(budget) = request.thought_budget {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }
    if let Some(ref format) = request.output_config {
        body["response_format"] = format.clone();
    }
    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    body
}

fn convert_message(message: &Message, out: &mut Vec<Value>) {
    let text = message.text();
    match message.role {
        Role::User => {
            for block in &message.content {
                if let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = block
                {
                    let content = match content {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                }
            }
            if !text.is_empty() {
                out.push(json!({ "role": "user", "content": text }));
            }
        }
        Role::Assistant => {
            let tool_calls: Vec<Value> = message
                .content
                .iter()
                .filter_map(|block| match block {
                    ContentBlock::ToolUse {
                        tool_use_id,
                        name,
                        input,
                    } => Some(json!({
                        "id": tool_use_id,
                        "type": "function",
                        "function": { "name": name, "arguments": input.to_string() },
                    })),
                    _ => None,
                })
                .collect();

            let mut msg = json!({ "role": "assistant", "content": text });
            if !tool_calls.is_empty() {
                msg["tool_calls"] = Value::Array(tool_calls);
            }
            out.push(msg);
        }
    }
}

fn convert_response(oai: OaiResponse, started: Instant) -> Result<ConverseResponse, ProviderError> {
    let choice = oai
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Other("Response contained no choices".into()))?;
    let message = choice.message.unwrap_or_default();

    let mut content = Vec::new();
    if let Some(reasoning) = message.reasoning_content.filter(|r| !r.is_empty()) {
        content.push(ContentBlock::Reasoning { text: reasoning });
    }
    if let Some(text) = message.content.filter(|t| !t.is_empty()) {
        content.push(ContentBlock::Text { text });
    }
    for call in message.tool_calls {
        let input = serde_json::from_str(&call.function.arguments)
            .unwrap_or(Value::String(call.function.arguments));
        content.push(ContentBlock::ToolUse {
            tool_use_id: call.id,
            name: call.function.name,
            input,
        });
    }

    Ok(ConverseResponse {
        output: Message {
            role: Role::Assistant,
            content,
        },
        stop_reason: choice
            .finish_reason
            .as_deref()
            .map_or(StopReason::EndTurn, StopReason::from_finish_reason),
        usage: oai.usage.map(TokenUsage::from).unwrap_or_default(),
        metrics: Metrics {
            latency_ms: started.elapsed().as_millis() as u64,
        },
    })
}

// ---------------------------------------------------------------------------
// Stream translation
// ---------------------------------------------------------------------------

/// Translates OpenAI stream chunks into gateway stream events.
struct ChunkTranslator {
    started_at: Instant,
    message_started: bool,
    next_index: u32,
    text_index: Option<u32>,
    reasoning_index: Option<u32>,
    /// OpenAI tool-call index -> content block index.
    tool_indices: HashMap<u32, u32>,
    open_blocks: Vec<u32>,
    stop_reason: Option<StopReason>,
    usage: Option<TokenUsage>,
    finished: bool,
}

impl ChunkTranslator {
    fn new(started_at: Instant) -> Self {
        Self {
            started_at,
            message_started: false,
            next_index: 0,
            text_index: None,
            reasoning_index: None,
            tool_indices: HashMap::new(),
            open_blocks: Vec::new(),
            stop_reason: None,
            usage: None,
            finished: false,
        }
    }

    fn open_block(&mut self) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.open_blocks.push(index);
        index
    }

    fn ensure_started(&mut self, out: &mut Vec<StreamEvent>) {
        if !self.message_started {
            self.message_started = true;
            out.push(StreamEvent::MessageStart {
                role: Role::Assistant,
            });
        }
    }

    fn on_chunk(&mut self, chunk: OaiStreamChunk) -> Vec<StreamEvent> {
        let mut out = Vec::new();
        self.ensure_started(&mut out);

        if let Some(usage) = chunk.usage {
            self.usage = Some(usage.into());
        }

        for choice in chunk.choices {
            let delta = choice.delta.unwrap_or_default();

            if let Some(text) = delta.reasoning_content.filter(|t| !t.is_empty()) {
                let index = match self.reasoning_index {
                    Some(i) => i,
                    None => {
                        let i = self.open_block();
                        self.reasoning_index = Some(i);
                        i
                    }
                };
                out.push(StreamEvent::ContentBlockDelta {
                    content_block_index: index,
                    delta: Delta::ReasoningContent { text },
                });
            }

            if let Some(text) = delta.content.filter(|t| !t.is_empty()) {
                let index = match self.text_index {
                    Some(i) => i,
                    None => {
                        let i = self.open_block();
                        self.text_index = Some(i);
                        i
                    }
                };
                out.push(StreamEvent::text_delta(index, text));
            }

            for call in delta.tool_calls {
                let function = call.function;
                let index = match self.tool_indices.get(&call.index) {
                    Some(&i) => i,
                    None => {
                        let i = self.open_block();
                        self.tool_indices.insert(call.index, i);
                        let name = function
                            .as_ref()
                            .and_then(|f| f.name.clone())
                            .unwrap_or_default();
                        out.push(StreamEvent::ContentBlockStart {
                            content_block_index: i,
                            start: BlockStart::ToolUse {
                                tool_use_id: call.id.unwrap_or_default(),
                                name,
                            },
                        });
                        i
                    }
                };
                if let Some(args) = function.and_then(|f| f.arguments).filter(|a| !a.is_empty()) {
                    out.push(StreamEvent::ContentBlockDelta {
                        content_block_index: index,
                        delta: Delta::ToolUse { input: args },
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.stop_reason = Some(StopReason::from_finish_reason(&reason));
            }
        }

        out
    }

    /// Close open blocks and emit message-stop plus the metadata event.
    fn finish(&mut self) -> Vec<StreamEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut out = Vec::new();
        self.ensure_started(&mut out);
        for index in self.open_blocks.drain(..) {
            out.push(StreamEvent::ContentBlockStop {
                content_block_index: index,
            });
        }
        out.push(StreamEvent::MessageStop {
            stop_reason: self.stop_reason.clone().unwrap_or(StopReason::EndTurn),
        });

        let usage = self.usage.unwrap_or_else(|| {
            warn!("Upstream stream reported no usage, metering zero tokens");
            TokenUsage::default()
        });
        out.push(StreamEvent::Metadata {
            usage,
            metrics: Metrics {
                latency_ms: self.started_at.elapsed().as_millis() as u64,
            },
        });
        out
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

struct SseState {
    bytes: ByteStream,
    lines: LineBuffer,
    translator: ChunkTranslator,
    pending: VecDeque<Result<StreamEvent, ProviderError>>,
    done: bool,
}

impl SseState {
    fn handle_line(&mut self, line: &str) {
        let Some(data) = line.strip_prefix("data:") else {
            // `event:`, `id:` and `:` comment lines carry nothing we use.
            return;
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.finish();
            return;
        }
        match serde_json::from_str::<OaiStreamChunk>(data) {
            Ok(chunk) => {
                let events = self.translator.on_chunk(chunk);
                self.pending.extend(events.into_iter().map(Ok));
            }
            Err(e) => debug!(data = data, error = %e, "Skipping unparseable SSE line"),
        }
    }

    fn finish(&mut self) {
        let events = self.translator.finish();
        self.pending.extend(events.into_iter().map(Ok));
        self.done = true;
    }
}

fn translate_sse(bytes: ByteStream, started_at: Instant) -> ProviderEventStream {
    let state = SseState {
        bytes,
        lines: LineBuffer::new(),
        translator: ChunkTranslator::new(started_at),
        pending: VecDeque::new(),
        done: false,
    };

    let stream = futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.done {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in st.lines.push(&chunk) {
                        st.handle_line(&line);
                    }
                }
                Some(Err(e)) => {
                    st.done = true;
                    st.pending
                        .push_back(Err(ProviderError::Stream(format!("Upstream stream error: {e}"))));
                }
                None => {
                    if let Some(line) = st.lines.finish() {
                        st.handle_line(&line);
                    }
                    st.finish();
                }
            }
        }
    });

    Box::pin(stream)
}

impl ModelProvider for OpenAiCompatProvider {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn converse(
        &self,
        request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ConverseResponse, ProviderError>> + Send + '_>> {
        let body = build_request_body(request, false);
        Box::pin(async move {
            let started = Instant::now();
            let resp = self.post(&body).await?;
            let oai: OaiResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Other(format!("Failed to parse response: {e}")))?;
            convert_response(oai, started)
        })
    }

    fn converse_stream(
        &self,
        request: &ConverseRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ProviderEventStream, ProviderError>> + Send + '_>> {
        let body = build_request_body(request, true);
        Box::pin(async move {
            let started = Instant::now();
            let resp = self.post(&body).await?;
            Ok(translate_sse(Box::pin(resp.bytes_stream()), started))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
