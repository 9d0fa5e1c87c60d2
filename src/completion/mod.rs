pub mod sse;

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{GenerationConfig, ProviderConfig};
use crate::error::{CompletionError, ConfigError};
use self::sse::{parse_delta, SseEvent, SseParser};

/// Raw response bytes as the transport produces them, at arbitrary chunk
/// boundaries.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Vec<u8>, CompletionError>> + Send>>;

#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Wire shape of a streaming chat-completions request.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f64,
    pub max_tokens: u32,
    pub stream: bool,
}

/// Seam between the streaming client and the network, so tests run against a
/// scripted byte stream instead of a live endpoint.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn connect(&self, request: &CompletionRequest) -> Result<ByteStream, CompletionError>;
}

/// Production transport: HTTPS POST to `{base_url}/chat/completions`.
pub struct HttpTransport {
    client: reqwest::Client,
    provider: ProviderConfig,
}

impl HttpTransport {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider,
        }
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn connect(&self, request: &CompletionRequest) -> Result<ByteStream, CompletionError> {
        let url = format!(
            "{}/chat/completions",
            self.provider.base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.provider.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    CompletionError::Connect(e.to_string())
                } else {
                    CompletionError::Transient(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(CompletionError::Auth(format!("HTTP {status}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::Quota(format!("HTTP {status}")));
        }
        if status.is_server_error() {
            return Err(CompletionError::Transient(format!("HTTP {status}")));
        }
        if !status.is_success() {
            return Err(CompletionError::Malformed(format!(
                "unexpected HTTP {status}"
            )));
        }

        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(|e| CompletionError::Transient(e.to_string()))
        });
        Ok(Box::pin(stream) as ByteStream)
    }
}

/// Bounded retry with exponential backoff. Applies only while establishing
/// the connection; a stream, once open, is not restartable.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl StreamState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Events delivered on the stream handle. `Done` and `Error` are terminal;
/// nothing follows them.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Fragment(String),
    Done,
    Error(CompletionError),
}

pub struct StreamingCompletionClient {
    transport: Arc<dyn CompletionTransport>,
    generation: GenerationConfig,
    retry: RetryPolicy,
}

impl StreamingCompletionClient {
    pub fn new(
        provider: ProviderConfig,
        generation: GenerationConfig,
    ) -> Result<Self, ConfigError> {
        provider.validate()?;
        generation.validate()?;
        Ok(Self {
            transport: Arc::new(HttpTransport::new(provider)),
            generation,
            retry: RetryPolicy::default(),
        })
    }

    /// Build a client over a custom transport (tests, proxies).
    pub fn with_transport(
        transport: Arc<dyn CompletionTransport>,
        generation: GenerationConfig,
    ) -> Self {
        Self {
            transport,
            generation,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start a completion. Returns immediately with a handle; the request
    /// runs on a spawned task.
    pub fn stream(&self, messages: Vec<Message>) -> CompletionStream {
        let request = CompletionRequest {
            model: self.generation.model.clone(),
            messages,
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
            stream: true,
        };
        CompletionStream::spawn(self.transport.clone(), request, self.retry.clone())
    }
}

/// Handle to one in-flight completion. Dropping it cancels the request.
pub struct CompletionStream {
    rx: mpsc::Receiver<StreamEvent>,
    state: Arc<Mutex<StreamState>>,
    cancel: CancellationToken,
}

impl CompletionStream {
    fn spawn(
        transport: Arc<dyn CompletionTransport>,
        request: CompletionRequest,
        retry: RetryPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let state = Arc::new(Mutex::new(StreamState::Idle));
        let cancel = CancellationToken::new();

        tokio::spawn(run_worker(
            transport,
            request,
            retry,
            cancel.clone(),
            tx,
            state.clone(),
        ));

        Self { rx, state, cancel }
    }

    /// Next event, or `None` once the terminal event has been consumed.
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    pub fn state(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Request cooperative cancellation. The worker observes the token at
    /// every await point and closes the connection promptly.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn set_state(state: &Arc<Mutex<StreamState>>, value: StreamState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = value;
}

async fn finish(
    state: &Arc<Mutex<StreamState>>,
    tx: &mpsc::Sender<StreamEvent>,
    value: StreamState,
    event: StreamEvent,
) {
    set_state(state, value);
    let _ = tx.send(event).await;
}

async fn run_worker(
    transport: Arc<dyn CompletionTransport>,
    request: CompletionRequest,
    retry: RetryPolicy,
    cancel: CancellationToken,
    tx: mpsc::Sender<StreamEvent>,
    state: Arc<Mutex<StreamState>>,
) {
    set_state(&state, StreamState::Connecting);

    let mut attempt: u32 = 0;
    let mut stream = loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                finish(&state, &tx, StreamState::Cancelled, StreamEvent::Error(CompletionError::Cancelled)).await;
                return;
            }
            result = transport.connect(&request) => result,
        };

        match result {
            Ok(stream) => break stream,
            Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                let delay = retry.delay(attempt);
                attempt += 1;
                warn!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "connect failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        finish(&state, &tx, StreamState::Cancelled, StreamEvent::Error(CompletionError::Cancelled)).await;
                        return;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                finish(&state, &tx, StreamState::Failed, StreamEvent::Error(e)).await;
                return;
            }
        }
    };

    set_state(&state, StreamState::Streaming);
    let mut parser = SseParser::new();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                finish(&state, &tx, StreamState::Cancelled, StreamEvent::Error(CompletionError::Cancelled)).await;
                return;
            }
            chunk = stream.next() => chunk,
        };

        match chunk {
            Some(Ok(bytes)) => {
                let events = match parser.push(&bytes) {
                    Ok(events) => events,
                    Err(e) => {
                        finish(&state, &tx, StreamState::Failed, StreamEvent::Error(e)).await;
                        return;
                    }
                };
                for event in events {
                    match event {
                        SseEvent::Data(payload) => match parse_delta(&payload) {
                            Ok(Some(text)) => {
                                if tx.send(StreamEvent::Fragment(text)).await.is_err() {
                                    // Receiver gone, nothing left to deliver to
                                    return;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => {
                                finish(&state, &tx, StreamState::Failed, StreamEvent::Error(e)).await;
                                return;
                            }
                        },
                        SseEvent::Done => {
                            debug!("completion stream finished");
                            finish(&state, &tx, StreamState::Completed, StreamEvent::Done).await;
                            return;
                        }
                    }
                }
            }
            // Mid-stream failures are terminal: a resumed stream would replay
            // or drop fragments
            Some(Err(e)) => {
                finish(&state, &tx, StreamState::Failed, StreamEvent::Error(e)).await;
                return;
            }
            None => {
                finish(
                    &state,
                    &tx,
                    StreamState::Failed,
                    StreamEvent::Error(CompletionError::Malformed(
                        "stream ended before [DONE]".to_string(),
                    )),
                )
                .await;
                return;
            }
        }
    }
}
