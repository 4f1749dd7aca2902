//! Shared test utilities
//!
//! A scripted in-process backend served by axum, plus fakes for the
//! renderer and audio output.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use memo_client::config::file::MemoConfigFile;
use memo_client::render::{Change, Renderer, Transcript};
use memo_client::speech::{AudioSink, LocalVoice};
use memo_client::{Config, Result};

/// How the mock backend answers one chat request
#[derive(Clone, Debug)]
pub enum ChatReply {
    /// SSE body sent as these raw chunks, a few milliseconds apart
    Chunks(Vec<String>),
    /// Send these chunks, then keep the body open forever
    Stall(Vec<String>),
    /// Non-success status with a body
    Status(u16, String),
}

impl ChatReply {
    /// Text deltas followed by the backend's done frame
    pub fn text(deltas: &[&str]) -> Self {
        let mut chunks: Vec<String> = deltas.iter().map(|d| format!("data: {d}\n\n")).collect();
        chunks.push("event: done\ndata: [DONE]\n\n".to_string());
        Self::Chunks(chunks)
    }
}

/// Scripted backend state shared with the test
#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<VecDeque<ChatReply>>,
    pub chat_requests: Mutex<Vec<Value>>,
    pub startup_requests: Mutex<Vec<Value>>,
    pub tts_requests: Mutex<Vec<Value>>,
    pub transcribe_calls: Mutex<usize>,
    /// Texts for which `/api/tts` answers 500
    pub tts_failures: Mutex<Vec<String>>,
    /// `/api/startup` answers 500 when set
    pub startup_down: Mutex<bool>,
}

impl MockBackend {
    /// Replies served in order; the last one repeats
    pub fn with_replies(replies: Vec<ChatReply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    fn next_reply(&self) -> ChatReply {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies
                .front()
                .cloned()
                .unwrap_or_else(|| ChatReply::text(&["ok"]))
        }
    }

    pub fn chat_messages(&self) -> Vec<String> {
        self.chat_requests
            .lock()
            .unwrap()
            .iter()
            .map(|body| body["message"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    pub fn chat_session_ids(&self) -> Vec<Option<String>> {
        self.chat_requests
            .lock()
            .unwrap()
            .iter()
            .map(|body| body["session_id"].as_str().map(ToString::to_string))
            .collect()
    }

    pub fn tts_texts(&self) -> Vec<String> {
        self.tts_requests
            .lock()
            .unwrap()
            .iter()
            .map(|body| body["text"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

/// Serve `backend` on an ephemeral port; returns the base URL
pub async fn spawn_backend(backend: Arc<MockBackend>) -> String {
    let app = Router::new()
        .route("/api/chat", post(chat))
        .route("/api/startup", post(startup))
        .route("/api/tts", post(tts))
        .route("/api/transcribe", post(transcribe))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn chat(State(backend): State<Arc<MockBackend>>, Json(body): Json<Value>) -> Response {
    backend.chat_requests.lock().unwrap().push(body);

    let (chunks, stall) = match backend.next_reply() {
        ChatReply::Status(status, body) => {
            return (StatusCode::from_u16(status).unwrap(), body).into_response();
        }
        ChatReply::Chunks(chunks) => (chunks, false),
        ChatReply::Stall(chunks) => (chunks, true),
    };

    let stream = async_stream::stream! {
        for chunk in chunks {
            tokio::time::sleep(Duration::from_millis(5)).await;
            yield Ok::<_, Infallible>(Bytes::from(chunk));
        }
        if stall {
            std::future::pending::<()>().await;
        }
    };

    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .unwrap()
}

async fn startup(State(backend): State<Arc<MockBackend>>, Json(body): Json<Value>) -> Response {
    let returning = body["session_id"].as_str().is_some();
    backend.startup_requests.lock().unwrap().push(body);

    if *backend.startup_down.lock().unwrap() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "down").into_response();
    }

    if returning {
        Json(json!({"session_id": "u_returning", "message": "Welcome back.", "mood": "👋"}))
            .into_response()
    } else {
        Json(json!({
            "session_id": "u_new",
            "message": "Hello there. I'm Memo. What can I call you?",
            "mood": "👋"
        }))
        .into_response()
    }
}

/// Echoes the text back as the "audio"
async fn tts(State(backend): State<Arc<MockBackend>>, Json(body): Json<Value>) -> Response {
    let text = body["text"].as_str().unwrap_or_default().to_string();
    backend.tts_requests.lock().unwrap().push(body);

    if backend.tts_failures.lock().unwrap().contains(&text) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "tts down").into_response();
    }
    text.into_response()
}

async fn transcribe(State(backend): State<Arc<MockBackend>>, body: Bytes) -> Response {
    *backend.transcribe_calls.lock().unwrap() += 1;
    // Multipart body must carry the WAV part
    let has_wav = body.windows(4).any(|w| w == b"RIFF");
    if has_wav {
        Json(json!({"text": "I feel great today"})).into_response()
    } else {
        (StatusCode::BAD_REQUEST, "no audio").into_response()
    }
}

/// Configuration pointing at `url`, with no cooldowns or storage surprises
pub fn test_config(url: &str) -> Config {
    let mut config = Config::from_sources(MemoConfigFile::default(), |_: &str| None).unwrap();
    config.backend_url = url.to_string();
    config.gate.typed_cooldown = Duration::ZERO;
    config.gate.voice_cooldown = Duration::ZERO;
    config.capture.silence_window = Duration::from_millis(300);
    config
}

/// Renderer that records every change
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<Change>>>);

impl Recorder {
    pub fn changes(&self) -> Vec<Change> {
        self.0.lock().unwrap().clone()
    }
}

impl Renderer for Recorder {
    fn render(&mut self, _transcript: &Transcript, change: &Change) {
        self.0.lock().unwrap().push(change.clone());
    }
}

/// Ordered log of what the fake audio devices did
#[derive(Clone, Default)]
pub struct AudioLog(pub Arc<Mutex<Vec<String>>>);

impl AudioLog {
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Sink that "plays" audio by logging it as text
pub struct LoggingSink(pub AudioLog);

#[async_trait]
impl AudioSink for LoggingSink {
    async fn play(&self, audio: Vec<u8>) -> Result<()> {
        let text = String::from_utf8_lossy(&audio).to_string();
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.0.0.lock().unwrap().push(format!("play {text}"));
        Ok(())
    }
}

/// Local voice that logs what it would have said
pub struct LoggingVoice(pub AudioLog);

#[async_trait]
impl LocalVoice for LoggingVoice {
    async fn speak(&self, text: &str) -> Result<()> {
        self.0.0.lock().unwrap().push(format!("local {text}"));
        Ok(())
    }
}
