//! Backend HTTP client

use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::capture::Transcriber;
use crate::session::SessionHandle;
use crate::speech::Synthesizer;
use crate::stream::{self, StreamEvent};
use crate::{Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply to the startup handshake
#[derive(Debug, Clone, Deserialize)]
pub struct Greeting {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub mood: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    session_id: Option<&'a str>,
    message: &'a str,
    stream: bool,
}

#[derive(Serialize)]
struct SessionRequest<'a> {
    session_id: Option<&'a str>,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    session_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
}

/// Client for the Memo backend endpoints
#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    /// Initial handshake: greeting, mood and (possibly new) session id
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply is malformed
    pub async fn startup(&self, session_id: Option<&str>) -> Result<Greeting> {
        let response = self
            .client
            .post(self.url("startup"))
            .json(&SessionRequest { session_id })
            .send()
            .await?;

        let response = check_status(response, "startup").await?;
        let greeting: Greeting = response.json().await?;

        tracing::debug!(session_id = %greeting.session_id, "startup complete");
        Ok(greeting)
    }

    /// Send a message and stream the reply
    ///
    /// Resolves once response headers arrive; the events follow as the body
    /// streams in. Dropping the returned stream aborts the request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`], [`Error::Overloaded`] or
    /// [`Error::Backend`] for non-success statuses, or a transport error
    pub async fn chat(
        &self,
        session_id: Option<&str>,
        message: &str,
    ) -> Result<impl Stream<Item = Result<StreamEvent>> + Send + use<>> {
        tracing::debug!(chars = message.chars().count(), "sending chat message");

        let response = self
            .client
            .post(self.url("chat"))
            .header("Accept", "text/event-stream")
            .json(&ChatRequest {
                session_id,
                message,
                stream: true,
            })
            .send()
            .await?;

        let response = check_status(response, "chat").await?;
        Ok(stream::decode(response.bytes_stream()))
    }

    /// Transcribe WAV audio through the backend
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the reply is malformed
    pub async fn transcribe_wav(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(self.url("transcribe"))
            .multipart(form)
            .send()
            .await?;

        let response = check_status(response, "transcribe")
            .await
            .map_err(|e| Error::Stt(e.to_string()))?;
        let result: TranscribeResponse = response.json().await?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Synthesize speech for `text`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tts`] if the backend refuses, or a transport error
    pub async fn synthesize_speech(&self, text: &str, session_id: Option<&str>) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.url("tts"))
            .json(&TtsRequest { text, session_id })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("backend TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("backend returned no audio".to_string()));
        }
        Ok(audio.to_vec())
    }
}

async fn check_status(response: reqwest::Response, endpoint: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::warn!(endpoint, status = %status, body = %body, "backend error");
    Err(Error::from_status(status.as_u16(), body))
}

#[async_trait]
impl Transcriber for BackendClient {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        self.transcribe_wav(wav).await
    }
}

/// Speech synthesis through the backend, tagged with the current session
#[derive(Debug, Clone)]
pub struct BackendSynthesizer {
    client: BackendClient,
    session: SessionHandle,
}

impl BackendSynthesizer {
    #[must_use]
    pub const fn new(client: BackendClient, session: SessionHandle) -> Self {
        Self { client, session }
    }
}

#[async_trait]
impl Synthesizer for BackendSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let session_id = self.session.get();
        self.client
            .synthesize_speech(text, session_id.as_deref())
            .await
    }
}
