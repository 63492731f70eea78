//! Speech synthesis provider seam and the ElevenLabs HTTP client.
//!
//! The pipeline talks to a [`Synthesizer`]; tests swap in fakes.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use tracing::{debug, error};

use fabula_core::artifact::pcm_to_wav;
use fabula_core::types::{AudioFormat, NarrationConfig};
use fabula_core::voice::DIALOGUE_MODEL;

use crate::error::SynthesisError;

/// Voice settings sent with single-voice requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceSettings {
    pub stability: f32,
    pub similarity_boost: f32,
    pub style: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_speaker_boost: Option<bool>,
}

impl VoiceSettings {
    /// Whole-narration calls. Lower stability for more expression.
    pub const NARRATION: VoiceSettings = VoiceSettings {
        stability: 0.4,
        similarity_boost: 0.8,
        style: 0.3,
        use_speaker_boost: Some(true),
    };

    /// Per-segment calls in segmented mode.
    pub const SEGMENT: VoiceSettings = VoiceSettings {
        stability: 0.5,
        similarity_boost: 0.8,
        style: 0.3,
        use_speaker_boost: Some(true),
    };

    /// Settings block of the multi-speaker dialogue call.
    pub const DIALOGUE: VoiceSettings = VoiceSettings {
        stability: 0.5,
        similarity_boost: 0.8,
        style: 0.3,
        use_speaker_boost: None,
    };
}

/// One speaker turn of a dialogue request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DialogueLine {
    pub text: String,
    pub voice_id: String,
}

/// A speech synthesis provider. Implementations return finished artifact
/// bytes in the format they were configured with.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` with one voice.
    async fn speak(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
        settings: &VoiceSettings,
    ) -> Result<Vec<u8>, SynthesisError>;

    /// Synthesize ordered speaker turns in one call.
    async fn dialogue(&self, lines: &[DialogueLine]) -> Result<Vec<u8>, SynthesisError>;
}

/// HTTP client for the ElevenLabs text-to-speech API.
#[derive(Debug, Clone)]
pub struct ElevenLabsClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    format: AudioFormat,
}

impl ElevenLabsClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, format: AudioFormat) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            format,
        }
    }

    /// Client for `config`. Fails with [`SynthesisError::NoCredential`] when
    /// the API key is missing or blank.
    pub fn from_config(config: &NarrationConfig) -> Result<Self, SynthesisError> {
        let key = config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(SynthesisError::NoCredential)?;
        Ok(Self::new(key, &config.api_base_url, config.format))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .query(&[("output_format", self.format.output_format())])
            .header("xi-api-key", &self.api_key)
            .header("Accept", self.format.accept())
    }

    fn speak_request(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
        settings: &VoiceSettings,
    ) -> reqwest::RequestBuilder {
        self.post(&format!("/v1/text-to-speech/{voice_id}"))
            .json(&serde_json::json!({
                "text": text,
                "model_id": model_id,
                "voice_settings": settings,
            }))
    }

    fn dialogue_request(&self, lines: &[DialogueLine]) -> reqwest::RequestBuilder {
        self.post("/v1/text-to-dialogue/convert")
            .json(&serde_json::json!({
                "inputs": lines,
                "model_id": DIALOGUE_MODEL,
                "settings": VoiceSettings::DIALOGUE,
            }))
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<Vec<u8>, SynthesisError> {
        let resp = request.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!("{what}: provider error {status}: {body}");
            return Err(classify(status, what, &body));
        }
        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(SynthesisError::Transient(format!("{what}: empty response body")));
        }
        debug!("{what}: received {} bytes", bytes.len());
        Ok(match self.format {
            AudioFormat::Mp3 => bytes.to_vec(),
            AudioFormat::Wav => pcm_to_wav(&bytes),
        })
    }
}

/// Map a non-success status to an error. A 404 means the endpoint does not
/// exist for this account.
fn classify(status: StatusCode, what: &str, body: &str) -> SynthesisError {
    if status == StatusCode::NOT_FOUND {
        SynthesisError::Unsupported(format!("{what} ({status})"))
    } else {
        SynthesisError::Transient(format!("{what}: {status}: {body}"))
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsClient {
    async fn speak(
        &self,
        text: &str,
        voice_id: &str,
        model_id: &str,
        settings: &VoiceSettings,
    ) -> Result<Vec<u8>, SynthesisError> {
        debug!("speak: {} chars with voice {voice_id} ({model_id})", text.len());
        self.send(self.speak_request(text, voice_id, model_id, settings), "text-to-speech")
            .await
    }

    async fn dialogue(&self, lines: &[DialogueLine]) -> Result<Vec<u8>, SynthesisError> {
        debug!("dialogue: {} turns", lines.len());
        self.send(self.dialogue_request(lines), "text-to-dialogue")
            .await
    }
}
