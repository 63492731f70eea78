//! Shared types for the fabula narration pipeline.
//!
//! These types are used across fabula-lib, fabula-cli, and the session layer
//! that feeds narrations in. Keeping them in fabula-core means consumers can
//! depend on types without pulling in tokio, reqwest, or axum.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─── Narration request ─────────────────────────────────────────────────────

/// Language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "English";

/// Voice assignment for one player's character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterVoice {
    pub character_name: String,
    pub voice_id: String,
}

/// One narration to synthesize.
///
/// `character_voice_map` is keyed by player name. It is a `BTreeMap` so that
/// iteration order, and therefore attribution pattern order, is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrationRequest {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub character_voice_map: BTreeMap<String, CharacterVoice>,
    /// Per-call narrator override.
    #[serde(default)]
    pub narrator_voice_id: Option<String>,
    /// Single-voice override, used when no narrator override is given.
    #[serde(default)]
    pub voice_id: Option<String>,
    /// Locked session language. Always wins over `language`.
    #[serde(default)]
    pub session_language: Option<String>,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl Default for NarrationRequest {
    fn default() -> Self {
        Self {
            text: String::new(),
            language: default_language(),
            character_voice_map: BTreeMap::new(),
            narrator_voice_id: None,
            voice_id: None,
            session_language: None,
        }
    }
}

impl NarrationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Assign `voice_id` to `character_name`, played by `player`.
    pub fn with_character(
        mut self,
        player: impl Into<String>,
        character_name: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        self.character_voice_map.insert(
            player.into(),
            CharacterVoice {
                character_name: character_name.into(),
                voice_id: voice_id.into(),
            },
        );
        self
    }
}

// ─── Segments ──────────────────────────────────────────────────────────────

/// What a span of narration is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    Narrator,
    Attribution,
    CharacterSpeech,
}

/// A span of the input text with the words to speak for it.
///
/// `start..end` are byte offsets into the original text. For
/// [`SegmentKind::CharacterSpeech`] `speech_text` holds only the quoted
/// content; for the other kinds it is the trimmed span text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    pub kind: SegmentKind,
    pub speech_text: String,
    pub voice_id: Option<String>,
    pub character: Option<String>,
}

impl Segment {
    pub fn narrator(start: usize, end: usize, speech_text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            kind: SegmentKind::Narrator,
            speech_text: speech_text.into(),
            voice_id: None,
            character: None,
        }
    }

    pub fn is_speech(&self) -> bool {
        self.kind == SegmentKind::CharacterSpeech
    }
}

// ─── Synthesis results ─────────────────────────────────────────────────────

/// Which branch of the synthesis cascade produced an artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisStrategy {
    /// One call covering the whole narration.
    Unified,
    /// Per-segment calls stitched together.
    Segmented,
    /// Deterministic placeholder.
    Stub,
    /// Served from the artifact cache.
    Cached,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynthesisOutcome {
    pub path: PathBuf,
    pub strategy: SynthesisStrategy,
}

// ─── Audio format ──────────────────────────────────────────────────────────

/// Container format of cached artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    /// 24 kHz mono 16-bit PCM wrapped in a RIFF header.
    Wav,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }

    /// `output_format` query value understood by the synthesis API.
    pub fn output_format(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3_44100_128",
            AudioFormat::Wav => "pcm_24000",
        }
    }

    pub fn accept(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "audio/mpeg",
            AudioFormat::Wav => "audio/pcm",
        }
    }
}

impl std::str::FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp3" => Ok(AudioFormat::Mp3),
            "wav" => Ok(AudioFormat::Wav),
            other => Err(format!("unknown audio format '{other}'; expected mp3 or wav")),
        }
    }
}

// ─── Voice catalog ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceCategory {
    Heroic,
    Character,
    Quirky,
    Mystical,
    Villain,
}

/// One selectable voice identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceDescriptor {
    pub id: &'static str,
    pub name: &'static str,
    pub gender: Gender,
    pub category: VoiceCategory,
    pub description: &'static str,
}

// ─── Engine configuration ──────────────────────────────────────────────────

/// Narration engine configuration.
#[derive(Debug, Clone)]
pub struct NarrationConfig {
    pub cache_dir: PathBuf,
    /// Synthesis credential. `None` routes every narration to the stub.
    pub api_key: Option<String>,
    pub api_base_url: String,
    pub format: AudioFormat,
    pub single_timeout: Duration,
    pub dialogue_timeout: Duration,
    pub segment_timeout: Duration,
    /// Maximum in-flight per-segment calls in segmented mode.
    pub segment_concurrency: usize,
    pub max_cache_entries: usize,
    pub ffmpeg_bin: String,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("static/audio"),
            api_key: None,
            api_base_url: "https://api.elevenlabs.io".into(),
            format: AudioFormat::Mp3,
            single_timeout: Duration::from_secs(30),
            dialogue_timeout: Duration::from_secs(90),
            segment_timeout: Duration::from_secs(60),
            segment_concurrency: 4,
            max_cache_entries: 100,
            ffmpeg_bin: "ffmpeg".into(),
        }
    }
}
