//! Content-addressed cache keys for synthesized artifacts.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::text_prep::normalize_text;
use crate::voice::NarratorVoice;

/// Hex characters of the SHA-256 digest kept in file names.
pub const DIGEST_LEN: usize = 32;

/// Which kind of artifact a key names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheScope {
    /// Whole narration, one voice.
    Single,
    /// Whole narration, several voices.
    MultiVoice,
    /// Placeholder written when real synthesis was not possible.
    Stub,
}

impl CacheScope {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheScope::Single => "single",
            CacheScope::MultiVoice => "multivoice",
            CacheScope::Stub => "stub",
        }
    }
}

impl fmt::Display for CacheScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub scope: CacheScope,
    pub language_tag: String,
    pub digest: String,
}

impl CacheKey {
    /// Key over normalized `text`, `language` and a voice `signature`.
    pub fn new(scope: CacheScope, text: &str, language: &str, signature: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize_text(text).as_bytes());
        hasher.update([0u8]);
        hasher.update(language.trim().to_lowercase().as_bytes());
        hasher.update([0u8]);
        hasher.update(signature.as_bytes());
        let hex: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        Self {
            scope,
            language_tag: language_tag(language),
            digest: hex[..DIGEST_LEN].to_string(),
        }
    }

    /// Same digest and language, different scope.
    pub fn with_scope(&self, scope: CacheScope) -> Self {
        Self {
            scope,
            ..self.clone()
        }
    }

    /// `voice_<scope>_<lang>_<digest>.<ext>`
    pub fn file_name(&self, extension: &str) -> String {
        format!(
            "voice_{}_{}_{}.{extension}",
            self.scope, self.language_tag, self.digest
        )
    }
}

/// Lowercased language with anything outside `[a-z0-9]` turned into `-`.
pub fn language_tag(language: &str) -> String {
    let tag: String = language
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    if tag.is_empty() { "unknown".into() } else { tag }
}

/// Signature for audio spoken entirely by one voice.
pub fn single_signature(voice_id: &str, model_id: &str) -> String {
    format!("{voice_id}|{model_id}")
}

/// Signature for multi-voice audio: the narrator plus every
/// `name=voice` mapping, sorted by name.
pub fn multivoice_signature(narrator: &NarratorVoice, characters: &[(String, String)]) -> String {
    let mut pairs: Vec<String> = characters
        .iter()
        .map(|(name, voice)| format!("{name}={voice}"))
        .collect();
    pairs.sort();
    format!(
        "{}|{}|{}",
        narrator.voice_id,
        narrator.model_id,
        pairs.join(",")
    )
}
