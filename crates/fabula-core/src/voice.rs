//! Voice resolution: which voice speaks each segment.
//!
//! The narrator voice is chosen once per session and then locked in a
//! [`SessionVoiceContext`]; cache keys depend on it staying put.

use std::sync::OnceLock;

use serde::Serialize;

use crate::types::{NarrationRequest, Segment, SegmentKind};

/// Model paired with explicitly chosen voices.
pub const MULTILINGUAL_MODEL: &str = "eleven_multilingual_v2";

/// Model required by the multi-speaker dialogue endpoint.
pub const DIALOGUE_MODEL: &str = "eleven_v3";

/// Default narrator voice and model for one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanguageVoice {
    pub language: &'static str,
    pub voice_id: &'static str,
    pub model_id: &'static str,
}

const fn lv(language: &'static str, voice_id: &'static str, model_id: &'static str) -> LanguageVoice {
    LanguageVoice {
        language,
        voice_id,
        model_id,
    }
}

/// Language defaults. The first entry is the fallback for unknown languages.
pub const LANGUAGE_DEFAULTS: &[LanguageVoice] = &[
    lv("English", "21m00Tcm4TlvDq8ikWAM", "eleven_monolingual_v1"),
    lv("Spanish", "VR6AewLTigWG4xSOukaG", MULTILINGUAL_MODEL),
    lv("French", "ThT5KcBeYPX3keUQqHPh", MULTILINGUAL_MODEL),
    lv("German", "pFZP5JQG7iQjIQuC4Bku", MULTILINGUAL_MODEL),
    lv("Italian", "XB0fDUnXU5q5KVOYJpqr", MULTILINGUAL_MODEL),
    lv("Portuguese", "TxGEqnHWrfWFTfGW9XjX", MULTILINGUAL_MODEL),
    lv("Polish", "JBFqnCBsd6RMkjVDRZzb", MULTILINGUAL_MODEL),
    lv("Turkish", "PNInz6obpgDQGcFmaJgB", MULTILINGUAL_MODEL),
    lv("Russian", "yoZ06aMxZJJ28mfd3POQ", MULTILINGUAL_MODEL),
    lv("Dutch", "flq6f7yk4E4fJM5XTYuZ", MULTILINGUAL_MODEL),
    lv("Japanese", "pcNInz6obpgDQGcFmaJgB", MULTILINGUAL_MODEL),
    lv("Chinese", "AZnzlk1XvdvUeBnXmlld", MULTILINGUAL_MODEL),
    lv("Korean", "yoZ06aMxZJJ28mfd3POQ", MULTILINGUAL_MODEL),
    lv("Hindi", "pFZP5JQG7iQjIQuC4Bku", MULTILINGUAL_MODEL),
    lv("Arabic", "ThT5KcBeYPX3keUQqHPh", MULTILINGUAL_MODEL),
];

/// Default voice for `language` (case-insensitive), English when unknown.
pub fn language_default(language: &str) -> &'static LanguageVoice {
    let language = language.trim();
    LANGUAGE_DEFAULTS
        .iter()
        .find(|lv| lv.language.eq_ignore_ascii_case(language))
        .unwrap_or(&LANGUAGE_DEFAULTS[0])
}

/// The language a request is synthesized in: the session lock if present.
pub fn effective_language(request: &NarrationRequest) -> &str {
    request
        .session_language
        .as_deref()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .unwrap_or(request.language.as_str())
}

/// Narrator voice together with the model it is synthesized with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NarratorVoice {
    pub voice_id: String,
    pub model_id: String,
}

/// Per-session voice state. The first resolved narrator voice is kept for
/// the lifetime of the session.
#[derive(Debug, Default)]
pub struct SessionVoiceContext {
    narrator: OnceLock<NarratorVoice>,
}

impl SessionVoiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session whose narrator is fixed up front.
    pub fn locked(narrator: NarratorVoice) -> Self {
        let ctx = Self::default();
        let _ = ctx.narrator.set(narrator);
        ctx
    }

    pub fn narrator(&self) -> Option<&NarratorVoice> {
        self.narrator.get()
    }
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Narrator voice for `request`, locked into `session` on first use.
///
/// Priority: narrator override > single-voice override > language default.
pub fn resolve_narrator_voice(
    request: &NarrationRequest,
    session: &SessionVoiceContext,
) -> NarratorVoice {
    session
        .narrator
        .get_or_init(|| {
            let explicit = non_blank(request.narrator_voice_id.as_ref())
                .or_else(|| non_blank(request.voice_id.as_ref()));
            match explicit {
                Some(voice_id) => NarratorVoice {
                    voice_id: voice_id.to_string(),
                    model_id: MULTILINGUAL_MODEL.to_string(),
                },
                None => {
                    let default = language_default(effective_language(request));
                    NarratorVoice {
                        voice_id: default.voice_id.to_string(),
                        model_id: default.model_id.to_string(),
                    }
                }
            }
        })
        .clone()
}

/// Voice for one segment: the speaker's mapped voice, else the narrator's.
pub fn resolve_segment_voice(
    segment: &Segment,
    characters: &[(String, String)],
    narrator_voice_id: &str,
) -> String {
    if segment.kind != SegmentKind::CharacterSpeech {
        return narrator_voice_id.to_string();
    }
    segment
        .character
        .as_deref()
        .and_then(|who| {
            characters
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(who))
                .map(|(_, voice)| voice.clone())
        })
        .or_else(|| segment.voice_id.clone())
        .unwrap_or_else(|| narrator_voice_id.to_string())
}

/// Fill in `voice_id` on every segment.
pub fn annotate(segments: &mut [Segment], characters: &[(String, String)], narrator_voice_id: &str) {
    for segment in segments.iter_mut() {
        segment.voice_id = Some(resolve_segment_voice(segment, characters, narrator_voice_id));
    }
}
