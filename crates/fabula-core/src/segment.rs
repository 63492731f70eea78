//! Dialogue attribution. Splits narration into narrator, attribution and
//! character-speech spans.
//!
//! Attribution is driven by a flat rule table. Every rule is a regex
//! template with `{name}`, `{open}`, `{close}`, `{body}`, `{say}` and
//! `{said}` placeholders and exactly one capture group around the spoken
//! words. Compiling the table for a cast yields an ordered list of
//! [`AttributionEntry`] values that are evaluated uniformly:
//!
//! ```text
//! for each character: every rule in ATTRIBUTION_RULES  (direct matches)
//! for each character: proximity scan                    (pronoun + quote)
//!   → pool candidates → resolve overlaps → fill narrator gaps
//! ```
//!
//! Supporting another language means appending rules, nothing else.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::types::{CharacterVoice, Segment, SegmentKind};

/// Bytes scanned forward from a name mention by the proximity pass.
pub const PROXIMITY_WINDOW: usize = 200;

const OPEN: &str = r#"["“„«]"#;
const CLOSE: &str = r#"["”“»]"#;
const BODY: &str = r#"[^"“”„«»]"#;
const QUOTE_CHARS: &[char] = &['"', '“', '”', '„', '«', '»'];

const SAY: &str =
    "says?|speaks?|calls?|shouts?|whispers?|replies?|responds?|asks?|sagt|spricht|ruft|flüstert|antwortet";
const SAID: &str =
    "said|replied|responded|called|shouted|whispered|asked|sagte|antwortete|rief|flüsterte";

/// Language family a rule was written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageFamily {
    /// Shape is language-neutral (punctuation driven).
    Any,
    English,
    German,
}

/// Canonical shape of an attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    QuoteVerbName,
    NameVerbQuote,
    NameColonQuote,
    QuoteCommaVerbName,
    QuoteNameVerb,
    CompoundVerb,
    VerbParticle,
    NarrativeVerb,
    SentenceMention,
    NameThenQuote,
    GestureThenQuote,
    DativeReply,
}

/// One row of the attribution table.
#[derive(Debug, Clone, Copy)]
pub struct AttributionRule {
    pub family: LanguageFamily,
    pub shape: Shape,
    template: &'static str,
}

impl AttributionRule {
    /// Expand the template for one character name.
    pub fn pattern_for(&self, name: &str) -> String {
        let escaped = regex::escape(name);
        let starts_word = name.chars().next().is_some_and(char::is_alphanumeric);
        let ends_word = name.chars().last().is_some_and(char::is_alphanumeric);
        let name_re = format!(
            "{}{}{}",
            if starts_word { r"\b" } else { "" },
            escaped,
            if ends_word { r"\b" } else { "" },
        );
        let body = self
            .template
            .replace("{name}", &name_re)
            .replace("{open}", OPEN)
            .replace("{close}", CLOSE)
            .replace("{body}", BODY)
            .replace("{said}", SAID)
            .replace("{say}", SAY);
        format!("(?i){body}")
    }
}

/// Ordered attribution table. Earlier rules win ties between equal spans.
pub const ATTRIBUTION_RULES: &[AttributionRule] = &[
    // "Run!" says Bert / "Lauf!" sagt Bert
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::QuoteVerbName,
        template: r"{open}({body}+){close}\s+(?:{say})\s+{name}(?:\b|\.)",
    },
    // Bert says "Run!" / Bert sagt: "Lauf!"
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::NameVerbQuote,
        template: r"{name}\s+(?:{say})(?:\s*[:,])?\s*{open}({body}+){close}",
    },
    // Bert: "Run!"
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::NameColonQuote,
        template: r"{name}:\s*{open}({body}+){close}",
    },
    // "Run," said Bert / "Lauf," sagte Bert
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::QuoteCommaVerbName,
        template: r"{open}({body}+),{close}\s+(?:{said})\s+{name}",
    },
    // "Run," Bert said.
    AttributionRule {
        family: LanguageFamily::English,
        shape: Shape::QuoteNameVerb,
        template: r"{open}({body}+){close}\s+{name}\s+(?:{said}|{say})\b[.!]?",
    },
    // Melk rief aus: "…" / Melk stimmte ihm zu: "…"
    AttributionRule {
        family: LanguageFamily::German,
        shape: Shape::CompoundVerb,
        template: r"{name}\s+(?:rief\s+aus|stimmte\s+zu|stimmte\s+ihm\s+zu|stimmte\s+ihr\s+zu|antwortete\s+ihm|antwortete\s+ihr|rief\s+zurück|rief\s+hinüber|murmelte\s+vor\s+sich\s+hin|flüsterte\s+leise|schrie\s+laut|sagte\s+leise|sagte\s+laut):\s*{open}({body}+){close}",
    },
    // Melk flüsterte leise "…" / Melk lachte "…"
    AttributionRule {
        family: LanguageFamily::German,
        shape: Shape::VerbParticle,
        template: r"{name}\s+(?:rief|schrie|flüsterte|murmelte|seufzte|lachte|kicherte|brummte|grinste|nickte|winkte)\s+(?:aus|zu|hinüber|zurück|leise|laut|vor\s+sich\s+hin)?:?\s*{open}({body}+){close}",
    },
    // Bert steps forward and speaks: "…"
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::NarrativeVerb,
        template: r"{name}[^.!?]*?(?:breaks?|speaks?|continues?|adds?|responds?|replies?|says?|calls?|shouts?|whispers?|bricht|spricht|sagt|antwortet|ruft|flüstert){body}*?{open}({body}+){close}",
    },
    // Any sentence that mentions the name and then quotes.
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::SentenceMention,
        template: r"[^.!?]*{name}[^.!?]*?{open}({body}+){close}",
    },
    // Name, then anything but a quote, then a quote.
    AttributionRule {
        family: LanguageFamily::Any,
        shape: Shape::NameThenQuote,
        template: r"{name}{body}*?{open}({body}+){close}",
    },
    // Bert sieht zur Lady Melk hinüber, … "…"
    AttributionRule {
        family: LanguageFamily::German,
        shape: Shape::GestureThenQuote,
        template: r"{name}{body}*?(?:sieht|blickt|wendet|dreht|nickt|schaut){body}*?{open}({body}+){close}",
    },
    // Melk erwiderte ihm kühl: "…"
    AttributionRule {
        family: LanguageFamily::German,
        shape: Shape::DativeReply,
        template: r"{name}\s+(?:stimmte\s+(?:ihm|ihr|ihnen)\s+zu|antwortete\s+(?:ihm|ihr|ihnen)|erwiderte\s+(?:ihm|ihr|ihnen)|entgegnete\s+(?:ihm|ihr|ihnen)){body}*:\s*{open}({body}+){close}",
    },
];

// Pronoun (or possessive) followed eventually by quoted speech.
static PRONOUN_SPEECH: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(&format!(
            r"(?i)\b(?:he|she|they|er|sie)\s+{BODY}*?{OPEN}({BODY}+){CLOSE}"
        ))
        .unwrap(),
        Regex::new(&format!(
            r"(?i)\b(?:his|her|their|sein|ihr)\s+{BODY}*?{OPEN}({BODY}+){CLOSE}"
        ))
        .unwrap(),
    ]
});

// ─── Candidates ───────────────────────────────────────────────────────────

/// A possible attribution found in the text, before overlap resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub start: usize,
    pub end: usize,
    /// Byte range of the quoted words (without the quotation marks).
    pub speech: Option<Range<usize>>,
    pub voice_id: String,
    pub character: String,
}

impl Candidate {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn overlaps(&self, other: &Candidate) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// How an entry finds candidate spans.
#[derive(Debug)]
pub enum Matcher {
    /// A compiled attribution rule.
    Direct(Regex),
    /// Name mention followed within [`PROXIMITY_WINDOW`] by pronoun + quote.
    Proximity { mention: Regex },
}

impl Matcher {
    fn spans(&self, text: &str) -> Vec<(usize, usize, Option<Range<usize>>)> {
        match self {
            Matcher::Direct(re) => re
                .captures_iter(text)
                .filter_map(|caps| {
                    let whole = caps.get(0)?;
                    let speech = caps.get(1).map(|m| m.range());
                    Some((whole.start(), whole.end(), speech))
                })
                .collect(),
            Matcher::Proximity { mention } => {
                let mut spans = Vec::new();
                for found in mention.find_iter(text) {
                    let window_start = found.start();
                    let window_end =
                        floor_char_boundary(text, found.end().saturating_add(PROXIMITY_WINDOW));
                    let window = &text[window_start..window_end];
                    for re in PRONOUN_SPEECH.iter() {
                        for caps in re.captures_iter(window) {
                            let Some(whole) = caps.get(0) else { continue };
                            let speech = caps.get(1).map(|m| {
                                window_start + m.start()..window_start + m.end()
                            });
                            spans.push((
                                window_start + whole.start(),
                                window_start + whole.end(),
                                speech,
                            ));
                        }
                    }
                }
                spans
            }
        }
    }
}

/// `(matcher, voice id, character name)`: one row of the compiled table.
#[derive(Debug)]
pub struct AttributionEntry {
    pub matcher: Matcher,
    pub voice_id: String,
    pub character: String,
}

// ─── Segmenter ────────────────────────────────────────────────────────────

/// Attribution engine compiled for one cast of characters.
#[derive(Debug, Default)]
pub struct Segmenter {
    entries: Vec<AttributionEntry>,
}

impl Segmenter {
    /// Compile the rule table for `characters` (`(name, voice id)` pairs).
    pub fn new(characters: &[(String, String)]) -> Self {
        let mut entries = Vec::with_capacity(characters.len() * (ATTRIBUTION_RULES.len() + 1));

        for (name, voice_id) in characters {
            for rule in ATTRIBUTION_RULES {
                match Regex::new(&rule.pattern_for(name)) {
                    Ok(re) => entries.push(AttributionEntry {
                        matcher: Matcher::Direct(re),
                        voice_id: voice_id.clone(),
                        character: name.clone(),
                    }),
                    Err(e) => warn!("segmenter: skipping {:?} rule for '{name}': {e}", rule.shape),
                }
            }
        }

        for (name, voice_id) in characters {
            let mention = format!(r"(?i)\b{}\b", regex::escape(name));
            match Regex::new(&mention) {
                Ok(mention) => entries.push(AttributionEntry {
                    matcher: Matcher::Proximity { mention },
                    voice_id: voice_id.clone(),
                    character: name.clone(),
                }),
                Err(e) => warn!("segmenter: skipping proximity scan for '{name}': {e}"),
            }
        }

        Self { entries }
    }

    pub fn entries(&self) -> &[AttributionEntry] {
        &self.entries
    }

    /// Every candidate from every entry, in table order.
    pub fn candidates(&self, text: &str) -> Vec<Candidate> {
        let mut out = Vec::new();
        for entry in &self.entries {
            for (start, end, speech) in entry.matcher.spans(text) {
                out.push(Candidate {
                    start,
                    end,
                    speech,
                    voice_id: entry.voice_id.clone(),
                    character: entry.character.clone(),
                });
            }
        }
        out
    }

    /// Split `text` into ordered, gap-free segments.
    pub fn segment(&self, text: &str) -> Vec<Segment> {
        let candidates: Vec<Candidate> = self
            .candidates(text)
            .into_iter()
            .filter(|c| {
                let quoted = c
                    .speech
                    .as_ref()
                    .is_some_and(|r| !text[r.clone()].trim().is_empty());
                if !quoted {
                    debug!(
                        "segmenter: discarding match without quoted speech for '{}' at {}..{}",
                        c.character, c.start, c.end
                    );
                }
                quoted
            })
            .collect();

        let total = candidates.len();
        let accepted = resolve_overlaps(candidates);
        debug!(
            "segmenter: {} candidates, {} accepted ({} bytes)",
            total,
            accepted.len(),
            text.len()
        );

        build_segments(text, accepted)
    }
}

/// Segment `text` for `characters` (`(name, voice id)` pairs).
pub fn segment(text: &str, characters: &[(String, String)]) -> Vec<Segment> {
    Segmenter::new(characters).segment(text)
}

/// Flatten a request's player → character map into segmenter input.
///
/// Names are lowercased, entries with an empty name or voice are dropped, and
/// the first occurrence of a name wins.
pub fn character_voice_map(map: &BTreeMap<String, CharacterVoice>) -> Vec<(String, String)> {
    let mut out: Vec<(String, String)> = Vec::new();
    for cv in map.values() {
        let name = cv.character_name.trim().to_lowercase();
        let voice = cv.voice_id.trim();
        if name.is_empty() || voice.is_empty() {
            continue;
        }
        if out.iter().any(|(n, _)| *n == name) {
            continue;
        }
        out.push((name, voice.to_string()));
    }
    out
}

/// Keep the earliest, longest candidates; drop anything that intersects an
/// already accepted span.
///
/// The sort is stable, so equal spans keep table order.
pub fn resolve_overlaps(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (c.start, Reverse(c.len())));

    let mut accepted: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if accepted.iter().all(|a| !a.overlaps(&candidate)) {
            accepted.push(candidate);
        }
    }
    accepted
}

// ─── Segment assembly ─────────────────────────────────────────────────────

/// Collects segments while keeping the union gap-free: whitespace-only filler
/// is absorbed into a neighbour instead of becoming its own segment.
struct SegmentBuilder<'a> {
    text: &'a str,
    segments: Vec<Segment>,
    pending_start: Option<usize>,
}

impl<'a> SegmentBuilder<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            segments: Vec::new(),
            pending_start: None,
        }
    }

    fn push_filler(&mut self, start: usize, end: usize, kind: SegmentKind) {
        let raw = &self.text[start..end];
        let spoken = match kind {
            SegmentKind::Attribution => {
                raw.trim_matches(|c: char| c.is_whitespace() || QUOTE_CHARS.contains(&c))
            }
            _ => raw.trim(),
        };

        if spoken.is_empty() {
            match self.segments.last_mut() {
                Some(last) => last.end = end,
                None => {
                    self.pending_start.get_or_insert(start);
                }
            }
            return;
        }

        self.push(Segment {
            start,
            end,
            kind,
            speech_text: spoken.to_string(),
            voice_id: None,
            character: None,
        });
    }

    fn push(&mut self, mut segment: Segment) {
        if let Some(start) = self.pending_start.take() {
            segment.start = start;
        }
        self.segments.push(segment);
    }

    fn finish(self) -> Vec<Segment> {
        if self.segments.is_empty() {
            return vec![Segment::narrator(0, self.text.len(), self.text.trim())];
        }
        self.segments
    }
}

fn build_segments(text: &str, accepted: Vec<Candidate>) -> Vec<Segment> {
    let mut builder = SegmentBuilder::new(text);
    let mut cursor = 0;

    for candidate in accepted {
        let Some(speech) = candidate.speech else { continue };

        if candidate.start > cursor {
            builder.push_filler(cursor, candidate.start, SegmentKind::Narrator);
        }

        let quote_start = opening_quote_start(text, speech.start).max(candidate.start);
        if quote_start > candidate.start {
            builder.push_filler(candidate.start, quote_start, SegmentKind::Attribution);
        }

        builder.push(Segment {
            start: quote_start,
            end: candidate.end,
            kind: SegmentKind::CharacterSpeech,
            speech_text: text[speech].to_string(),
            voice_id: Some(candidate.voice_id),
            character: Some(candidate.character),
        });
        cursor = candidate.end;
    }

    if cursor < text.len() {
        builder.push_filler(cursor, text.len(), SegmentKind::Narrator);
    }

    builder.finish()
}

/// Byte offset of the quotation mark that opens the speech at `body_start`.
fn opening_quote_start(text: &str, body_start: usize) -> usize {
    text[..body_start]
        .char_indices()
        .next_back()
        .map(|(i, _)| i)
        .unwrap_or(body_start)
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
