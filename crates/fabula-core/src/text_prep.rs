//! Text preparation for synthesis: whitespace normalization and prosody markup.
//!
//! Pure functions, no I/O. Enrichment only changes what the synthesizer
//! hears; segmentation and cache keys always work on the plain text.

use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Inputs shorter than this (after trimming) are sent as-is.
pub const MIN_ENRICH_LEN: usize = 10;

/// Texts longer than this get breathing breaks between sentences.
pub const BREATH_THRESHOLD: usize = 200;

const EMPHASIS_WORDS: &[&str] = &[
    "suddenly",
    "immediately",
    "warning",
    "danger",
    "attack",
    "magic",
    "treasure",
    "ancient",
    "mysterious",
    "powerful",
    "legendary",
];

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static RE_QUOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(["“])([^"“”]*)(["”])"#).unwrap());
static RE_SENTENCE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([.!?])\s+([A-Z])").unwrap());
static RE_CLAUSE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([,;:])\s+").unwrap());
static RE_EMPHASIS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)\b({})\b", EMPHASIS_WORDS.join("|"))).unwrap()
});
static RE_ACTIONS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"fights?|attacks?|strikes?|slashes?", r#"rate="fast" pitch="+1st""#),
        (r"whispers?|murmurs?", r#"volume="soft""#),
        (r"shouts?|yells?|screams?", r#"volume="loud" pitch="+2st""#),
        (r"creeps?|sneaks?|tiptoes?", r#"rate="slow" volume="soft""#),
    ]
    .into_iter()
    .map(|(words, attrs)| (Regex::new(&format!(r"(?i)\b({words})\b")).unwrap(), attrs))
    .collect()
});

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_text(text: &str) -> String {
    RE_WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Prosody attributes for a quote, chosen by how it ends.
fn quote_prosody(inner: &str) -> Option<&'static str> {
    let inner = inner.trim_end();
    if inner.ends_with("...") || inner.ends_with('…') {
        Some(r#"rate="slow""#)
    } else if inner.ends_with('!') {
        Some(r#"rate="fast" pitch="+2st""#)
    } else if inner.ends_with('?') {
        Some(r#"pitch="+1st""#)
    } else if inner.ends_with('.') {
        Some(r#"rate="medium""#)
    } else {
        None
    }
}

/// Add SSML-style markup that gives narration some expression.
///
/// Quotes are wrapped first, in one pass, so markup attributes added later
/// are never mistaken for dialogue.
pub fn enrich_for_speech(text: &str) -> String {
    if text.trim().len() < MIN_ENRICH_LEN {
        return text.to_string();
    }

    let mut c = RE_QUOTE
        .replace_all(text, |caps: &Captures| match quote_prosody(&caps[2]) {
            Some(attrs) => format!("{}<prosody {attrs}>{}</prosody>{}", &caps[1], &caps[2], &caps[3]),
            None => caps[0].to_string(),
        })
        .into_owned();

    c = RE_SENTENCE_BREAK
        .replace_all(&c, r#"$1 <break time="0.5s"/> $2"#)
        .into_owned();
    c = RE_CLAUSE_BREAK
        .replace_all(&c, r#"$1 <break time="0.3s"/> "#)
        .into_owned();
    c = RE_EMPHASIS
        .replace_all(&c, r#"<emphasis level="moderate">$1</emphasis>"#)
        .into_owned();
    for (re, attrs) in RE_ACTIONS.iter() {
        c = re
            .replace_all(&c, |caps: &Captures| {
                format!("<prosody {attrs}>{}</prosody>", &caps[1])
            })
            .into_owned();
    }

    if c.len() > BREATH_THRESHOLD {
        let mut sentences: Vec<String> = c.split(". ").map(str::to_string).collect();
        if sentences.len() > 3 {
            for sentence in sentences.iter_mut().skip(2).step_by(3) {
                sentence.insert_str(0, r#"<break time="0.8s"/> "#);
            }
            c = sentences.join(". ");
        }
    }

    c
}
