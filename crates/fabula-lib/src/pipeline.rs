//! Narration pipeline: text in, cached audio artifact out.
//!
//! Each request walks a fixed cascade and stops at the first branch that
//! yields an artifact:
//!
//! 1. cache hit
//! 2. stub, when no synthesizer is configured
//! 3. unified multi-speaker call (several voices) or one single-voice call
//! 4. segmented synthesis + stitching (several voices only)
//! 5. stub
//!
//! Failures along the way are logged and consumed; `synthesize` itself never
//! errors.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use fabula_core::artifact::placeholder;
use fabula_core::cache_key::{CacheKey, CacheScope, multivoice_signature, single_signature};
use fabula_core::catalog;
use fabula_core::segment::{Segmenter, character_voice_map};
use fabula_core::text_prep::enrich_for_speech;
use fabula_core::types::{
    NarrationConfig, NarrationRequest, Segment, SynthesisOutcome, SynthesisStrategy,
    VoiceDescriptor,
};
use fabula_core::voice::{
    MULTILINGUAL_MODEL, NarratorVoice, SessionVoiceContext, annotate, effective_language,
    resolve_narrator_voice,
};

use crate::cache::CacheStore;
use crate::error::{CacheError, StitchError, SynthesisError};
use crate::stitch::{SegmentScratch, Stitcher};
use crate::synth::{DialogueLine, ElevenLabsClient, Synthesizer, VoiceSettings};

/// Why one cascade branch gave up.
#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Stitch(#[from] StitchError),
    #[error("segment scratch: {0}")]
    Scratch(#[from] std::io::Error),
    #[error("no segment produced audio")]
    NoSegments,
}

/// Everything decided about a request before any audio is produced.
#[derive(Debug, Clone)]
pub struct NarrationPlan {
    /// Request text as given.
    pub text: String,
    pub language: String,
    pub narrator: NarratorVoice,
    pub characters: Vec<(String, String)>,
    pub segments: Vec<Segment>,
    /// Distinct voices among segments that have something to say.
    pub voices: BTreeSet<String>,
    pub key: CacheKey,
}

impl NarrationPlan {
    pub fn is_multi_voice(&self) -> bool {
        self.voices.len() > 1
    }

    fn spoken(&self) -> impl Iterator<Item = &Segment> {
        self.segments.iter().filter(|s| !s.speech_text.is_empty())
    }

    fn voice_of<'a>(&'a self, segment: &'a Segment) -> &'a str {
        segment.voice_id.as_deref().unwrap_or(&self.narrator.voice_id)
    }

    /// Model paired with `voice_id`.
    pub fn model_for(&self, voice_id: &str) -> &str {
        model_for(&self.narrator, voice_id)
    }

    /// The one voice of a single-voice plan.
    fn sole_voice(&self) -> &str {
        self.voices
            .iter()
            .next()
            .map(String::as_str)
            .unwrap_or(&self.narrator.voice_id)
    }

    /// Consecutive same-voice segments merged into dialogue turns.
    fn dialogue_lines(&self) -> Vec<DialogueLine> {
        let mut lines: Vec<DialogueLine> = Vec::new();
        for segment in self.spoken() {
            let voice = self.voice_of(segment);
            match lines.last_mut() {
                Some(last) if last.voice_id == voice => {
                    last.text.push(' ');
                    last.text.push_str(&segment.speech_text);
                }
                _ => lines.push(DialogueLine {
                    text: segment.speech_text.clone(),
                    voice_id: voice.to_string(),
                }),
            }
        }
        for line in &mut lines {
            line.text = enrich_for_speech(&line.text);
        }
        lines
    }
}

/// The narrator keeps its own model; character voices use the multilingual one.
fn model_for<'a>(narrator: &'a NarratorVoice, voice_id: &str) -> &'a str {
    if voice_id == narrator.voice_id {
        &narrator.model_id
    } else {
        MULTILINGUAL_MODEL
    }
}

/// One per-segment synthesis job in segmented mode.
#[derive(Debug)]
struct SegmentJob {
    key: CacheKey,
    text: String,
    voice_id: String,
    model_id: String,
}

async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, SynthesisError>>,
) -> Result<T, SynthesisError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| SynthesisError::Timeout(limit))?
}

pub struct NarrationPipeline {
    config: NarrationConfig,
    cache: CacheStore,
    synth: Option<Arc<dyn Synthesizer>>,
    stitcher: Stitcher,
}

impl NarrationPipeline {
    /// Pipeline backed by ElevenLabs when `config` carries a credential,
    /// stub-only otherwise.
    pub async fn new(config: NarrationConfig) -> Result<Self, CacheError> {
        let synth = match ElevenLabsClient::from_config(&config) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn Synthesizer>),
            Err(e) => {
                warn!("pipeline: {e}, narrations will be placeholders");
                None
            }
        };
        Self::with_synthesizer(config, synth).await
    }

    pub async fn with_synthesizer(
        config: NarrationConfig,
        synth: Option<Arc<dyn Synthesizer>>,
    ) -> Result<Self, CacheError> {
        let cache = CacheStore::open(&config.cache_dir, config.format).await?;
        let stitcher = Stitcher::new(&config.ffmpeg_bin);
        Ok(Self {
            config,
            cache,
            synth,
            stitcher,
        })
    }

    pub fn config(&self) -> &NarrationConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn list_voices(&self) -> &'static [VoiceDescriptor] {
        catalog::list_voices()
    }

    /// Trim the cache to the configured number of entries.
    pub async fn evict_cache(&self) -> Result<usize, CacheError> {
        self.cache.evict(self.config.max_cache_entries).await
    }

    /// Segment, resolve voices and derive the cache key. `None` for blank text.
    pub fn plan(&self, request: &NarrationRequest, session: &SessionVoiceContext) -> Option<NarrationPlan> {
        if request.text.trim().is_empty() {
            return None;
        }

        let language = effective_language(request).to_string();
        let narrator = resolve_narrator_voice(request, session);
        let characters = character_voice_map(&request.character_voice_map);

        let mut segments = Segmenter::new(&characters).segment(&request.text);
        annotate(&mut segments, &characters, &narrator.voice_id);

        let voices: BTreeSet<String> = segments
            .iter()
            .filter(|s| !s.speech_text.is_empty())
            .filter_map(|s| s.voice_id.clone())
            .collect();

        let key = if voices.len() > 1 {
            CacheKey::new(
                CacheScope::MultiVoice,
                &request.text,
                &language,
                &multivoice_signature(&narrator, &characters),
            )
        } else {
            let voice = voices.iter().next().unwrap_or(&narrator.voice_id);
            CacheKey::new(
                CacheScope::Single,
                &request.text,
                &language,
                &single_signature(voice, model_for(&narrator, voice)),
            )
        };

        Some(NarrationPlan {
            text: request.text.clone(),
            language,
            narrator,
            characters,
            segments,
            voices,
            key,
        })
    }

    /// Produce an audio artifact for `request`. `None` only for blank text or
    /// when not even a placeholder could be written.
    pub async fn synthesize(
        &self,
        request: &NarrationRequest,
        session: &SessionVoiceContext,
    ) -> Option<SynthesisOutcome> {
        let plan = self.plan(request, session)?;
        debug!(
            "pipeline: {} segments, {} voice(s), key {}",
            plan.segments.len(),
            plan.voices.len(),
            plan.key.digest
        );

        if let Some(path) = self.cache.lookup(&plan.key).await {
            info!("pipeline: cache hit {}", path.display());
            return Some(SynthesisOutcome {
                path,
                strategy: SynthesisStrategy::Cached,
            });
        }

        let Some(synth) = self.synth.as_deref() else {
            return self.stub(&plan).await;
        };

        if plan.is_multi_voice() {
            match self.unified(synth, &plan).await {
                Ok(path) => return Some(outcome(path, SynthesisStrategy::Unified)),
                Err(e) => warn!("pipeline: unified synthesis failed ({e}), trying segments"),
            }
            match self.segmented(synth, &plan).await {
                Ok(path) => return Some(outcome(path, SynthesisStrategy::Segmented)),
                Err(e) => warn!("pipeline: segmented synthesis failed ({e})"),
            }
        } else {
            match self.single(synth, &plan).await {
                Ok(path) => return Some(outcome(path, SynthesisStrategy::Unified)),
                Err(e) => warn!("pipeline: single-voice synthesis failed ({e})"),
            }
        }

        self.stub(&plan).await
    }

    async fn single(&self, synth: &dyn Synthesizer, plan: &NarrationPlan) -> Result<PathBuf, StepError> {
        let voice = plan.sole_voice();
        let text = enrich_for_speech(&plan.text);
        let audio = bounded(
            self.config.single_timeout,
            synth.speak(&text, voice, plan.model_for(voice), &VoiceSettings::NARRATION),
        )
        .await?;
        Ok(self.cache.write(&plan.key, &audio).await?)
    }

    async fn unified(&self, synth: &dyn Synthesizer, plan: &NarrationPlan) -> Result<PathBuf, StepError> {
        let lines = plan.dialogue_lines();
        let audio = bounded(self.config.dialogue_timeout, synth.dialogue(&lines)).await?;
        Ok(self.cache.write(&plan.key, &audio).await?)
    }

    async fn segmented(&self, synth: &dyn Synthesizer, plan: &NarrationPlan) -> Result<PathBuf, StepError> {
        // Identical (text, voice) pairs within one request are synthesized once.
        let mut jobs: Vec<SegmentJob> = Vec::new();
        let mut order: Vec<usize> = Vec::new();
        let mut seen: HashMap<CacheKey, usize> = HashMap::new();
        for segment in plan.spoken() {
            let voice_id = plan.voice_of(segment);
            let model_id = plan.model_for(voice_id);
            let key = CacheKey::new(
                CacheScope::Single,
                &segment.speech_text,
                &plan.language,
                &single_signature(voice_id, model_id),
            );
            let index = *seen.entry(key.clone()).or_insert_with(|| {
                jobs.push(SegmentJob {
                    key,
                    text: segment.speech_text.clone(),
                    voice_id: voice_id.to_string(),
                    model_id: model_id.to_string(),
                });
                jobs.len() - 1
            });
            order.push(index);
        }

        let scratch = SegmentScratch::create(self.cache.dir()).await?;
        let scratch = &scratch;
        let results: Vec<Option<PathBuf>> = futures_util::stream::iter(jobs.into_iter().enumerate())
            .map(move |(i, job)| self.segment_artifact(synth, job, i, scratch))
            .buffered(self.config.segment_concurrency.max(1))
            .collect()
            .await;

        let parts: Vec<PathBuf> = order.iter().filter_map(|&i| results[i].clone()).collect();
        if parts.is_empty() {
            return Err(StepError::NoSegments);
        }
        if parts.len() < order.len() {
            warn!(
                "pipeline: {} of {} segments missing, stitching the rest",
                order.len() - parts.len(),
                order.len()
            );
        }

        let staging = self.cache.staging_path(&plan.key);
        match self.stitcher.stitch(&parts, &staging).await {
            Ok(mode) => debug!("pipeline: stitched {} parts ({mode:?})", parts.len()),
            Err(e) => {
                let _ = tokio::fs::remove_file(&staging).await;
                return Err(e.into());
            }
        }
        Ok(self.cache.commit(&staging, &plan.key).await?)
    }

    /// Audio for one segment: an existing single-voice cache entry, or a
    /// fresh file in `scratch`.
    async fn segment_artifact(
        &self,
        synth: &dyn Synthesizer,
        job: SegmentJob,
        index: usize,
        scratch: &SegmentScratch,
    ) -> Option<PathBuf> {
        if let Some(path) = self.cache.lookup(&job.key).await {
            debug!("pipeline: segment {index} reused {}", path.display());
            return Some(path);
        }

        let text = enrich_for_speech(&job.text);
        let audio = match bounded(
            self.config.segment_timeout,
            synth.speak(&text, &job.voice_id, &job.model_id, &VoiceSettings::SEGMENT),
        )
        .await
        {
            Ok(audio) => audio,
            Err(e) => {
                warn!("pipeline: segment {index} failed: {e}");
                return None;
            }
        };

        let path = scratch.part_path(index, self.cache.format().extension());
        match tokio::fs::write(&path, &audio).await {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("pipeline: segment {index} write failed: {e}");
                None
            }
        }
    }

    /// Write (or reuse) the placeholder artifact for `plan`.
    async fn stub(&self, plan: &NarrationPlan) -> Option<SynthesisOutcome> {
        let key = plan.key.with_scope(CacheScope::Stub);
        if let Some(path) = self.cache.lookup(&key).await {
            return Some(outcome(path, SynthesisStrategy::Stub));
        }
        match self.cache.write(&key, &placeholder(self.cache.format())).await {
            Ok(path) => {
                info!("pipeline: wrote placeholder {}", path.display());
                Some(outcome(path, SynthesisStrategy::Stub))
            }
            Err(e) => {
                error!("pipeline: could not write placeholder: {e}");
                None
            }
        }
    }
}

fn outcome(path: PathBuf, strategy: SynthesisStrategy) -> SynthesisOutcome {
    SynthesisOutcome { path, strategy }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fabula_core::types::AudioFormat;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Copy, PartialEq)]
    enum Dialogue {
        Ok,
        Unsupported,
        Hang,
    }

    struct FakeSynth {
        dialogue: Dialogue,
        speak_ok: bool,
        speak_calls: AtomicUsize,
        dialogue_calls: AtomicUsize,
        spoken: Mutex<Vec<(String, String)>>,
        finished: Mutex<Vec<String>>,
        turns: Mutex<Vec<DialogueLine>>,
        delay: Option<fn(&str) -> Duration>,
    }

    impl FakeSynth {
        fn new(dialogue: Dialogue, speak_ok: bool) -> Arc<Self> {
            Arc::new(Self::build(dialogue, speak_ok, None))
        }

        /// `speak` sleeps for `delay(text)` before answering.
        fn slow(dialogue: Dialogue, delay: fn(&str) -> Duration) -> Arc<Self> {
            Arc::new(Self::build(dialogue, true, Some(delay)))
        }

        fn build(dialogue: Dialogue, speak_ok: bool, delay: Option<fn(&str) -> Duration>) -> Self {
            Self {
                dialogue,
                speak_ok,
                speak_calls: AtomicUsize::new(0),
                dialogue_calls: AtomicUsize::new(0),
                spoken: Mutex::new(Vec::new()),
                finished: Mutex::new(Vec::new()),
                turns: Mutex::new(Vec::new()),
                delay,
            }
        }

        fn speaks(&self) -> usize {
            self.speak_calls.load(Ordering::SeqCst)
        }

        fn dialogues(&self) -> usize {
            self.dialogue_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Synthesizer for FakeSynth {
        async fn speak(
            &self,
            text: &str,
            voice_id: &str,
            _model_id: &str,
            _settings: &VoiceSettings,
        ) -> Result<Vec<u8>, SynthesisError> {
            self.speak_calls.fetch_add(1, Ordering::SeqCst);
            self.spoken
                .lock()
                .unwrap()
                .push((voice_id.to_string(), text.to_string()));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay(text)).await;
            }
            self.finished.lock().unwrap().push(text.to_string());
            if self.speak_ok {
                Ok(format!("{voice_id}:{text}").into_bytes())
            } else {
                Err(SynthesisError::Transient("503".into()))
            }
        }

        async fn dialogue(&self, lines: &[DialogueLine]) -> Result<Vec<u8>, SynthesisError> {
            self.dialogue_calls.fetch_add(1, Ordering::SeqCst);
            self.turns.lock().unwrap().extend_from_slice(lines);
            match self.dialogue {
                Dialogue::Ok => Ok(b"dialogue".to_vec()),
                Dialogue::Unsupported => Err(SynthesisError::Unsupported("404".into())),
                Dialogue::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(b"late".to_vec())
                }
            }
        }
    }

    fn config(dir: &Path) -> NarrationConfig {
        NarrationConfig {
            cache_dir: dir.to_path_buf(),
            ffmpeg_bin: "/nonexistent/ffmpeg-binary".into(),
            dialogue_timeout: Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn pipeline(dir: &Path, synth: Option<Arc<FakeSynth>>) -> NarrationPipeline {
        let synth = synth.map(|s| s as Arc<dyn Synthesizer>);
        NarrationPipeline::with_synthesizer(config(dir), synth).await.unwrap()
    }

    fn two_voice_request() -> NarrationRequest {
        NarrationRequest::new(r#"Bert says "Run now!" Then the room fell silent."#)
            .with_character("anna", "Bert", "voiceA")
    }

    fn file_name(outcome: &SynthesisOutcome) -> String {
        outcome.path.file_name().unwrap().to_string_lossy().into_owned()
    }

    // ── plan ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn plan_picks_scope_by_voice_count() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), None).await;

        let plan = p.plan(&two_voice_request(), &SessionVoiceContext::new()).unwrap();
        assert!(plan.is_multi_voice());
        assert_eq!(plan.key.scope, CacheScope::MultiVoice);

        let plain = NarrationRequest::new("The hall is quiet.").with_character("anna", "Bert", "voiceA");
        let plan = p.plan(&plain, &SessionVoiceContext::new()).unwrap();
        assert!(!plan.is_multi_voice());
        assert_eq!(plan.key.scope, CacheScope::Single);
    }

    #[tokio::test]
    async fn lone_speech_uses_speaker_voice() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), None).await;
        let req = NarrationRequest::new(r#""We should leave," Mara whispered."#)
            .with_character("ben", "Mara", "voiceB");
        let plan = p.plan(&req, &SessionVoiceContext::new()).unwrap();
        assert_eq!(plan.voices.iter().collect::<Vec<_>>(), vec!["voiceB"]);
        assert_eq!(plan.key.scope, CacheScope::Single);
    }

    #[tokio::test]
    async fn voice_assignment_changes_key() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), None).await;
        let a = p.plan(&two_voice_request(), &SessionVoiceContext::new()).unwrap();
        let other = NarrationRequest::new(two_voice_request().text).with_character("anna", "Bert", "voiceZ");
        let b = p.plan(&other, &SessionVoiceContext::new()).unwrap();
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn dialogue_lines_merge_same_voice() {
        let plan = NarrationPlan {
            text: "Night falls and Bert says Go!".into(),
            language: "English".into(),
            narrator: NarratorVoice {
                voice_id: "n".into(),
                model_id: "m".into(),
            },
            characters: vec![],
            segments: vec![
                Segment {
                    voice_id: Some("n".into()),
                    ..Segment::narrator(0, 4, "Night falls")
                },
                Segment {
                    voice_id: Some("n".into()),
                    ..Segment::narrator(4, 8, "and Bert says")
                },
                Segment {
                    voice_id: Some("a".into()),
                    ..Segment::narrator(8, 12, "Go!")
                },
            ],
            voices: ["n".to_string(), "a".to_string()].into(),
            key: CacheKey::new(CacheScope::MultiVoice, "x", "English", "s"),
        };
        let lines = plan.dialogue_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].text, "Night falls and Bert says");
        assert_eq!(lines[1].voice_id, "a");
    }

    // ── cascade ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn blank_text_yields_none() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Ok, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let out = p.synthesize(&NarrationRequest::new("  \n "), &SessionVoiceContext::new()).await;
        assert!(out.is_none());
        assert_eq!(synth.speaks() + synth.dialogues(), 0);
    }

    #[tokio::test]
    async fn no_credential_writes_stub() {
        let tmp = tempfile::tempdir().unwrap();
        let p = pipeline(tmp.path(), None).await;
        let out = p
            .synthesize(&two_voice_request(), &SessionVoiceContext::new())
            .await
            .unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Stub);
        assert!(file_name(&out).starts_with("voice_stub_english_"));
        assert_eq!(std::fs::read(&out.path).unwrap(), placeholder(AudioFormat::Mp3));
    }

    #[tokio::test]
    async fn single_voice_then_cache_hit() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Ok, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let req = NarrationRequest::new("The torches gutter in the cold draft.");

        let first = p.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(first.strategy, SynthesisStrategy::Unified);
        assert!(file_name(&first).starts_with("voice_single_english_"));
        assert_eq!(synth.speaks(), 1);
        assert_eq!(synth.spoken.lock().unwrap()[0].0, "21m00Tcm4TlvDq8ikWAM");

        let second = p.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(second.strategy, SynthesisStrategy::Cached);
        assert_eq!(second.path, first.path);
        assert_eq!(synth.speaks(), 1);
    }

    #[tokio::test]
    async fn lone_speaker_voices_whole_text() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Ok, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let text = r#""We should leave," Mara whispered."#;
        let req = NarrationRequest::new(text).with_character("ben", "Mara", "voiceB");

        let out = p.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Unified);
        let spoken = synth.spoken.lock().unwrap();
        assert_eq!(*spoken, vec![("voiceB".to_string(), enrich_for_speech(text))]);
        assert!(spoken[0].1.ends_with("Mara whispered."), "{}", spoken[0].1);
    }

    #[tokio::test]
    async fn narrator_voiced_character_keeps_quotes() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Ok, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let text = r#"Bert says "Run now!" Then the room fell silent."#;
        let req = NarrationRequest::new(text).with_character("anna", "Bert", "21m00Tcm4TlvDq8ikWAM");

        let out = p.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Unified);
        assert_eq!(synth.dialogues(), 0);
        let spoken = synth.spoken.lock().unwrap();
        assert_eq!(
            *spoken,
            vec![("21m00Tcm4TlvDq8ikWAM".to_string(), enrich_for_speech(text))]
        );
        assert!(spoken[0].1.contains(r#""<prosody rate="fast" pitch="+2st">Run now!</prosody>""#));
    }

    #[tokio::test]
    async fn multi_voice_uses_unified_dialogue() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Ok, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let out = p
            .synthesize(&two_voice_request(), &SessionVoiceContext::new())
            .await
            .unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Unified);
        assert!(file_name(&out).starts_with("voice_multivoice_"));
        assert_eq!(std::fs::read(&out.path).unwrap(), b"dialogue");
        assert_eq!((synth.dialogues(), synth.speaks()), (1, 0));

        let turns = synth.turns.lock().unwrap();
        let voices: Vec<_> = turns.iter().map(|l| l.voice_id.as_str()).collect();
        assert_eq!(voices, vec!["21m00Tcm4TlvDq8ikWAM", "voiceA", "21m00Tcm4TlvDq8ikWAM"]);
    }

    #[tokio::test]
    async fn unsupported_dialogue_falls_back_to_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Unsupported, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let out = p
            .synthesize(&two_voice_request(), &SessionVoiceContext::new())
            .await
            .unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Segmented);
        assert_eq!(synth.speaks(), 3);
        // ffmpeg is unavailable in tests, so only the first segment survives
        let first = std::fs::read_to_string(&out.path).unwrap();
        assert_eq!(first, "21m00Tcm4TlvDq8ikWAM:Bert says");
        let scratch = std::fs::read_dir(tmp.path().join(crate::cache::SCRATCH_DIR)).unwrap();
        assert_eq!(scratch.count(), 0);
    }

    #[tokio::test]
    async fn dialogue_timeout_falls_back_to_segments() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Hang, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let out = p
            .synthesize(&two_voice_request(), &SessionVoiceContext::new())
            .await
            .unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Segmented);
    }

    #[tokio::test]
    async fn repeated_lines_are_synthesized_once() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Unsupported, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let req = NarrationRequest::new(r#"Bert says "Go!" Then Bert says "Go!""#)
            .with_character("anna", "Bert", "voiceA");
        let out = p.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Segmented);
        assert_eq!(synth.speaks(), 3);
    }

    #[tokio::test]
    async fn segments_reuse_cached_single_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Unsupported, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;

        let narrator_key = CacheKey::new(
            CacheScope::Single,
            "Bert says",
            "English",
            &single_signature("21m00Tcm4TlvDq8ikWAM", "eleven_monolingual_v1"),
        );
        let existing = p.cache().write(&narrator_key, b"cached narrator").await.unwrap();

        let req = NarrationRequest::new(r#"Bert says "Go!""#).with_character("anna", "Bert", "voiceA");
        let out = p.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Segmented);
        assert_eq!(synth.speaks(), 1);
        assert_eq!(synth.spoken.lock().unwrap()[0].0, "voiceA");
        assert!(existing.exists());
        assert_eq!(std::fs::read(&out.path).unwrap(), b"cached narrator");
    }

    #[tokio::test]
    async fn every_failure_ends_in_stub() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Unsupported, false);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let out = p
            .synthesize(&two_voice_request(), &SessionVoiceContext::new())
            .await
            .unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Stub);
        assert_eq!(synth.speaks(), 3);
    }

    #[tokio::test]
    async fn stub_does_not_shadow_later_real_audio() {
        let tmp = tempfile::tempdir().unwrap();
        let req = NarrationRequest::new("A lantern swings in the dark.");

        let failing = pipeline(tmp.path(), Some(FakeSynth::new(Dialogue::Ok, false))).await;
        let stub = failing.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(stub.strategy, SynthesisStrategy::Stub);

        let working = pipeline(tmp.path(), Some(FakeSynth::new(Dialogue::Ok, true))).await;
        let real = working.synthesize(&req, &SessionVoiceContext::new()).await.unwrap();
        assert_eq!(real.strategy, SynthesisStrategy::Unified);
        assert_ne!(real.path, stub.path);
    }

    #[tokio::test]
    async fn session_narrator_is_locked() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::new(Dialogue::Ok, true);
        let p = pipeline(tmp.path(), Some(synth.clone())).await;
        let session = SessionVoiceContext::new();

        let mut first = NarrationRequest::new("The gate opens slowly.");
        first.narrator_voice_id = Some("narrator-1".into());
        p.synthesize(&first, &session).await.unwrap();

        let mut second = NarrationRequest::new("The gate closes again.");
        second.narrator_voice_id = Some("narrator-2".into());
        p.synthesize(&second, &session).await.unwrap();

        let spoken = synth.spoken.lock().unwrap();
        assert!(spoken.iter().all(|(voice, _)| voice == "narrator-1"));
    }

    #[tokio::test]
    async fn evict_uses_configured_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = NarrationConfig {
            max_cache_entries: 1,
            ..config(tmp.path())
        };
        let p = NarrationPipeline::with_synthesizer(cfg, None).await.unwrap();
        for text in ["One line here.", "Another line.", "Third line now."] {
            p.synthesize(&NarrationRequest::new(text), &SessionVoiceContext::new())
                .await
                .unwrap();
        }
        assert_eq!(p.evict_cache().await.unwrap(), 2);
    }

    // ── concurrency ─────────────────────────────────────────────────

    /// Stand-in for ffmpeg's concat demuxer: appends every file named in the
    /// `-i` list to the last argument, in list order.
    #[cfg(unix)]
    const CONCAT_SCRIPT: &str = r#"#!/bin/sh
while [ "$#" -gt 1 ]; do
  [ "$1" = "-i" ] && list="$2"
  shift
done
sed -e "s/^file '//" -e "s/'\$//" "$list" | while IFS= read -r f; do cat "$f"; done > "$1"
"#;

    #[cfg(unix)]
    fn concat_script(dir: &Path) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("concat.sh");
        std::fs::write(&path, CONCAT_SCRIPT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Earlier segments answer later.
    #[cfg(unix)]
    fn reverse_latency(text: &str) -> Duration {
        if text.starts_with("Bert") {
            Duration::from_millis(120)
        } else if text.contains("Run") {
            Duration::from_millis(60)
        } else {
            Duration::ZERO
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stitched_parts_follow_segment_order() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = NarrationConfig {
            ffmpeg_bin: concat_script(tmp.path()).to_string_lossy().into_owned(),
            ..config(&tmp.path().join("cache"))
        };
        let synth = FakeSynth::slow(Dialogue::Unsupported, reverse_latency);
        let dyn_synth: Arc<dyn Synthesizer> = synth.clone();
        let p = Arc::new(NarrationPipeline::with_synthesizer(cfg, Some(dyn_synth)).await.unwrap());

        let req = two_voice_request();
        let out = tokio::spawn(async move { p.synthesize(&req, &SessionVoiceContext::new()).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.strategy, SynthesisStrategy::Segmented);

        let finished = synth.finished.lock().unwrap().clone();
        assert!(finished[0].contains("silent"), "{finished:?}");

        let audio = std::fs::read_to_string(&out.path).unwrap();
        let at = |needle: &str| audio.find(needle).unwrap_or_else(|| panic!("{needle} missing in {audio}"));
        assert!(at("Bert says") < at("voiceA:Run now!"));
        assert!(at("voiceA:Run now!") < at("room fell silent"));
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let synth = FakeSynth::slow(Dialogue::Ok, |_| Duration::from_millis(30));
        let p = Arc::new(pipeline(tmp.path(), Some(synth.clone())).await);
        let req = NarrationRequest::new("The bell tolls across the valley.");

        let spawn = |p: Arc<NarrationPipeline>, req: NarrationRequest| {
            tokio::spawn(async move { p.synthesize(&req, &SessionVoiceContext::new()).await })
        };
        let (a, b) = tokio::join!(spawn(p.clone(), req.clone()), spawn(p.clone(), req));
        let (a, b) = (a.unwrap().unwrap(), b.unwrap().unwrap());
        assert_eq!(file_name(&a), file_name(&b));

        let names: Vec<String> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![file_name(&a)]);
    }
}
