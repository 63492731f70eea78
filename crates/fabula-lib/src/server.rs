//! HTTP API for the narration engine.
//!
//! CORS-permissive so a browser front end on another port can call it.
//! Artifacts are served from `/static/audio`, the cache directory.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error};

use fabula_core::types::{NarrationRequest, SynthesisStrategy, VoiceDescriptor};
use fabula_core::voice::SessionVoiceContext;

use crate::pipeline::NarrationPipeline;

/// URL prefix the cache directory is served under.
pub const AUDIO_ROUTE: &str = "/static/audio";

/// Sessions kept before the least recently used one is dropped.
pub const MAX_SESSIONS: usize = 1024;

struct SessionEntry {
    context: Arc<SessionVoiceContext>,
    last_used: u64,
}

/// Session voice contexts, bounded by `limit` with LRU replacement.
struct Sessions {
    entries: HashMap<String, SessionEntry>,
    tick: u64,
    limit: usize,
}

impl Sessions {
    fn get_or_create(&mut self, id: &str) -> Arc<SessionVoiceContext> {
        self.tick += 1;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.last_used = self.tick;
            return entry.context.clone();
        }

        if self.entries.len() >= self.limit {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            if let Some(oldest) = oldest {
                debug!("server: session limit reached, dropping {oldest}");
                self.entries.remove(&oldest);
            }
        }

        let context = Arc::new(SessionVoiceContext::new());
        self.entries.insert(
            id.to_string(),
            SessionEntry {
                context: context.clone(),
                last_used: self.tick,
            },
        );
        context
    }
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<NarrationPipeline>,
    sessions: Arc<Mutex<Sessions>>,
}

impl AppState {
    pub fn new(pipeline: Arc<NarrationPipeline>) -> Self {
        Self::with_session_limit(pipeline, MAX_SESSIONS)
    }

    pub fn with_session_limit(pipeline: Arc<NarrationPipeline>, limit: usize) -> Self {
        Self {
            pipeline,
            sessions: Arc::new(Mutex::new(Sessions {
                entries: HashMap::new(),
                tick: 0,
                limit: limit.max(1),
            })),
        }
    }

    /// Voice context for `session_id`, created on first use. Requests
    /// without a session get a throwaway context.
    async fn session(&self, session_id: Option<&str>) -> Arc<SessionVoiceContext> {
        let Some(id) = session_id.filter(|id| !id.is_empty()) else {
            return Arc::new(SessionVoiceContext::new());
        };
        self.sessions.lock().await.get_or_create(id)
    }

    /// Forget `session_id`. Returns whether it existed.
    async fn end_session(&self, session_id: &str) -> bool {
        self.sessions.lock().await.entries.remove(session_id).is_some()
    }
}

/// Build the axum router over a shared [`NarrationPipeline`].
pub fn router(pipeline: Arc<NarrationPipeline>) -> Router {
    router_with_state(AppState::new(pipeline))
}

fn router_with_state(state: AppState) -> Router {
    let audio_dir = state.pipeline.cache().dir().to_path_buf();
    Router::new()
        .route("/api/narrate", post(narrate))
        .route("/api/voices", get(voices))
        .route("/api/cache/evict", post(evict))
        .route("/api/sessions/{id}", delete(end_session))
        .nest_service(AUDIO_ROUTE, ServeDir::new(audio_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct NarrateBody {
    #[serde(default)]
    session_id: Option<String>,
    request: NarrationRequest,
}

#[derive(serde::Serialize)]
struct NarrateResponse {
    path: Option<String>,
    strategy: Option<SynthesisStrategy>,
}

#[derive(serde::Serialize)]
struct VoicesResponse {
    #[serde(rename = "type")]
    kind: &'static str,
    voices: &'static [VoiceDescriptor],
}

#[derive(serde::Serialize)]
struct EvictResponse {
    removed: usize,
}

/// Public URL path for an artifact in the cache directory.
fn public_path(path: &std::path::Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(format!("{AUDIO_ROUTE}/{name}"))
}

async fn narrate(State(state): State<AppState>, Json(body): Json<NarrateBody>) -> Json<NarrateResponse> {
    let session = state.session(body.session_id.as_deref()).await;
    let outcome = state.pipeline.synthesize(&body.request, &session).await;
    Json(match outcome {
        Some(outcome) => NarrateResponse {
            path: public_path(&outcome.path),
            strategy: Some(outcome.strategy),
        },
        None => NarrateResponse {
            path: None,
            strategy: None,
        },
    })
}

async fn voices(State(state): State<AppState>) -> Json<VoicesResponse> {
    Json(VoicesResponse {
        kind: "voices_list",
        voices: state.pipeline.list_voices(),
    })
}

async fn evict(State(state): State<AppState>) -> Result<Json<EvictResponse>, (StatusCode, String)> {
    match state.pipeline.evict_cache().await {
        Ok(removed) => Ok(Json(EvictResponse { removed })),
        Err(e) => {
            error!("server: eviction failed: {e}");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
    }
}

async fn end_session(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if state.end_session(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}
