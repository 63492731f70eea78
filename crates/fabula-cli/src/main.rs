//! fabula CLI: narration server and one-shot tools.
//!
//! ```text
//! fabula serve [--port 8000] [--host 127.0.0.1]
//! fabula narrate "Bert says \"Run!\"" [--character Bert=voiceId]... [--language German]
//! fabula segment "..." [--character Bert=voiceId]...
//! fabula voices
//! fabula evict [--max 100]
//! ```
//!
//! Shared options fall back to `ELEVENLABS_API_KEY`, `FABULA_CACHE_DIR`,
//! `FABULA_API_BASE`, `FABULA_FFMPEG` and `FABULA_MAX_CACHE_ENTRIES`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use fabula_lib::fabula_core::types::{AudioFormat, NarrationConfig, NarrationRequest};
use fabula_lib::fabula_core::voice::{SessionVoiceContext, annotate, resolve_narrator_voice};
use fabula_lib::fabula_core::{catalog, segment};
use fabula_lib::pipeline::NarrationPipeline;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// fabula: multi-voice narration for tabletop sessions
#[derive(Parser)]
#[command(name = "fabula", version, about)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct EngineArgs {
    /// Artifact cache directory
    #[arg(long, global = true, env = "FABULA_CACHE_DIR", default_value = "static/audio")]
    cache_dir: PathBuf,
    /// ElevenLabs API key; without it every narration is a placeholder
    #[arg(long, global = true, env = "ELEVENLABS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Synthesis API base URL
    #[arg(long, global = true, env = "FABULA_API_BASE", default_value = "https://api.elevenlabs.io")]
    api_base: String,
    /// ffmpeg binary used to join segments
    #[arg(long, global = true, env = "FABULA_FFMPEG", default_value = "ffmpeg")]
    ffmpeg: String,
    /// Cache size kept by eviction
    #[arg(long, global = true, env = "FABULA_MAX_CACHE_ENTRIES", default_value = "100")]
    max_cache_entries: usize,
    /// Artifact format (mp3 or wav)
    #[arg(long, global = true, default_value = "mp3")]
    format: AudioFormat,
    /// Maximum concurrent per-segment calls
    #[arg(long, global = true, default_value = "4")]
    segment_concurrency: usize,
}

impl EngineArgs {
    fn config(self) -> NarrationConfig {
        NarrationConfig {
            cache_dir: self.cache_dir,
            api_key: self.api_key,
            api_base_url: self.api_base,
            format: self.format,
            segment_concurrency: self.segment_concurrency,
            max_cache_entries: self.max_cache_entries,
            ffmpeg_bin: self.ffmpeg,
            ..Default::default()
        }
    }
}

#[derive(Args)]
struct CastArgs {
    /// Character voice as NAME=VOICE_ID (repeatable)
    #[arg(long = "character", value_parser = parse_character)]
    characters: Vec<(String, String)>,
    /// Narration language
    #[arg(long, default_value = "English")]
    language: String,
    /// Narrator voice override
    #[arg(long)]
    narrator_voice: Option<String>,
}

impl CastArgs {
    fn request(self, text: String) -> NarrationRequest {
        let mut request = NarrationRequest::new(text);
        request.language = self.language;
        request.narrator_voice_id = self.narrator_voice;
        for (name, voice) in self.characters {
            request = request.with_character(name.clone(), name, voice);
        }
        request
    }
}

#[derive(Subcommand)]
enum Command {
    /// Start the narration HTTP server
    Serve {
        /// Listen port
        #[arg(long, default_value = "8000")]
        port: u16,
        /// Listen host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Synthesize one narration and print the outcome as JSON
    Narrate {
        /// Narration text
        text: String,
        #[command(flatten)]
        cast: CastArgs,
    },
    /// Print the segmentation of a text as JSON
    Segment {
        /// Narration text
        text: String,
        #[command(flatten)]
        cast: CastArgs,
    },
    /// List the voice catalog as JSON
    Voices,
    /// Trim the artifact cache
    Evict {
        /// Entries to keep (defaults to --max-cache-entries)
        #[arg(long)]
        max: Option<usize>,
    },
}

fn parse_character(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((name, voice)) if !name.trim().is_empty() && !voice.trim().is_empty() => {
            Ok((name.trim().to_string(), voice.trim().to_string()))
        }
        _ => Err(format!("expected NAME=VOICE_ID, got '{value}'")),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("fabula_lib=debug,fabula=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fabula: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult {
    let config = cli.engine.config();

    match cli.command {
        Command::Serve { port, host } => {
            let pipeline = Arc::new(NarrationPipeline::new(config).await?);
            let app = fabula_lib::server::router(pipeline.clone());

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(
                "fabula listening on {addr}, audio from {}",
                pipeline.cache().dir().display()
            );
            axum::serve(listener, app).await?;
        }

        Command::Narrate { text, cast } => {
            let pipeline = NarrationPipeline::new(config).await?;
            let request = cast.request(text);
            match pipeline.synthesize(&request, &SessionVoiceContext::new()).await {
                Some(outcome) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                None => return Err("nothing to narrate".into()),
            }
        }

        Command::Segment { text, cast } => {
            let request = cast.request(text);
            let characters = segment::character_voice_map(&request.character_voice_map);
            let narrator = resolve_narrator_voice(&request, &SessionVoiceContext::new());
            let mut segments = segment::segment(&request.text, &characters);
            annotate(&mut segments, &characters, &narrator.voice_id);
            println!("{}", serde_json::to_string_pretty(&segments)?);
        }

        Command::Voices => {
            println!("{}", serde_json::to_string_pretty(catalog::list_voices())?);
        }

        Command::Evict { max } => {
            let max = max.unwrap_or(config.max_cache_entries);
            let pipeline = NarrationPipeline::with_synthesizer(config, None).await?;
            let removed = pipeline.cache().evict(max).await?;
            println!("{}", serde_json::json!({ "removed": removed }));
        }
    }

    Ok(())
}
