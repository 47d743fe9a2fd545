// narrate - Stream text to speech with a follow-along cursor

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use narrate::pipeline::{self, CancelHandle, GenerationRequest};
use narrate::{AudioTimeline, CommandSynthesizer, NarrateConfig, SpeechSynthesizer, VoiceStore};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "narrate")]
#[command(about = "Stream text to speech with a follow-along cursor", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Speak text aloud, printing each word as it is spoken
    Say {
        #[command(flatten)]
        input: TextInput,

        #[command(flatten)]
        voice: VoiceOptions,

        /// Also write the generated audio to this file (.wav or .m4a)
        #[arg(long)]
        export: Option<PathBuf>,

        /// Print session events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Synthesize text straight to an audio file
    Render {
        #[command(flatten)]
        input: TextInput,

        #[command(flatten)]
        voice: VoiceOptions,

        /// Output file (.wav or .m4a)
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show how text will be split into synthesis chunks
    Chunks {
        #[command(flatten)]
        input: TextInput,

        /// Maximum sentences per chunk
        #[arg(short = 'n', long)]
        max_sentences: Option<usize>,
    },
    /// List available voices
    Voices,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(ClapArgs, Debug)]
struct TextInput {
    /// Text to speak (reads --file or stdin when omitted)
    text: Option<String>,

    /// Read text from a file
    #[arg(short, long)]
    file: Option<PathBuf>,
}

#[derive(ClapArgs, Debug)]
struct VoiceOptions {
    /// Voice id
    #[arg(short, long)]
    voice: Option<String>,

    /// Language code
    #[arg(short, long)]
    language: Option<String>,

    /// Speech-speed multiplier (0.5 to 2.0)
    #[arg(short, long)]
    speed: Option<f32>,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set default voice
    SetVoice {
        /// Voice id (e.g., af_heart)
        voice: String,
    },
    /// Set default language
    SetLanguage {
        /// Language code (e.g., en-us)
        language: String,
    },
    /// Set default speech speed
    SetSpeed {
        /// Multiplier between 0.5 and 2.0
        speed: f32,
    },
    /// Set how many sentences go into one synthesis chunk
    SetChunkSize {
        /// Sentences per chunk
        sentences: usize,
    },
    /// Set the synthesis engine command
    SetEngine {
        /// Engine program
        command: String,

        /// Extra arguments passed to the engine
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Set the voice embedding resource
    SetVoices {
        /// Path to a JSON voice file
        path: PathBuf,
    },
    /// Rate a voice from 1 to 5
    RateVoice {
        /// Voice id
        voice: String,
        /// Rating (1-5)
        rating: u8,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match args.command {
        Commands::Say {
            input,
            voice,
            export,
            json,
        } => {
            let text = read_text(&input)?;
            let config = resolve_config(&voice)?;
            say(&text, &config, export, json).await
        }
        Commands::Render {
            input,
            voice,
            output,
        } => {
            let text = read_text(&input)?;
            let config = resolve_config(&voice)?;
            render(&text, &config, output).await
        }
        Commands::Chunks {
            input,
            max_sentences,
        } => {
            let text = read_text(&input)?;
            let mut config = NarrateConfig::load().context("Failed to load configuration")?;
            if let Some(max_sentences) = max_sentences {
                config.set_max_sentences(max_sentences)?;
            }
            print_chunks(&text, config.max_sentences_per_chunk);
            Ok(())
        }
        Commands::Voices => list_voices(),
        Commands::Config { action } => handle_config_command(action),
    }
}

/// Text from the argument, then --file, then piped stdin
fn read_text(input: &TextInput) -> Result<String> {
    if let Some(text) = &input.text {
        return Ok(text.clone());
    }

    if let Some(path) = &input.file {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()));
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        anyhow::bail!("No text given. Pass TEXT, --file, or pipe text on stdin");
    }

    let mut text = String::new();
    stdin
        .lock()
        .read_to_string(&mut text)
        .context("Failed to read stdin")?;
    Ok(text)
}

/// Saved configuration with command-line overrides applied
fn resolve_config(options: &VoiceOptions) -> Result<NarrateConfig> {
    let mut config = NarrateConfig::load().context("Failed to load configuration")?;

    if let Some(voice) = &options.voice {
        config.voice = voice.clone();
    }
    if let Some(language) = &options.language {
        config.language = language.clone();
    }
    if let Some(speed) = options.speed {
        config.set_speed(speed)?;
    }

    Ok(config)
}

fn create_synthesizer(config: &NarrateConfig) -> Arc<dyn SpeechSynthesizer> {
    Arc::new(CommandSynthesizer::new(
        config.engine_command.clone(),
        config.engine_args.clone(),
        config.sample_rate,
    ))
}

/// Voice resource from config, or just the configured voice when none is set
fn load_voices(config: &NarrateConfig) -> Result<VoiceStore> {
    match &config.voices_path {
        Some(path) => Ok(VoiceStore::load(path)?),
        None => Ok(VoiceStore::named([config.voice.clone()])),
    }
}

#[cfg(feature = "playback")]
async fn say(
    text: &str,
    config: &NarrateConfig,
    export: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    use narrate::{CpalOutput, Narrator, SessionEvent};
    use std::io::Write;

    let voice = load_voices(config)?.get(&config.voice)?;
    let mut narrator = Narrator::new(create_synthesizer(config), Box::new(CpalOutput::new()))
        .with_max_sentences(config.max_sentences_per_chunk);

    let count = narrator
        .say(text, voice, &config.language, config.speed)
        .await
        .context("Failed to start playback")?;
    if count == 0 {
        eprintln!("Nothing to say");
        return Ok(());
    }

    let mut printed = 0;
    let mut failure = None;

    loop {
        tokio::select! {
            event = narrator.next_event() => {
                let Some(event) = event else { break };

                if json {
                    println!("{}", event_json(&narrator, &event));
                    continue;
                }

                match event {
                    SessionEvent::Position { active_token: Some(index), .. } => {
                        printed = print_tokens(narrator.tokens(), printed, index + 1);
                    }
                    SessionEvent::PlaybackFinished => {
                        print_tokens(narrator.tokens(), printed, narrator.tokens().len());
                        println!();
                    }
                    SessionEvent::PlaybackFailed(message) => failure = Some(message),
                    _ => {}
                }
                std::io::stdout().flush()?;
            }
            _ = tokio::signal::ctrl_c() => {
                narrator.cancel_generation();
                narrator.pause();
                if !json {
                    println!();
                }
                eprintln!("Stopped");
                break;
            }
        }
    }

    if let Some(message) = failure {
        anyhow::bail!("Playback failed: {}", message);
    }

    if let Some(path) = export {
        narrator
            .export(&path)
            .with_context(|| format!("Failed to export {}", path.display()))?;
        eprintln!("Saved: {}", path.display());
    }

    narrator.stop();
    Ok(())
}

#[cfg(not(feature = "playback"))]
async fn say(
    _text: &str,
    _config: &NarrateConfig,
    _export: Option<PathBuf>,
    _json: bool,
) -> Result<()> {
    anyhow::bail!(
        "narrate was built without speaker support. Rebuild with `--features playback`, or use `narrate render`"
    )
}

/// Print tokens `from..to`, returning the new printed count
#[cfg(feature = "playback")]
fn print_tokens(tokens: &[narrate::Token], from: usize, to: usize) -> usize {
    let to = to.min(tokens.len());
    for (index, token) in tokens.iter().enumerate().take(to).skip(from) {
        print!("{}", token.text);
        // A separator after a spaced word must not print a second space
        let follows_space =
            token.text.is_empty() && index > 0 && tokens[index - 1].trailing_whitespace;
        if token.trailing_whitespace && !follows_space {
            print!(" ");
        }
    }
    to.max(from)
}

#[cfg(feature = "playback")]
fn event_json(narrator: &narrate::Narrator, event: &narrate::SessionEvent) -> serde_json::Value {
    use narrate::SessionEvent;
    use serde_json::json;

    match event {
        SessionEvent::ChunkReady {
            index,
            offset,
            duration,
        } => json!({
            "event": "chunk_ready",
            "index": index,
            "offset": offset.as_secs_f64(),
            "duration": duration.as_secs_f64(),
            "total": narrator.total_duration().as_secs_f64(),
        }),
        SessionEvent::GenerationFinished(summary) => json!({
            "event": "generation_finished",
            "delivered": summary.delivered,
            "failed": summary.failed,
            "cancelled": summary.cancelled,
        }),
        SessionEvent::Position {
            elapsed,
            active_token,
        } => json!({
            "event": "position",
            "elapsed": elapsed.as_secs_f64(),
            "active_token": active_token,
            "word": active_token.and_then(|i| narrator.tokens().get(i)).map(|t| t.text.as_str()),
        }),
        SessionEvent::PlaybackFinished => json!({
            "event": "playback_finished",
            "total": narrator.total_duration().as_secs_f64(),
        }),
        SessionEvent::PlaybackFailed(message) => json!({
            "event": "playback_failed",
            "message": message,
        }),
    }
}

async fn render(text: &str, config: &NarrateConfig, output: PathBuf) -> Result<()> {
    let voice = load_voices(config)?.get(&config.voice)?;
    let chunks = narrate::chunk(text, config.max_sentences_per_chunk);
    if chunks.is_empty() {
        anyhow::bail!("No text to render");
    }

    let synth = create_synthesizer(config);
    let request = GenerationRequest {
        chunks,
        voice,
        language: config.language.clone(),
        speed: config.speed,
    };
    let total = request.chunks.len();

    eprintln!("Synthesizing {} chunk(s) with {}...", total, config.voice);

    let (timeline, summary) = tokio::task::spawn_blocking(move || {
        let mut timeline = AudioTimeline::new(synth.sample_rate());
        let summary = pipeline::generate(synth.as_ref(), &request, &CancelHandle::new(), |chunk| {
            eprintln!("  [{}/{}] {:.1}s", chunk.index + 1, total, chunk.duration.as_secs_f64());
            timeline.append(&chunk.samples);
        });
        (timeline, summary)
    })
    .await
    .context("Synthesis task failed")?;

    if summary.failed > 0 {
        eprintln!("Warning: {} chunk(s) failed and were skipped", summary.failed);
    }

    timeline
        .export(&output)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    eprintln!(
        "Output: {} ({:.1}s)",
        output.display(),
        timeline.duration().as_secs_f64()
    );
    Ok(())
}

fn print_chunks(text: &str, max_sentences: usize) {
    for chunk in narrate::chunk(text, max_sentences) {
        println!("[{}] {}", chunk.index, chunk.text);
    }
}

fn list_voices() -> Result<()> {
    let config = NarrateConfig::load().context("Failed to load configuration")?;
    let store = load_voices(&config)?;

    println!("Available voices:");
    println!();

    for id in store.ids() {
        let marker = if id == config.voice { "*" } else { " " };
        match config.rating(&id) {
            Some(rating) => println!("{} {} {}", marker, id, "★".repeat(rating as usize)),
            None => println!("{} {}", marker, id),
        }
    }

    Ok(())
}

fn handle_config_command(action: ConfigAction) -> Result<()> {
    let mut config = NarrateConfig::load().context("Failed to load configuration")?;

    match action {
        ConfigAction::Show => {
            println!("Configuration file: {:?}", NarrateConfig::config_path()?);
            println!();
            println!("voice = \"{}\"", config.voice);
            println!("language = \"{}\"", config.language);
            println!("speed = {}", config.speed);
            println!("max_sentences_per_chunk = {}", config.max_sentences_per_chunk);
            println!("sample_rate = {}", config.sample_rate);
            println!("engine_command = \"{}\"", config.engine_command);
            if !config.engine_args.is_empty() {
                println!("engine_args = {:?}", config.engine_args);
            }
            match &config.voices_path {
                Some(path) => println!("voices_path = \"{}\"", path.display()),
                None => println!("voices_path = (none)"),
            }
            for (voice, rating) in &config.ratings {
                println!("rating.{} = {}", voice, rating);
            }
            return Ok(());
        }
        ConfigAction::SetVoice { voice } => {
            if config.voices_path.is_some() {
                // Validate voice exists
                load_voices(&config)?.get(&voice)?;
            }
            config.voice = voice.clone();
            println!("Default voice set to: {}", voice);
        }
        ConfigAction::SetLanguage { language } => {
            config.language = language.clone();
            println!("Default language set to: {}", language);
        }
        ConfigAction::SetSpeed { speed } => {
            config.set_speed(speed)?;
            println!("Default speed set to: {}", speed);
        }
        ConfigAction::SetChunkSize { sentences } => {
            config.set_max_sentences(sentences)?;
            println!("Chunk size set to: {} sentence(s)", sentences);
        }
        ConfigAction::SetEngine { command, args } => {
            config.engine_command = command.clone();
            config.engine_args = args;
            println!("Engine set to: {}", command);
        }
        ConfigAction::SetVoices { path } => {
            let store = VoiceStore::load(&path)?;
            config.voices_path = Some(path.clone());
            println!("Voices set to: {} ({} voices)", path.display(), store.len());
        }
        ConfigAction::RateVoice { voice, rating } => {
            config.rate_voice(&voice, rating)?;
            println!("Rated {}: {}", voice, rating);
        }
    }

    config.save()?;
    Ok(())
}
