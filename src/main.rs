use clap::Parser;
use colored::Colorize;
use dotenv::dotenv;
use memory_agent::api;
use memory_agent::commands::{CommandHandler, Dispatcher, LogRenderer, Spinner, SystemAction, TerminalRenderer};
use memory_agent::config::{AppConfig, EmbeddingKind, ModelChoice, ProviderConfig, StoreBackend};
use memory_agent::database::{Database, LocalIndex, MemoryStore, QdrantStore, StoreError};
use memory_agent::document::{DocumentError, Upload, UploadArchive};
use memory_agent::llm::chat::{ChatSession, Role};
use memory_agent::llm::embeddings::{Embedder, HashingEmbedder};
use memory_agent::providers::{self, openai::OpenAIProvider, traits::CompletionProvider, SYSTEM_PROMPT};
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    api_key: Option<String>,

    /// llama3 or gpt4
    #[arg(short, long)]
    model: Option<ModelChoice>,

    /// File to attach to the first prompt
    #[arg(short, long)]
    upload: Option<PathBuf>,

    /// local or qdrant
    #[arg(long)]
    backend: Option<StoreBackend>,

    #[arg(long)]
    memory_dir: Option<PathBuf>,

    #[arg(long)]
    api: bool,

    #[arg(long, default_value = "3000")]
    port: u16,

    /// Start with an empty transcript and do not persist it
    #[arg(long)]
    no_history: bool,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Memory store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Upload error: {0}")]
    DocumentError(#[from] DocumentError),
    #[error("API error: {0}")]
    ApiError(String),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize colored output
    colored::control::set_override(true);

    // Load environment variables
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    // Parse command line arguments
    let args = Args::parse();

    let mut config = AppConfig::from_env();
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(dir) = &args.memory_dir {
        config.memory_dir = dir.clone();
    }

    if args.api {
        run_api_server(&args, &config).await
    } else {
        run_cli_mode(&args, &config).await
    }
}

fn build_embedder(config: &AppConfig) -> Arc<dyn Embedder> {
    match config.embeddings {
        EmbeddingKind::Hashing => Arc::new(HashingEmbedder::default()),
        EmbeddingKind::OpenAI => match ModelChoice::Gpt4.api_key_from_env() {
            Some(key) => Arc::new(OpenAIProvider::with_config(
                key,
                SYSTEM_PROMPT.to_string(),
                ProviderConfig::from_env("openai"),
            )),
            None => {
                log::warn!("OpenAI embeddings requested without OPENAI_API_KEY, using hashing embeddings");
                Arc::new(HashingEmbedder::default())
            }
        },
    }
}

async fn open_store(config: &AppConfig) -> Result<Arc<dyn MemoryStore>, AppError> {
    let embedder = build_embedder(config);
    let store: Arc<dyn MemoryStore> = match config.backend {
        StoreBackend::Local => Arc::new(LocalIndex::load(&config.memory_dir, embedder).await?),
        StoreBackend::Qdrant => {
            Arc::new(QdrantStore::connect(&config.qdrant_url, &config.collection, embedder).await?)
        }
    };
    log::info!("Memory store ready with {} records", store.len().await?);
    Ok(store)
}

async fn open_session(config: &AppConfig, no_history: bool) -> ChatSession {
    if no_history {
        return ChatSession::new();
    }
    match Database::new(&config.transcript_db).await {
        Ok(db) => ChatSession::restore(db).await,
        Err(e) => {
            log::warn!("Transcript history unavailable: {}", e);
            ChatSession::new()
        }
    }
}

fn open_provider(model: ModelChoice, api_key: Option<String>) -> Result<Option<Box<dyn CompletionProvider>>, AppError> {
    match api_key.or_else(|| model.api_key_from_env()) {
        Some(key) => providers::connect(model, key)
            .map(Some)
            .map_err(|e| AppError::ProviderError(e.to_string())),
        None => Ok(None),
    }
}

async fn build_dispatcher(
    args: &Args,
    config: &AppConfig,
    model: ModelChoice,
    renderer: Box<dyn memory_agent::llm::Renderer>,
) -> Result<Dispatcher, AppError> {
    let provider = open_provider(model, args.api_key.clone())?;
    let store = open_store(config).await?;
    let session = open_session(config, args.no_history).await;

    Ok(Dispatcher::new(provider, store, session, renderer)
        .with_archive(UploadArchive::new(&config.upload_dir))
        .with_top_k(config.deduce_top_k))
}

async fn run_cli_mode(args: &Args, config: &AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let model = args.model.unwrap_or_default();
    let spinner = Spinner::default();
    let renderer = Box::new(TerminalRenderer::new(spinner.clone()));
    let dispatcher = build_dispatcher(args, config, model, renderer).await?;

    let mut command_handler = CommandHandler::new(dispatcher, model, args.api_key.clone(), spinner);

    // Show initial help menu
    command_handler.handle_command("/help").await?;
    print_banner(&command_handler).await;

    if let Some(path) = &args.upload {
        match Upload::from_path(path).await {
            Ok(upload) => command_handler.stage_upload(upload),
            Err(e) => println!("{}", e.to_string().red()),
        }
    }

    // Initialize rustyline editor
    let mut rl = Editor::<(), DefaultHistory>::new()?;

    // Main input loop
    loop {
        match rl.readline("👤 ") {
            Ok(line) => {
                let input = line.trim();
                if let Err(e) = rl.add_history_entry(input) {
                    log::debug!("History unavailable: {}", e);
                }

                match command_handler.handle_command(input).await {
                    Ok(SystemAction::Exit) => break,
                    Ok(SystemAction::Continue) => {}
                    Err(e) => println!("{}", e.red()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(ReadlineError::Eof) => {
                println!("CTRL-D");
                break;
            }
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    Ok(())
}

async fn print_banner(handler: &CommandHandler) {
    let dispatcher = handler.dispatcher();
    let records = match dispatcher.store().len().await {
        Ok(len) => len.to_string(),
        Err(e) => {
            log::warn!("Could not count memory records: {}", e);
            "?".to_string()
        }
    };

    println!(
        "\n🧠 Model: {} | Memory records: {}",
        handler.model().to_string().cyan(),
        records.cyan()
    );
    if !dispatcher.has_provider() {
        println!("{}", "Please add your Model API key to continue.".yellow());
    }
    println!();

    for turn in dispatcher.transcript() {
        match turn.role {
            Role::User => println!("👤 {}", turn.text),
            Role::Assistant => println!("🤖 {}", turn.text.truecolor(255, 236, 179)),
        }
    }
    println!();
}

async fn run_api_server(args: &Args, config: &AppConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", args.port)
        .parse()
        .map_err(|e| AppError::ApiError(format!("Invalid port {}: {}", args.port, e)))?;

    println!("Starting API server on {}", addr);

    let model = args.model.unwrap_or_default();
    let dispatcher = build_dispatcher(args, config, model, Box::new(LogRenderer)).await?;
    if !dispatcher.has_provider() {
        log::warn!("No API key for {}; /chat will ask for one", model);
    }

    let app = api::create_api(dispatcher, model);

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::ApiError(format!("Failed to bind to {}: {}", addr, e)))?;

    println!("Server successfully bound to {}", addr);
    println!("Ready to accept connections!");

    axum::serve(listener, app)
        .await
        .map_err(|e| AppError::ApiError(format!("Server error: {}", e)))?;

    Ok(())
}
