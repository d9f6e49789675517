#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use console::style;
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use itertools::Itertools;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info};

use crate::chat::{AnswerError, AnswerOrchestrator, ChatSession, PromptKind, Role, group_sources};
use crate::config::Config;
use crate::documents::{DocumentSource, TextDocumentSource};
use crate::index::IndexCacheManager;
use crate::ollama::OllamaClient;
use crate::retrieval::{RetrievalMode, RetrievalSettings, RetrievedChunk, Retriever};

/// Per-invocation overrides of the configured retrieval defaults
#[derive(Debug, Clone, Default, PartialEq, clap::Args)]
pub struct SettingsOverrides {
    /// Number of passages to retrieve
    #[arg(long)]
    pub top_k: Option<usize>,
    /// Retrieval mode: similarity or diversity (mmr)
    #[arg(long)]
    pub mode: Option<RetrievalMode>,
    /// Maximum characters of retrieved context
    #[arg(long)]
    pub max_context_chars: Option<usize>,
    /// Maximum tokens in the answer
    #[arg(long)]
    pub max_tokens: Option<u32>,
    /// Print the passages the answer was grounded on
    #[arg(long)]
    pub show_context: bool,
}

impl SettingsOverrides {
    #[inline]
    pub fn apply(&self, defaults: &RetrievalSettings) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k.unwrap_or(defaults.top_k),
            mode: self.mode.unwrap_or(defaults.mode),
            max_context_chars: self.max_context_chars.unwrap_or(defaults.max_context_chars),
            max_answer_tokens: self.max_tokens.unwrap_or(defaults.max_answer_tokens),
            show_context: self.show_context || defaults.show_context,
        }
    }
}

/// Everything a command needs, wired from the configuration
pub struct App {
    pub config: Config,
    pub source: Arc<TextDocumentSource>,
    pub cache: Arc<IndexCacheManager>,
    pub orchestrator: AnswerOrchestrator,
    pub ollama: Arc<OllamaClient>,
}

impl App {
    #[inline]
    pub fn from_config(config: Config) -> Result<Self> {
        let ollama =
            Arc::new(OllamaClient::new(&config.ollama).context("Failed to create Ollama client")?);
        let source = Arc::new(TextDocumentSource::new());

        let cache = IndexCacheManager::new(
            config.index_dir(),
            Arc::clone(&ollama) as _,
            Arc::clone(&source) as _,
            config.chunking.clone(),
        )
        .context("Failed to open index directory")?;

        let orchestrator = AnswerOrchestrator::new(
            Retriever::new(Arc::clone(&ollama) as _),
            Arc::clone(&ollama) as _,
        );

        Ok(Self {
            config,
            source,
            cache: Arc::new(cache),
            orchestrator,
            ollama,
        })
    }

    #[inline]
    pub fn load() -> Result<Self> {
        let config = Config::load_default().context("Failed to load configuration")?;
        Self::from_config(config)
    }

    /// Resolve a document argument: paths that don't exist as given are
    /// looked up in the documents directory
    #[inline]
    pub fn resolve_document(&self, path: &Path) -> PathBuf {
        resolve_document(&self.config.documents_dir(), path)
    }
}

#[inline]
pub fn resolve_document(documents_dir: &Path, path: &Path) -> PathBuf {
    if path.is_relative() && !path.exists() {
        let candidate = documents_dir.join(path);
        if candidate.exists() {
            return candidate;
        }
    }
    path.to_path_buf()
}

fn spinner(message: String) -> ProgressBar {
    if !console::user_attended_stderr() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

/// List the documents available for chat
#[inline]
pub async fn list_documents(dir: Option<PathBuf>) -> Result<()> {
    let app = App::load()?;
    let dir = dir.unwrap_or_else(|| app.config.documents_dir());

    let documents = app
        .source
        .list_documents(&dir)
        .with_context(|| format!("Failed to list documents in {}", dir.display()))?;

    if documents.is_empty() {
        println!("No documents found in {}", dir.display());
        println!("Add .pdf, .txt or .md files there.");
        return Ok(());
    }

    println!("Documents in {} ({} total):", dir.display(), documents.len());
    println!();

    for document in &documents {
        let indexed = match app.cache.info(&document.path).await {
            Ok(info) if info.exists => style("indexed").green().to_string(),
            Ok(_) => style("not indexed").dim().to_string(),
            Err(e) => {
                debug!("Could not inspect index for {}: {}", document.path.display(), e);
                style("unknown").yellow().to_string()
            }
        };

        println!("📄 {}", style(&document.name).bold());
        println!("   Size: {}", format_size(document.size));
        println!(
            "   Modified: {}",
            document.modified.format("%Y-%m-%d %H:%M:%S")
        );
        println!("   Index: {}", indexed);
    }

    Ok(())
}

/// Build (or rebuild) the index of a document
#[inline]
pub async fn index_document(path: PathBuf, rebuild: bool) -> Result<()> {
    let app = App::load()?;
    let path = app.resolve_document(&path);

    let bar = spinner(format!("Indexing {}", path.display()));
    let result = if rebuild {
        app.cache.rebuild(&path).await
    } else {
        app.cache.get_or_create(&path).await
    };
    bar.finish_and_clear();

    let index = result.map_err(|e| {
        error!("Indexing {} failed: {}", path.display(), e);
        anyhow::anyhow!(AnswerError::from(e).message)
    })?;

    println!(
        "{} {} ({} chunks, {} dimensions, model {})",
        style("✓ Indexed").green(),
        index.identity(),
        index.len(),
        index.dimension(),
        index.embedding_model()
    );
    if index.is_empty() {
        println!(
            "{}",
            style("⚠ No text could be extracted; questions will use general knowledge.").yellow()
        );
    }

    Ok(())
}

/// Show what is stored for a document's index
#[inline]
pub async fn show_status(path: PathBuf) -> Result<()> {
    let app = App::load()?;
    let path = app.resolve_document(&path);

    let info = app.cache.info(&path).await.map_err(|e| {
        error!("Status for {} failed: {}", path.display(), e);
        anyhow::anyhow!(AnswerError::from(e).message)
    })?;

    println!("📊 Index Status for {}", style(path.display()).cyan());
    println!("{}", "=".repeat(50));
    println!("   Identity: {}", info.identity);
    println!("   Directory: {}", info.directory.display());

    if !info.exists {
        println!("   Status: {}", style("not indexed").dim());
        return Ok(());
    }

    println!("   Status: {}", style("indexed").green());
    if let Some(size) = info.vector_file_size {
        println!("   Vector file: {}", format_size(size));
    }
    if let Some(size) = info.payload_file_size {
        println!("   Payload file: {}", format_size(size));
    }
    match (info.chunk_count, &info.embedding_model) {
        (Some(chunks), Some(model)) => {
            println!("   Chunks: {}", chunks);
            println!("   Embedding model: {}", model);
            if model != app.cache.embedding_model() {
                println!(
                    "   {}",
                    style(format!(
                        "⚠ Configured model is '{}'; run `doc-chat index --rebuild`",
                        app.cache.embedding_model()
                    ))
                    .yellow()
                );
            }
        }
        _ => println!(
            "   {}",
            style("⚠ Index payload is unreadable; run `doc-chat index --rebuild`").red()
        ),
    }
    if let Some(created_at) = info.created_at {
        println!("   Created: {}", created_at.format("%Y-%m-%d %H:%M:%S"));
    }

    println!();
    println!("🤖 Ollama:");
    let ollama = Arc::clone(&app.ollama);
    match tokio::task::spawn_blocking(move || ollama.health_check()).await? {
        Ok(()) => println!("   ✅ Connected ({})", app.config.ollama_url()?),
        Err(e) => println!("   ⚠️  Unhealthy - {:#}", e),
    }

    Ok(())
}

/// Answer one question and exit
#[inline]
pub async fn ask(
    document: Option<PathBuf>,
    question: String,
    overrides: SettingsOverrides,
    stream: bool,
) -> Result<()> {
    let app = App::load()?;
    let settings = overrides.apply(&app.config.retrieval);
    let session = ChatSession::new(Arc::clone(&app.cache), app.orchestrator.clone());

    if let Some(document) = document {
        select(&app, &session, &document).await?;
    }

    ask_in_session(&session, &question, &settings, stream)
        .await
        .map_err(|e| anyhow::anyhow!(e.message))
}

/// Interactive chat over a session
#[inline]
pub async fn chat(document: Option<PathBuf>, overrides: SettingsOverrides) -> Result<()> {
    let app = App::load()?;
    let settings = overrides.apply(&app.config.retrieval);
    let session = ChatSession::new(Arc::clone(&app.cache), app.orchestrator.clone());

    if let Some(document) = document {
        select(&app, &session, &document).await?;
    }

    eprintln!("{}", style("💬 Doc Chat").bold().cyan());
    eprintln!("Type a question, or /help for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        eprint!("{} ", style(">").bold().green());
        std::io::stderr().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();

        match ReplCommand::parse(line) {
            ReplCommand::Empty => {}
            ReplCommand::Quit => break,
            ReplCommand::Help => print_repl_help(),
            ReplCommand::Clear => {
                session.clear_transcript();
                eprintln!("Conversation cleared.");
            }
            ReplCommand::History => print_history(&session),
            ReplCommand::NoDocument => {
                session.clear_document();
                eprintln!("No document selected; answering from general knowledge.");
            }
            ReplCommand::Document(path) => {
                if let Err(e) = select(&app, &session, Path::new(path)).await {
                    eprintln!("{}", style(format!("{:#}", e)).red());
                }
            }
            ReplCommand::Question(question) => {
                if let Err(e) = ask_in_session(&session, question, &settings, true).await {
                    eprintln!("{}", style(&e.message).red());
                }
            }
        }
    }

    info!("Chat ended");
    Ok(())
}

/// A line typed at the chat prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand<'a> {
    Empty,
    Quit,
    Help,
    Clear,
    History,
    NoDocument,
    Document(&'a str),
    Question(&'a str),
}

impl<'a> ReplCommand<'a> {
    #[inline]
    pub fn parse(line: &'a str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }

        let Some(command) = line.strip_prefix('/') else {
            return Self::Question(line);
        };

        let (name, argument) = command
            .split_once(char::is_whitespace)
            .map_or((command, ""), |(name, rest)| (name, rest.trim()));

        match name {
            "quit" | "exit" | "q" => Self::Quit,
            "help" | "?" => Self::Help,
            "clear" => Self::Clear,
            "history" => Self::History,
            "doc" if argument.is_empty() => Self::NoDocument,
            "doc" => Self::Document(argument),
            _ => Self::Question(line),
        }
    }
}

fn print_repl_help() {
    eprintln!("  /doc PATH   answer from a document (indexes it on first use)");
    eprintln!("  /doc        stop using a document");
    eprintln!("  /clear      clear the conversation");
    eprintln!("  /history    show the conversation");
    eprintln!("  /quit       leave");
}

fn print_history(session: &ChatSession) {
    let transcript = session.transcript();
    if transcript.is_empty() {
        eprintln!("No messages yet.");
        return;
    }
    for turn in transcript {
        let speaker = match turn.role {
            Role::User => style("you").bold().green(),
            Role::Assistant => style("assistant").bold().cyan(),
        };
        println!("{}: {}", speaker, turn.content);
    }
}

async fn select(app: &App, session: &ChatSession, document: &Path) -> Result<()> {
    let path = app.resolve_document(document);
    let bar = spinner(format!("Loading {}", path.display()));
    let result = session.select_document(&path).await;
    bar.finish_and_clear();

    let index = result.map_err(|e| {
        error!("Selecting {} failed: {}", path.display(), e.cause);
        anyhow::anyhow!(e.message)
    })?;

    eprintln!(
        "{} {} ({} chunks)",
        style("📄 Using").green(),
        path.display(),
        index.len()
    );
    Ok(())
}

async fn ask_in_session(
    session: &ChatSession,
    question: &str,
    settings: &RetrievalSettings,
    stream: bool,
) -> std::result::Result<(), AnswerError> {
    let (text, sources, kind) = if stream {
        let mut streamed = session.ask_stream(question, settings).await?;
        let mut text = String::new();
        let mut stdout = std::io::stdout();

        while let Some(fragment) = streamed.fragments.next().await {
            match fragment {
                Ok(fragment) => {
                    print!("{}", fragment);
                    let _ = stdout.flush();
                    text.push_str(&fragment);
                }
                Err(e) => {
                    println!();
                    error!("Answer stream failed: {}", e.cause);
                    session.record_exchange(question, &text);
                    return Err(e);
                }
            }
        }
        println!();

        session.record_exchange(question, &text);
        (text, streamed.sources, streamed.prompt_kind)
    } else {
        let answer = session.ask(question, settings).await?;
        println!("{}", answer.text);
        (answer.text, answer.sources, answer.prompt_kind)
    };

    debug!("Answered with {} chars", text.chars().count());
    if kind == PromptKind::GeneralKnowledge && session.active_document().is_some() {
        eprintln!(
            "{}",
            style("(no relevant passages found; answered from general knowledge)").dim()
        );
    }
    if settings.show_context {
        print_sources(&sources);
    }

    Ok(())
}

fn print_sources(sources: &[RetrievedChunk]) {
    if sources.is_empty() {
        return;
    }

    eprintln!();
    eprintln!("{}", style("Sources:").bold().yellow());
    for group in group_sources(sources) {
        let name = group
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| group.source.display().to_string());
        if group.pages.is_empty() {
            eprintln!("  {} ({} passages)", style(name).cyan(), group.chunk_count);
        } else {
            eprintln!(
                "  {} pages {} ({} passages)",
                style(name).cyan(),
                group.pages.iter().map(|p| p + 1).join(", "),
                group.chunk_count
            );
        }
    }

    for (i, retrieved) in sources.iter().enumerate() {
        eprintln!();
        eprintln!(
            "{}",
            style(format!("[{}] score {:.3}", i + 1, retrieved.score)).dim()
        );
        eprintln!("{}", retrieved.chunk.text);
    }
}

/// Human readable byte count
#[inline]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}
