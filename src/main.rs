use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use quill_core::{ChunkStore, DocumentIndexer, ErrorKind, RagAnswer, RagQuery, SessionStore};
use quill_llm::GenerationGateway;
use quill_rag::{CancelHandle, EngineConfig, IngestionPipeline, RagConfig, RagEngine, SummarizingHistory};

mod ui;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Ask questions answered strictly from your own documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a PDF, Markdown or plain text file
    Ingest {
        path: PathBuf,
        /// Display title (defaults to the file name)
        #[arg(long)]
        title: Option<String>,
        /// Document id; re-using one replaces that document
        #[arg(long)]
        doc_id: Option<String>,
    },
    /// Ask a single question
    Ask {
        query: String,
        #[arg(long)]
        session: Option<String>,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Interactive question loop
    Chat {
        /// Continue an existing session
        #[arg(long)]
        session: Option<String>,
        #[command(flatten)]
        generation: GenerationArgs,
    },
    /// Forget a session's conversation
    Reset { session: String },
    /// Show a session's question/answer pairs
    History { session: String },
    /// Show indexed documents and sessions
    Stats,
}

#[derive(Args, Clone)]
struct GenerationArgs {
    /// Number of evidence chunks to retrieve
    #[arg(short, long)]
    k: Option<usize>,
    #[arg(long)]
    model: Option<String>,
    /// ollama or groq
    #[arg(long)]
    provider: Option<String>,
    /// Credential for the remote provider (falls back to GROQ_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
}

impl GenerationArgs {
    fn build_query(&self, config: &RagConfig, text: &str, session: Option<&str>) -> Result<RagQuery> {
        let mut query = RagQuery::new(text)
            .with_k(self.k.unwrap_or(config.top_k))
            .with_model(self.model.clone().unwrap_or_else(|| config.model.clone()));
        query = match &self.provider {
            Some(raw) => query.with_provider(raw.parse()?),
            None => query.with_provider(config.provider),
        };
        if let Some(key) = &self.api_key {
            query = query.with_api_key(key.clone());
        }
        if let Some(session) = session {
            query = query.with_session(session);
        }
        Ok(query)
    }
}

struct App {
    config: RagConfig,
    store: Arc<dyn ChunkStore>,
    sessions: Arc<dyn SessionStore>,
}

impl App {
    async fn open(config: RagConfig) -> Result<Self> {
        let embedder = config.build_embedder()?;
        let store = config.open_store(embedder).await?;
        let sessions = config.build_session_store();
        Ok(Self {
            config,
            store,
            sessions,
        })
    }

    fn pipeline(&self) -> Result<IngestionPipeline> {
        let embedder = self.config.build_embedder()?;
        Ok(IngestionPipeline::with_config(
            self.store.clone(),
            embedder,
            self.config.indexing.clone(),
        )?)
    }

    fn engine(&self) -> Result<RagEngine> {
        let gateway = Arc::new(GenerationGateway::from_env()?);
        let engine_config = EngineConfig {
            max_distance: self.config.max_distance,
            generation_timeout: gateway.config().timeout,
            ..EngineConfig::default()
        };
        let mut engine = RagEngine::new(self.store.clone(), self.sessions.clone(), gateway.clone())?
            .with_config(engine_config);
        if let Some(budget) = self.config.history_token_budget {
            engine = engine.with_history_policy(Arc::new(SummarizingHistory::new(gateway, budget)));
        }
        Ok(engine)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::open(RagConfig::from_env()?).await?;

    match cli.command {
        Commands::Ingest { path, title, doc_id } => ingest(&app, &path, title, doc_id).await?,
        Commands::Ask {
            query,
            session,
            generation,
        } => {
            let engine = app.engine()?;
            let query = generation.build_query(&app.config, &query, session.as_deref())?;
            ask(&engine, query, &mut forward_interrupts()).await?;
        }
        Commands::Chat { session, generation } => chat(&app, session, generation).await?,
        Commands::Reset { session } => {
            app.sessions.reset(&session).await?;
            println!("{} Session {} cleared", "✓".green(), session.cyan());
        }
        Commands::History { session } => {
            let pairs = app.sessions.pairs(&session).await?;
            ui::print_history(&session, &pairs);
        }
        Commands::Stats => {
            let documents = app.store.documents().await?;
            let chunks = app.store.count().await?;
            let sessions = app.sessions.list_sessions().await?;
            ui::print_stats(&documents, chunks, &sessions);
        }
    }

    Ok(())
}

async fn ingest(app: &App, path: &Path, title: Option<String>, doc_id: Option<String>) -> Result<()> {
    let title = match title {
        Some(title) => title,
        None => path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .with_context(|| format!("{} has no file name", path.display()))?,
    };
    let doc_id = doc_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let report = app.pipeline()?.ingest_file(path, &doc_id, &title).await?;
    ui::print_ingestion(&report);
    Ok(())
}

/// Forward every Ctrl-C to the returned receiver
fn forward_interrupts() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

/// Answer one query; an interrupt cancels the request without recording it
async fn answer_until_interrupted(
    engine: &RagEngine,
    query: RagQuery,
    interrupts: &mut mpsc::UnboundedReceiver<()>,
) -> quill_core::Result<RagAnswer> {
    let handle = CancelHandle::new();
    let answering = engine.answer_with_cancel(query, handle.signal());
    tokio::pin!(answering);

    loop {
        tokio::select! {
            result = &mut answering => return result,
            Some(()) = interrupts.recv() => handle.cancel(),
        }
    }
}

async fn ask(engine: &RagEngine, query: RagQuery, interrupts: &mut mpsc::UnboundedReceiver<()>) -> Result<()> {
    println!("{} Thinking...", "…".blue());
    let answer = answer_until_interrupted(engine, query, interrupts).await?;
    ui::print_answer(&answer);
    Ok(())
}

/// Next line of input, or `None` at end of input or on an interrupt
async fn next_input<R>(lines: &mut Lines<R>, interrupts: &mut mpsc::UnboundedReceiver<()>) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        line = lines.next_line() => Ok(line?),
        Some(()) = interrupts.recv() => {
            println!();
            Ok(None)
        }
    }
}

async fn chat(app: &App, session: Option<String>, generation: GenerationArgs) -> Result<()> {
    let engine = app.engine()?;
    let session = session.unwrap_or_else(|| Uuid::new_v4().to_string());
    let mut interrupts = forward_interrupts();
    ui::display_banner(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "quill>".green().bold());
        std::io::Write::flush(&mut std::io::stdout())?;

        let Some(line) = next_input(&mut lines, &mut interrupts).await? else {
            println!("{}", "Goodbye!".green());
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        match input.to_lowercase().as_str() {
            "exit" | "quit" => {
                println!("{}", "Goodbye!".green());
                break;
            }
            "reset" => {
                app.sessions.reset(&session).await?;
                println!("{} Conversation cleared", "✓".green());
                continue;
            }
            _ => {}
        }

        let query = generation.build_query(&app.config, input, Some(&session))?;
        if let Err(err) = ask(&engine, query, &mut interrupts).await {
            ui::print_error(&err);
            if let Some(core) = err.downcast_ref::<quill_core::Error>() {
                if core.kind() == ErrorKind::Configuration {
                    return Err(err);
                }
            }
        }
    }

    Ok(())
}
