use clap::{Parser, Subcommand};
use doc_chat::Result;
use doc_chat::commands::{
    SettingsOverrides, ask, chat, index_document, list_documents, show_status,
};
use doc_chat::config::{run_interactive_config, show_config};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "doc-chat")]
#[command(about = "Chat with your documents using a local Ollama model")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection and retrieval defaults
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// List documents available for chat
    List {
        /// Directory to list instead of the configured documents directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Build the index of a document
    Index {
        /// Document to index
        path: PathBuf,
        /// Delete any existing index and build it again
        #[arg(long)]
        rebuild: bool,
    },
    /// Show index details for a document
    Status {
        /// Document to inspect
        path: PathBuf,
    },
    /// Ask a single question
    Ask {
        /// Document to answer from; without one the model answers from general knowledge
        #[arg(long)]
        doc: Option<PathBuf>,
        /// The question
        question: String,
        #[command(flatten)]
        settings: SettingsOverrides,
        /// Print the answer only once it is complete
        #[arg(long)]
        no_stream: bool,
    },
    /// Start an interactive chat
    Chat {
        /// Document to start with
        #[arg(long)]
        doc: Option<PathBuf>,
        #[command(flatten)]
        settings: SettingsOverrides,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config()?;
            } else {
                run_interactive_config()?;
            }
        }
        Commands::List { dir } => {
            list_documents(dir).await?;
        }
        Commands::Index { path, rebuild } => {
            index_document(path, rebuild).await?;
        }
        Commands::Status { path } => {
            show_status(path).await?;
        }
        Commands::Ask {
            doc,
            question,
            settings,
            no_stream,
        } => {
            ask(doc, question, settings, !no_stream).await?;
        }
        Commands::Chat { doc, settings } => {
            chat(doc, settings).await?;
        }
    }

    Ok(())
}
