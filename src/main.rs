use clap::{Parser, Subcommand};
use rag_engine::Result;
use rag_engine::commands::{chunk_file, query_documents, show_config, show_stats, write_config};
use rag_engine::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rag-engine")]
#[command(about = "Retrieval-augmented prompt enhancement over an in-memory vector store")]
#[command(version)]
struct Cli {
    /// Configuration directory (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or write the configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Print the chunks produced for a file
    Chunk {
        /// Text file to chunk
        file: PathBuf,
    },
    /// Ingest files and enhance a question with retrieved context
    Query {
        /// Question to enhance
        question: String,
        /// Files to ingest before querying
        #[arg(long, required = true, num_args = 1..)]
        docs: Vec<PathBuf>,
        /// Use the hashing embedder instead of Ollama
        #[arg(long)]
        offline: bool,
        /// Override the number of documents to retrieve
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Ingest files and print vector store statistics and clusters
    Stats {
        /// Files to ingest
        #[arg(long, required = true, num_args = 1..)]
        docs: Vec<PathBuf>,
        /// Use the hashing embedder instead of Ollama
        #[arg(long)]
        offline: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => Config::config_dir()?,
    };
    let config = Config::load(config_dir)?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config)?;
            } else {
                write_config(&config)?;
            }
        }
        Commands::Chunk { file } => {
            chunk_file(&config.rag, &file)?;
        }
        Commands::Query {
            question,
            docs,
            offline,
            limit,
        } => {
            query_documents(&config, &question, &docs, offline, limit).await?;
        }
        Commands::Stats { docs, offline } => {
            show_stats(&config, &docs, offline).await?;
        }
    }

    Ok(())
}
