//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "quarry",
    version,
    author = "neur0map",
    about = "Hybrid retrieval over indexed folders",
    long_about = "Quarry answers queries over indexed folders by fusing vector similarity and \
                  BM25 keyword search with Reciprocal Rank Fusion, optionally reranking the \
                  candidates, and tracks which chunks each folder owns so folders can be \
                  removed cleanly."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/quarry/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage indexed folders
    Folders {
        #[command(subcommand)]
        action: FoldersAction,
    },

    /// Search indexed content
    Query {
        /// Search query text
        query: String,

        /// Maximum number of results to return
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Retrieval mode
        #[arg(short, long, value_parser = ["vector", "keyword", "hybrid"])]
        mode: Option<String>,

        /// Rerank the fused candidates
        #[arg(long)]
        rerank: bool,

        /// Skip reranking even if enabled in config
        #[arg(long)]
        no_rerank: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show store and registry statistics
    Stats,

    /// File type presets for `folders add --types`
    Types {
        #[command(subcommand)]
        action: TypesAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum FoldersAction {
    /// List indexed folders
    List {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Index a folder's files, replacing any previous chunks for it
    Add {
        /// Folder to index
        path: PathBuf,

        /// Comma-separated file type presets (see `quarry types list`)
        #[arg(short, long, value_delimiter = ',', value_name = "PRESET,...")]
        types: Vec<String>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Remove a folder and all of its chunks from the index
    Remove {
        /// Folder path (relative paths resolve against the current directory)
        path: PathBuf,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum TypesAction {
    /// List presets and the globs they cover
    List {
        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Show only a specific section
        #[arg(short, long)]
        section: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Whether a y/N prompt answer accepts
pub fn is_confirmed(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

impl Commands {
    /// Rerank override from `--rerank` / `--no-rerank`
    pub fn rerank_override(rerank: bool, no_rerank: bool) -> Option<bool> {
        match (rerank, no_rerank) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        }
    }
}
