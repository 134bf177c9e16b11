//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "evidx",
    version,
    about = "Index project evidence and search it with hybrid retrieval",
    long_about = "evidx chunks project evidence (source files, configuration, READMEs, model and \
                  dataset cards), embeds the chunks, and answers queries by fusing vector \
                  similarity with keyword search. Keyword search falls back to BM25 or substring \
                  matching when the store has no native full-text index."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/evidx/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply (e.g., "offline")
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chunk, embed and store evidence files
    Ingest {
        /// Project the evidence belongs to
        #[arg(long)]
        project: i64,

        /// Commit the files were read at
        #[arg(long)]
        commit: Option<String>,

        /// Files to ingest
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Hybrid search over a project's evidence
    Search {
        /// Search query text
        query: String,

        #[arg(long)]
        project: i64,

        /// Maximum number of results (defaults to search.default_limit)
        #[arg(short, long)]
        limit: Option<usize>,

        /// Show results in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the capability report as JSON
    Capabilities {
        #[arg(long)]
        project: Option<i64>,
    },

    /// Drop and rebuild every embedding of a project
    Reembed {
        #[arg(long)]
        project: i64,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
