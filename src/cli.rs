use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "codelore")]
#[command(about = "Local code intelligence: index your project, query it with a local LLM.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP daemon for a project
    Serve {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Index a project into the local database, no daemon needed
    Index {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Index only these paths, relative to the project root
        #[arg(long = "file")]
        files: Vec<String>,

        /// Force full re-index, bypassing change detection
        #[arg(long)]
        force: bool,

        /// Skip the embedding pass (structural index only)
        #[arg(long)]
        no_embed: bool,
    },

    /// Run one query against the indexed project
    Query {
        /// The task, in natural language
        task: String,

        /// Project root (defaults to current directory)
        #[arg(long, default_value = ".")]
        path: String,

        /// Hint: a relevant file path (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,

        /// Hint: a relevant symbol name (repeatable)
        #[arg(long = "symbol")]
        symbols: Vec<String>,

        /// Hint: the file currently open in the editor
        #[arg(long)]
        current_file: Option<String>,

        /// Hint: the symbol under the cursor
        #[arg(long)]
        current_symbol: Option<String>,
    },

    /// Extract coding standards from the indexed project
    Standards {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Print database row counts
    Stats {
        /// Project root (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },
}
