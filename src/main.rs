use anyhow::Result;
use clap::Parser;

use codelore::cli::{Cli, Command};
use codelore::commands;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_serve = matches!(cli.command, Command::Serve { .. });
    let default_level = if is_serve { "info" } else { "warn" };

    // Tracing goes to stderr for all commands so stdout stays clean for CLI
    // output. Serve mode logs lifecycle events at info; one-shot commands only
    // surface warnings unless RUST_LOG overrides.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Serve { path } => runtime.block_on(commands::cmd_serve(&path)),
        Command::Index {
            path,
            files,
            force,
            no_embed,
        } => runtime.block_on(commands::cmd_index(&path, &files, force, no_embed, cli.json)),
        Command::Query {
            task,
            path,
            files,
            symbols,
            current_file,
            current_symbol,
        } => runtime.block_on(commands::cmd_query(
            &task,
            &path,
            &files,
            &symbols,
            current_file.as_deref(),
            current_symbol.as_deref(),
            cli.json,
        )),
        Command::Standards { path } => runtime.block_on(commands::cmd_standards(&path, cli.json)),
        Command::Stats { path } => commands::cmd_stats(&path, cli.json),
    }
}
