//! CLI for the integration agent.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use integrator::io::embed::{HashEmbedder, embed_with_retry};
use integrator::io::indexer::index_project;
use integrator::io::policy::CommandPolicy;
use integrator::io::store::{ChunkStore, LoadedIndex};
use integrator::io::tools::Toolbox;
use integrator::logging;
use integrator::looping::run_mission;
use integrator::preflight::{PreflightMode, preflight};

#[derive(Parser)]
#[command(
    name = "integrator",
    version,
    about = "Agent-driven content-platform integration for generated web projects"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the retrieval index for the project's source tree.
    Index {
        /// Project root to index.
        project: PathBuf,
    },
    /// Run the full integration mission against the project.
    Run {
        /// Project root to integrate.
        project: PathBuf,
    },
    /// Query the persisted index (debugging aid).
    Retrieve {
        /// Project root whose index to query.
        project: PathBuf,
        /// Query text.
        #[arg(long)]
        query: String,
        /// Maximum chunks to return.
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// Run the validation gate once and report the outcome.
    Check {
        /// Project root to validate.
        project: PathBuf,
    },
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Index { project } => cmd_index(&project),
        Command::Run { project } => cmd_run(&project),
        Command::Retrieve { project, query, k } => cmd_retrieve(&project, &query, k),
        Command::Check { project } => cmd_check(&project),
    }
}

fn cmd_index(project: &Path) -> Result<()> {
    let checked = preflight(project, PreflightMode::Tooling)?;
    let store = ChunkStore::new(&checked.paths.index_dir);
    let embedder = HashEmbedder::new(checked.config.index.embedding_dim);

    let summary = index_project(
        &checked.paths.project_root,
        &store,
        &checked.config.index,
        &embedder,
    )?;
    println!(
        "indexed {} files into {} chunks ({})",
        summary.file_count,
        summary.chunk_count,
        store.dir().display()
    );
    Ok(())
}

fn cmd_run(project: &Path) -> Result<()> {
    let checked = preflight(project, PreflightMode::Mission)?;
    let policy = CommandPolicy::new(checked.config.policy.command.clone())?;
    let embedder = Box::new(HashEmbedder::new(checked.config.index.embedding_dim));

    let outcome = run_mission(&checked, &policy, embedder, |step| {
        println!(
            "[{}] {} {}",
            step.iter,
            step.action,
            if step.ok { "ok" } else { "err" }
        );
    })?;

    println!("{}", outcome.summary_line());
    Ok(())
}

fn cmd_retrieve(project: &Path, query: &str, k: usize) -> Result<()> {
    let checked = preflight(project, PreflightMode::Tooling)?;
    let store = ChunkStore::new(&checked.paths.index_dir);
    let index = store.load().context("load chunk index")?;
    if index.is_empty() {
        println!("(index is empty; run `integrator index` first)");
        return Ok(());
    }

    let embedder = HashEmbedder::new(checked.config.index.embedding_dim);
    let embedding = embed_with_retry(
        &embedder,
        query,
        checked.config.index.embed_max_retries,
        Duration::from_secs(checked.config.index.embed_retry_backoff_secs),
    )?;
    for chunk in index.nearest(&embedding, k) {
        println!("--- {}:{}-{} ---", chunk.path, chunk.start, chunk.end);
        println!("{}", chunk.text);
    }
    Ok(())
}

fn cmd_check(project: &Path) -> Result<()> {
    let checked = preflight(project, PreflightMode::Tooling)?;
    let toolbox = Toolbox::new(
        checked.paths.project_root.clone(),
        &checked.config,
        LoadedIndex::empty(),
        Box::new(HashEmbedder::new(checked.config.index.embedding_dim)),
    );

    let outcome = toolbox.validate();
    if outcome.passed {
        println!("validation passed");
    } else {
        println!("validation failed (exit status {:?})", outcome.exit_code);
        if !outcome.output.trim().is_empty() {
            println!("{}", outcome.output);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_index() {
        let cli = Cli::parse_from(["integrator", "index", "./site"]);
        assert!(matches!(cli.command, Command::Index { .. }));
    }

    #[test]
    fn parse_retrieve_with_defaults() {
        let cli = Cli::parse_from(["integrator", "retrieve", "./site", "--query", "getPage"]);
        match cli.command {
            Command::Retrieve { query, k, .. } => {
                assert_eq!(query, "getPage");
                assert_eq!(k, 5);
            }
            _ => panic!("expected retrieve"),
        }
    }

    #[test]
    fn parse_run() {
        let cli = Cli::parse_from(["integrator", "run", "./site"]);
        assert!(matches!(cli.command, Command::Run { .. }));
    }
}
