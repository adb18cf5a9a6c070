use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use recuento::cli::{Cli, Command};
use recuento::tree::AggregationTree;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_tree(path: &Path) -> Result<AggregationTree> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    AggregationTree::from_json(&text)
        .with_context(|| format!("failed to parse tree file {}", path.display()))
}

fn write_tree(path: &Path, tree: &AggregationTree) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = tree.to_json()?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn run_merge(output: &Path, inputs: &[std::path::PathBuf]) -> Result<()> {
    let mut merged: Option<AggregationTree> = None;
    for input in inputs {
        let tree = load_tree(input)?;
        match merged.as_mut() {
            None => merged = Some(tree),
            Some(merged) => merged
                .merge(&tree)
                .with_context(|| format!("cannot merge {}", input.display()))?,
        }
        println!("Merged: {}", input.display());
    }

    // clap guarantees at least two inputs
    let merged = merged.context("no input files")?;
    write_tree(output, &merged)?;
    println!("Output: {} ({} files)", output.display(), inputs.len());
    Ok(())
}

fn run_diff(output: &Path, test: &Path, base: &Path) -> Result<()> {
    let test_tree = load_tree(test)?;
    println!("Loaded: {}", test.display());

    let base_tree = load_tree(base)?;
    println!("Loaded: {}", base.display());

    let diff = AggregationTree::diff(&test_tree, &base_tree)
        .context("cannot diff trees with different column schemas")?;
    write_tree(output, &diff)?;
    println!("Output: {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    match &args.command {
        Command::Merge { output, inputs } => run_merge(output, inputs),
        Command::Diff { output, test, base } => run_diff(output, test, base),
    }
}
