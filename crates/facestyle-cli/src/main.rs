use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facestyle_core::dataset::list_label_names;
use facestyle_core::{Dataset, LoadOptions, ScrfdAligner};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facestyle", about = "Prepare aligned face datasets for stylizer fine-tuning")]
struct Cli {
    /// TOML configuration file (FACESTYLE_* variables take precedence)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Align every labeled image under DIR and write the prepared dataset
    Prepare {
        /// Directory with one subdirectory per style label
        dir: PathBuf,
        /// Output directory for aligned images and manifest.json
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List style labels and their indices without loading any model
    Labels {
        dir: PathBuf,
    },
    /// Summarize a prepared dataset
    Inspect {
        dir: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare { dir, output } => {
            let config = Config::load(cli.config.as_deref())?;
            prepare(&config, &dir, &output)
        }
        Commands::Labels { dir } => labels(&dir),
        Commands::Inspect { dir } => inspect(&dir),
    }
}

fn prepare(config: &Config, dir: &Path, output: &Path) -> Result<()> {
    tracing::debug!(?config, "configuration loaded");

    let model_path = config.detector_model_path();
    let mut aligner = ScrfdAligner::load(&model_path, config.aligner_options())
        .with_context(|| format!("loading face aligner from {}", model_path.display()))?;

    let options = LoadOptions {
        skip_undetected: config.skip_undetected,
    };
    let dataset = Dataset::from_folder_with(dir, &mut aligner, options)
        .with_context(|| format!("loading dataset from {}", dir.display()))?;

    let manifest = dataset
        .save(output)
        .with_context(|| format!("writing prepared dataset to {}", output.display()))?;

    println!(
        "Prepared {} images across {} labels into {}",
        manifest.entries.len(),
        manifest.label_names.len(),
        output.display()
    );
    print_label_counts(dataset.label_names(), &dataset.label_counts());
    Ok(())
}

fn labels(dir: &Path) -> Result<()> {
    let lines = label_lines(dir)?;
    if lines.is_empty() {
        println!("No label directories under {}", dir.display());
    }
    for (index, name) in lines {
        println!("{index}\t{name}");
    }
    Ok(())
}

/// (index, label) pairs in the order the loader assigns them.
fn label_lines(dir: &Path) -> Result<Vec<(usize, String)>> {
    let root = std::fs::canonicalize(dir).with_context(|| format!("resolving {}", dir.display()))?;
    Ok(list_label_names(&root)?.into_iter().enumerate().collect())
}

fn inspect(dir: &Path) -> Result<()> {
    let dataset = Dataset::load_prepared(dir)
        .with_context(|| format!("loading prepared dataset from {}", dir.display()))?;

    println!("size: {}", dataset.size());
    println!("num_label: {}", dataset.num_classes());
    if let Some(first) = dataset.samples().first() {
        let (w, h) = first.image.dimensions();
        println!("aligned size: {w}x{h}");
    }
    print_label_counts(dataset.label_names(), &dataset.label_counts());
    Ok(())
}

fn print_label_counts(names: &[String], counts: &[usize]) {
    for (index, (name, count)) in names.iter().zip(counts).enumerate() {
        println!("  {index}\t{name}\t{count}");
    }
}
