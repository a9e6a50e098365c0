use anyhow::Context;
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use workflow::config::WorkflowConfig;
use workflow::runner::{Chain, Runner};

mod generator;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Offline OFDM radar and array DOA scenario driver")]
struct Args {
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = Chain::All)]
    chain: Chain,
    /// Write the JSON report here instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
    /// Seed for both the waveform and the synthetic scene
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    chunk_size: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let workflow_config = match &args.workflow {
        Some(path) => WorkflowConfig::load(path)?,
        None => WorkflowConfig::default(),
    }
    .with_overrides(args.seed, args.chunk_size);

    let runner = Runner::new(workflow_config);
    let report = runner.execute(args.chain)?;
    let rendered = serde_json::to_string_pretty(&report).context("serializing report")?;

    match args.report {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating report directory {}", parent.display()))?;
            }
            fs::write(&path, rendered)
                .with_context(|| format!("writing report {}", path.display()))?;
            log::info!("report written to {}", path.display());
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
