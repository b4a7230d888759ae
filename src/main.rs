//! featflow CLI entry point

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use featflow::config::AnalysisConfig;
use featflow::core::runner::ProcessRunner;
use featflow::core::Workflow;
use featflow::model::{bids_to_runinfo, RunInfoOptions};
use featflow::{first_level_wf, second_level_wf, App};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "featflow", version, about = "FSL task-fMRI analysis pipelines")]
struct Cli {
    /// Analysis config (default: ./featflow.yml, then the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Per-subject GLM with FEAT
    FirstLevel {
        /// Print the execution plan instead of running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Group analysis with FWE and cluster thresholding
    SecondLevel {
        #[arg(long)]
        dry_run: bool,
    },
    /// Parse one run's events and confounds and print the run info as JSON
    Runinfo {
        #[arg(long)]
        events: PathBuf,
        #[arg(long)]
        confounds: PathBuf,
        /// Functional image the run info refers to
        #[arg(long, default_value = "bold.nii.gz")]
        bold: PathBuf,
        /// Confound column to use as regressor (repeatable; default: all non-motion columns)
        #[arg(long = "regressor")]
        regressors: Vec<String>,
        /// Where motion.par is written
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Export a pipeline graph
    Graph {
        level: Level,
        #[arg(long, value_enum, default_value_t = Format::Yaml)]
        format: Format,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Level {
    FirstLevel,
    SecondLevel,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Yaml,
    Json,
}

fn build(config: &AnalysisConfig, level: Level) -> Result<Workflow> {
    let wf = match level {
        Level::FirstLevel => {
            let first = config.first_level()?;
            first_level_wf(&first.subjects, &first.output_dir, first.fwhm, &first.options)?
        }
        Level::SecondLevel => {
            let second = config.second_level()?;
            let mut wf = second_level_wf(&second.output_dir, &second.bids_ref, &second.options)?;
            second.inputs.apply(&mut wf)?;
            wf
        }
    };
    Ok(wf)
}

async fn run_pipeline(config_path: Option<&Path>, level: Level, dry_run: bool) -> Result<()> {
    let (config, found) = AnalysisConfig::auto_load(config_path)?;
    log::info!("Loaded config from: {}", found.display());

    let wf = build(&config, level)?;
    let mut app = App::new(
        &wf,
        Arc::new(ProcessRunner),
        &config.work_dir,
        config.execution.clone(),
    )?;

    if dry_run {
        for (name, deps) in app.plan() {
            if deps.is_empty() {
                println!("{}", name);
            } else {
                println!("{} <- {}", name, deps.join(", "));
            }
        }
        return Ok(());
    }

    let report = app.run().await?;
    log::info!(
        "{}: {} nodes completed, {} failed, {} skipped",
        report.workflow,
        report.completed,
        report.failed.len(),
        report.skipped.len()
    );
    if let Some(path) = &report.session_file {
        log::info!("Run record: {}", path.display());
    }
    if let Some((node, error)) = report.failed.first() {
        anyhow::bail!("node {} failed: {}", node, error);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::FirstLevel { dry_run } => {
            run_pipeline(cli.config.as_deref(), Level::FirstLevel, dry_run).await
        }
        Commands::SecondLevel { dry_run } => {
            run_pipeline(cli.config.as_deref(), Level::SecondLevel, dry_run).await
        }
        Commands::Runinfo {
            events,
            confounds,
            bold,
            regressors,
            out_dir,
        } => {
            let options = RunInfoOptions {
                regressors_names: (!regressors.is_empty()).then_some(regressors),
                out_dir,
                ..Default::default()
            };
            let (info, realign_file, selection) =
                bids_to_runinfo(&bold, &events, &confounds, &options)?;
            let dump = serde_json::json!({
                "info": info,
                "realign_file": realign_file,
                "regressors": selection,
            });
            println!("{}", serde_json::to_string_pretty(&dump)?);
            Ok(())
        }
        Commands::Graph { level, format } => {
            let (config, _) = AnalysisConfig::auto_load(cli.config.as_deref())?;
            let wf = build(&config, level)?;
            let out = match format {
                Format::Yaml => wf.to_yaml()?,
                Format::Json => wf.to_json()?,
            };
            print!("{}", out);
            Ok(())
        }
    }
}
