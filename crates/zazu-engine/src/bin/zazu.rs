//! `zazu`: select, tune, train and serve a model from the files in a working
//! directory, locally or through the deployed platform services.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use zazu_engine::{deploy, execute_remote, init_logging, update, ArtifactPaths, ZaZu};
use zazu_launcher::{ensure_session, Platform, RestPlatform};
use zazu_types::{GlobalConfig, PipelineStep, RunConfig};

#[derive(Parser, Debug)]
#[command(name = "zazu")]
#[command(about = "Automated model selection, hyperparameter search, training and inference", long_about = None)]
struct Cli {
    /// Run the selected steps on the deployed zazu service
    #[arg(long)]
    remote: bool,

    /// Drive the selected steps from here, but run every trial, training and
    /// inference job on the deployed trial and trainer services
    #[arg(long, conflicts_with = "remote")]
    remote_trials: bool,

    /// Push the package and deploy the trial, trainer and zazu services
    #[arg(long)]
    deploy: bool,

    /// Update the deployed services to the latest package
    #[arg(long)]
    update: bool,

    /// Select a model and search its hyperparameters
    #[arg(long)]
    search: bool,

    /// Train the selected model with the best trial
    #[arg(long)]
    train: bool,

    /// Run inference with the trained checkpoint
    #[arg(long)]
    predict: bool,

    /// Directory holding the spec files and run artifacts
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn steps(&self) -> Vec<PipelineStep> {
        [
            (self.search, PipelineStep::Search),
            (self.train, PipelineStep::Train),
            (self.predict, PipelineStep::Predict),
        ]
        .into_iter()
        .filter_map(|(enabled, step)| enabled.then_some(step))
        .collect()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let paths = ArtifactPaths::new(&cli.workdir);
    let steps = cli.steps();

    let mut trial_platform = None;
    if cli.deploy || cli.update || cli.remote || cli.remote_trials {
        let global = GlobalConfig::load(paths.global_configs())
            .context("platform commands need global_configs.json")?;
        let rest = Arc::new(RestPlatform::new(&global.platform_url));

        if cli.deploy {
            let services = deploy(rest.as_ref(), &global, paths.root()).await?;
            info!(count = services.len(), project = %global.project, "deployment finished");
        }
        if cli.update {
            update(rest.as_ref(), &global).await?;
        }
        if cli.remote {
            let configs = RunConfig::load(paths.configs())?;
            let outputs = execute_remote(rest.as_ref(), &global, &configs, &steps).await?;
            for (step, output) in steps.iter().zip(outputs) {
                info!(%step, "remote step finished");
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            return Ok(());
        }
        if cli.remote_trials {
            ensure_session(rest.as_ref(), &global.environment).await?;
            trial_platform = Some(rest);
        }
    }

    if steps.is_empty() {
        return Ok(());
    }

    let mut zazu = match trial_platform {
        Some(rest) => {
            let configs = RunConfig::load(paths.configs())?;
            let dataset = rest.dataset(&configs.dataset).await?;
            ZaZu::open_remote(&cli.workdir, rest, &dataset.project_id)?
        }
        None => ZaZu::open_local(&cli.workdir)?,
    };
    if cli.search {
        zazu.find_best_model()?;
        zazu.hp_search().await?;
    }
    if cli.train {
        let checkpoint = zazu.train_new_model().await?;
        info!(path = %checkpoint.display(), "model trained");
    }
    if cli.predict {
        let predictions = zazu.run_inference().await?;
        println!("{}", serde_json::to_string_pretty(&predictions)?);
    }
    Ok(())
}
