//! mlpilot - train, deploy and query a CIFAR-10 classifier on a managed
//! ML platform.
//!
//! ## Commands
//!
//! - `fetch-dataset`: download and unpack CIFAR-10, seed prediction samples
//! - `upload`: upload a local dataset directory to object storage
//! - `train`: submit a training job and wait for it
//! - `deploy`: host a trained model on an endpoint
//! - `predict`: classify sample images with a running endpoint
//! - `delete-endpoint`: tear an endpoint down
//! - `samples extract`: pull labeled samples out of a CIFAR-10 batch file
//! - `run`: every step above, end to end

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ml_platform::{ObjectStore, TrainingPlatform};
use mlpilot_core::{
    extract_from_batch, load_samples, seed_samples, upload_dataset, write_samples,
    DatasetLocation, DeployConfig, Endpoint, Prediction, Session, SessionOverrides,
    TrainingConfig, TrainingJob, Workflow, WorkflowConfig, WorkflowReport,
};
use platform_client::{DatasetFetcher, DatasetSource, PlatformClient, PlatformConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "mlpilot")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Managed ML training and hosting workflow", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Workflow config file (TOML)
    #[arg(short, long, global = true, env = "MLPILOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download and unpack the dataset, then seed prediction samples from its
    /// test batch (each part is skipped when already present)
    FetchDataset {
        /// Download root (default: `[dataset] root`)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Expected SHA-256 of the archive
        #[arg(long)]
        sha256: Option<String>,
    },

    /// Upload a local dataset directory and print its location
    Upload {
        /// Directory to upload (default: `<root>/<name>` from config)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Dataset name under the `data/` prefix
        #[arg(long)]
        name: Option<String>,
    },

    /// Submit a training job and wait for it to finish
    Train {
        /// Dataset location returned by `upload`
        #[arg(long)]
        location: String,

        #[command(flatten)]
        overrides: TrainOverrides,
    },

    /// Deploy a completed training job to an endpoint
    Deploy {
        /// Training job name
        #[arg(long)]
        job: String,

        /// Inference instance type
        #[arg(long)]
        instance_type: Option<String>,

        /// Number of inference instances
        #[arg(long)]
        instance_count: Option<u32>,

        /// Endpoint name (default: the job name)
        #[arg(long)]
        endpoint_name: Option<String>,
    },

    /// Classify sample images with a running endpoint
    Predict {
        /// Endpoint name
        #[arg(long)]
        endpoint: String,

        /// Directory of `.bin` samples (default: `[dataset] samples_dir`)
        #[arg(long)]
        samples: Option<PathBuf>,
    },

    /// Delete an endpoint
    DeleteEndpoint {
        /// Endpoint name
        name: String,
    },

    /// Sample image utilities
    Samples {
        #[command(subcommand)]
        action: SamplesAction,
    },

    /// Run the whole workflow: upload, train, deploy, predict, delete
    Run {
        /// Download the dataset first if it is missing
        #[arg(long)]
        fetch: bool,

        /// Leave the endpoint running after predictions
        #[arg(long)]
        keep_endpoint: bool,

        /// Print the run report as JSON
        #[arg(long)]
        report_json: bool,
    },
}

/// Command-line values that replace `[training]` settings.
#[derive(Args, Debug, Default)]
struct TrainOverrides {
    /// Training script
    #[arg(long)]
    entry_point: Option<PathBuf>,

    /// Training instance type
    #[arg(long)]
    instance_type: Option<String>,

    /// Number of training instances
    #[arg(long)]
    instance_count: Option<u32>,

    /// Minibatch size
    #[arg(long)]
    batch_size: Option<u32>,

    /// Number of epochs
    #[arg(long)]
    epochs: Option<u32>,

    /// SGD learning rate
    #[arg(long)]
    learning_rate: Option<f64>,

    /// SGD momentum
    #[arg(long)]
    momentum: Option<f64>,

    /// Job name prefix
    #[arg(long)]
    base_job_name: Option<String>,
}

impl TrainOverrides {
    fn apply(self, training: &mut TrainingConfig) {
        if let Some(entry_point) = self.entry_point {
            training.entry_point = entry_point;
        }
        if let Some(instance_type) = self.instance_type {
            training.instance_type = instance_type;
        }
        if let Some(count) = self.instance_count {
            training.instance_count = count;
        }
        let hp = &mut training.hyperparameters;
        if let Some(batch_size) = self.batch_size {
            hp.batch_size = batch_size;
        }
        if let Some(epochs) = self.epochs {
            hp.epochs = epochs;
        }
        if let Some(learning_rate) = self.learning_rate {
            hp.learning_rate = learning_rate;
        }
        if let Some(momentum) = self.momentum {
            hp.momentum = momentum;
        }
        if self.base_job_name.is_some() {
            training.base_job_name = self.base_job_name;
        }
    }
}

#[derive(Subcommand)]
enum SamplesAction {
    /// Write the first records of each class from a CIFAR-10 batch file
    Extract {
        /// CIFAR-10 binary batch, e.g. `test_batch.bin`
        #[arg(long)]
        batch: PathBuf,

        /// Output directory (default: `[dataset] samples_dir`)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Samples per class
        #[arg(long, default_value = "1")]
        per_class: usize,
    },
}

/// Platform handles shared by every command.
struct Backend {
    platform: Arc<dyn TrainingPlatform>,
    store: Arc<dyn ObjectStore>,
    overrides: SessionOverrides,
}

impl Backend {
    fn from_env(config: &WorkflowConfig) -> Result<Self> {
        let platform_config = PlatformConfig::from_env();
        let mut overrides = config.session.clone();
        if overrides.bucket.is_none() {
            overrides.bucket = platform_config.bucket.clone();
        }
        let client = Arc::new(
            PlatformClient::new(platform_config).context("Failed to create platform client")?,
        );
        Ok(Backend {
            platform: client.clone(),
            store: client,
            overrides,
        })
    }

    async fn session(&self) -> Result<Session> {
        Session::bootstrap(self.platform.as_ref(), &self.overrides)
            .await
            .context("Failed to resolve platform session")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mlpilot_core::init_tracing(cli.json, level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::FetchDataset { dir, sha256 } => {
            cmd_fetch_dataset(&config, dir.as_deref(), sha256.as_deref())
                .await
                .map(|_| ())
        }
        Commands::Samples {
            action:
                SamplesAction::Extract {
                    batch,
                    out,
                    per_class,
                },
        } => {
            let out = out.unwrap_or_else(|| config.dataset.samples_dir.clone());
            cmd_samples_extract(&batch, &out, per_class)
        }
        Commands::Upload { dir, name } => {
            let backend = Backend::from_env(&config)?;
            let dir = dir.unwrap_or_else(|| config.dataset.local_dir());
            let name = name.unwrap_or_else(|| config.dataset.name.clone());
            cmd_upload(&backend, &dir, &name).await
        }
        Commands::Train {
            location,
            overrides,
        } => {
            let backend = Backend::from_env(&config)?;
            let mut config = config;
            overrides.apply(&mut config.training);
            cmd_train(&backend, &config, &location).await
        }
        Commands::Deploy {
            job,
            instance_type,
            instance_count,
            endpoint_name,
        } => {
            let backend = Backend::from_env(&config)?;
            let mut deploy = config.deploy.clone();
            if let Some(instance_type) = instance_type {
                deploy.instance_type = instance_type;
            }
            if let Some(count) = instance_count {
                deploy.instance_count = count;
            }
            if endpoint_name.is_some() {
                deploy.endpoint_name = endpoint_name;
            }
            cmd_deploy(&backend, &job, &deploy, &config).await
        }
        Commands::Predict { endpoint, samples } => {
            let backend = Backend::from_env(&config)?;
            let samples = samples.unwrap_or_else(|| config.dataset.samples_dir.clone());
            cmd_predict(&backend, &endpoint, &samples).await
        }
        Commands::DeleteEndpoint { name } => {
            let backend = Backend::from_env(&config)?;
            cmd_delete_endpoint(&backend, &name).await
        }
        Commands::Run {
            fetch,
            keep_endpoint,
            report_json,
        } => {
            let backend = Backend::from_env(&config)?;
            if fetch {
                cmd_fetch_dataset(&config, None, None).await?;
            }
            cmd_run(&backend, config, keep_endpoint, report_json).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkflowConfig> {
    let Some(path) = path else {
        return Ok(WorkflowConfig::default());
    };
    let config = WorkflowConfig::load(path)
        .with_context(|| format!("Failed to load config {:?}", path))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(config.resolve_paths(base))
}

async fn cmd_fetch_dataset(
    config: &WorkflowConfig,
    dir: Option<&Path>,
    sha256: Option<&str>,
) -> Result<PathBuf> {
    let root = dir
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.dataset.root.clone());

    let mut source = DatasetSource::cifar10();
    source.name = config.dataset.name.clone();
    if let Some(url) = &config.dataset.url {
        source = source.with_url(url);
    }
    if let Some(sha256) = sha256.or(config.dataset.sha256.as_deref()) {
        source = source.with_sha256(sha256);
    }

    let fetcher = DatasetFetcher::new().context("Failed to create dataset downloader")?;
    let local = fetcher
        .fetch(&source, &root)
        .await
        .with_context(|| format!("Failed to fetch dataset from {}", source.url))?;
    println!("Dataset {} ready at {:?}", source.name, local);

    let samples_dir = &config.dataset.samples_dir;
    let seeded = seed_samples(&local, samples_dir, 1)
        .with_context(|| format!("Failed to seed samples into {:?}", samples_dir))?;
    if seeded > 0 {
        println!("Wrote {} samples to {:?}", seeded, samples_dir);
    }
    Ok(local)
}

fn cmd_samples_extract(batch: &Path, out: &Path, per_class: usize) -> Result<()> {
    let bytes = std::fs::read(batch).with_context(|| format!("Failed to read {:?}", batch))?;
    let samples = extract_from_batch(&bytes, per_class)
        .with_context(|| format!("Failed to decode batch {:?}", batch))?;
    let paths = write_samples(&samples, out)
        .with_context(|| format!("Failed to write samples to {:?}", out))?;
    for path in &paths {
        println!("{}", path.display());
    }
    println!("Wrote {} samples to {:?}", paths.len(), out);
    Ok(())
}

async fn cmd_upload(backend: &Backend, dir: &Path, name: &str) -> Result<()> {
    let session = backend.session().await?;
    let location = upload_dataset(backend.store.as_ref(), &session.bucket, dir, name)
        .await
        .with_context(|| format!("Failed to upload {:?}", dir))?;
    println!("{}", location);
    Ok(())
}

async fn cmd_train(backend: &Backend, config: &WorkflowConfig, location: &str) -> Result<()> {
    let location: DatasetLocation = location
        .parse()
        .with_context(|| format!("Invalid dataset location: {}", location))?;
    let session = backend.session().await?;
    let descriptor = config
        .training
        .descriptor(&session.role)
        .context("Invalid training configuration")?;

    let job = TrainingJob::submit(
        backend.platform.as_ref(),
        backend.store.as_ref(),
        &session,
        descriptor,
        &location,
        &config.wait.policy(),
    )
    .await
    .context("Training failed")?;

    println!("Training job: {}", job.name());
    println!("Model:        {}", job.model_artifact());
    Ok(())
}

async fn cmd_deploy(
    backend: &Backend,
    job_name: &str,
    deploy: &DeployConfig,
    config: &WorkflowConfig,
) -> Result<()> {
    let job = TrainingJob::attach(backend.platform.as_ref(), job_name)
        .await
        .with_context(|| format!("Training job not usable: {}", job_name))?;
    let endpoint = Endpoint::deploy(
        backend.platform.clone(),
        &job,
        deploy,
        &config.wait.policy(),
    )
    .await
    .context("Deployment failed")?;

    println!(
        "Endpoint {} in service ({} x {})",
        endpoint.name(),
        endpoint.instance_count(),
        endpoint.instance_type()
    );
    println!("Delete it with: mlpilot delete-endpoint {}", endpoint.name());
    endpoint.keep();
    Ok(())
}

async fn cmd_predict(backend: &Backend, endpoint_name: &str, samples_dir: &Path) -> Result<()> {
    let samples = load_samples(samples_dir)
        .with_context(|| format!("Failed to load samples from {:?}", samples_dir))?;
    let endpoint = Endpoint::attach(backend.platform.clone(), endpoint_name)
        .await
        .with_context(|| format!("Endpoint not available: {}", endpoint_name))?;

    let result = endpoint.predict_all(&samples).await;
    // Standalone predict never owns the endpoint's lifetime.
    endpoint.keep();
    let predictions = result.context("Prediction failed")?;
    print_predictions(&predictions);
    Ok(())
}

async fn cmd_delete_endpoint(backend: &Backend, name: &str) -> Result<()> {
    backend
        .platform
        .delete_endpoint(name)
        .await
        .with_context(|| format!("Failed to delete endpoint {}", name))?;
    mlpilot_core::emit_endpoint_deleted(name);
    println!("Deleted endpoint {}", name);
    Ok(())
}

async fn cmd_run(
    backend: &Backend,
    mut config: WorkflowConfig,
    keep_endpoint: bool,
    report_json: bool,
) -> Result<()> {
    config.session = backend.overrides.clone();
    let workflow = Workflow::new(backend.platform.clone(), backend.store.clone(), config)
        .keep_endpoint(keep_endpoint);
    let report = workflow.run().await.context("Workflow failed")?;
    print_report(&report, report_json)
}

fn print_predictions(predictions: &[Prediction]) {
    for p in predictions {
        let verdict = match p.is_correct() {
            Some(true) => " ok",
            Some(false) => " miss",
            None => "",
        };
        println!("{:<16} {} ({}){}", p.sample, p.class_index, p.class_name, verdict);
    }
}

fn print_report(report: &WorkflowReport, as_json: bool) -> Result<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("Dataset:   {}", report.dataset_location);
    println!("Job:       {}", report.job_name);
    println!("Endpoint:  {}", report.endpoint_name);
    print_predictions(&report.predictions);
    if let Some(accuracy) = report.accuracy() {
        println!("Accuracy:  {:.0}%", accuracy * 100.0);
    }
    if report.endpoint_deleted {
        info!(endpoint_name = %report.endpoint_name, "endpoint deleted");
    } else {
        println!(
            "Endpoint still running; delete it with: mlpilot delete-endpoint {}",
            report.endpoint_name
        );
    }
    Ok(())
}
