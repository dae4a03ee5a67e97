mod display;
mod job;
mod predict;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bajor_ai::{ConcentrationModel, RuntimeConfig, SampleMode};
use bajor_core::{BasicAuth, Credentials, QuestionSet, TracingObserver};
use clap::{Args, Parser, Subcommand};

use crate::predict::{Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "bajor", version, about = "Batch galaxy morphology predictions over remote image catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Predict on every row of a catalog and save the prediction tensor.
    Predict {
        /// Catalog file (.csv or .parquet) with subject_id and image_url columns.
        #[arg(long, env = "BAJOR_CATALOG")]
        catalog: PathBuf,
        /// Output file; .csv or .hdf5 (anything else is written as CSV).
        #[arg(long, env = "BAJOR_OUTPUT")]
        output: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Summarise a saved prediction file as Dirichlet expectations and variances.
    Stats {
        /// Prediction file written by `predict`.
        predictions: PathBuf,
        /// Answer columns to summarise (default: all).
        #[arg(long, value_delimiter = ',')]
        answer: Vec<String>,
        /// Galaxy rows to print per answer.
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Check a job's credentials, then predict on its manifest.
    RunJob {
        /// Job description JSON: {"manifest_path", "job_id", "scheduled"}.
        job: PathBuf,
        #[arg(long, env = "BAJOR_OUTPUT_DIR", default_value = ".")]
        output_dir: PathBuf,
        #[arg(long, env = "BAJOR_JOB_USERNAME")]
        username: String,
        #[arg(long, env = "BAJOR_JOB_PASSWORD", hide_env_values = true)]
        password: String,
        #[command(flatten)]
        run: RunArgs,
    },
}

/// Model and pipeline options shared by `predict` and `run-job`.
/// Flags override the config file, which overrides built-in defaults.
#[derive(Args)]
struct RunArgs {
    /// Exported model: `model.onnx` or a directory containing it.
    #[arg(long, env = "BAJOR_MODEL")]
    model: PathBuf,
    /// Answer column names, in model output order.
    #[arg(long, env = "BAJOR_LABEL_COLS", value_delimiter = ',', required = true)]
    label_cols: Vec<String>,
    /// JSON pipeline config with optional `fetch`, `loader`, `runtime`, `sampling` sections.
    #[arg(long, env = "BAJOR_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "BAJOR_N_SAMPLES")]
    n_samples: Option<usize>,
    /// `independent` (re-run every pass) or `replicate` (copy one pass).
    #[arg(long, env = "BAJOR_SAMPLE_MODE")]
    sample_mode: Option<SampleMode>,
    #[arg(long, env = "BAJOR_BATCH_SIZE")]
    batch_size: Option<usize>,
    #[arg(long, env = "BAJOR_NUM_WORKERS")]
    num_workers: Option<usize>,
    #[arg(long, env = "BAJOR_RESIZE_SIZE")]
    resize_size: Option<u32>,
    /// Random-resized-crop area bounds, e.g. `0.7,0.8`.
    #[arg(long, env = "BAJOR_CROP_SCALE_BOUNDS", value_delimiter = ',')]
    crop_scale_bounds: Option<Vec<f32>>,
    #[arg(long, env = "BAJOR_GREYSCALE")]
    greyscale: bool,
    #[arg(long, env = "BAJOR_MAX_RETRIES")]
    max_retries: Option<u32>,
    #[arg(long, env = "BAJOR_BACKOFF_FACTOR")]
    backoff_factor: Option<f64>,
    #[arg(long, env = "BAJOR_ACCELERATOR")]
    accelerator: Option<String>,
    #[arg(long, env = "BAJOR_INTRA_THREADS")]
    intra_threads: Option<usize>,
}

impl RunArgs {
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_file(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(n) = self.n_samples {
            config.sampling.n_samples = n;
        }
        if let Some(mode) = self.sample_mode {
            config.sampling.mode = mode;
        }
        if let Some(n) = self.batch_size {
            config.loader.batch_size = n;
        }
        if let Some(n) = self.num_workers {
            config.loader.num_workers = n;
        }
        if let Some(size) = self.resize_size {
            config.loader.transform.resize_size = size;
        }
        if let Some(bounds) = &self.crop_scale_bounds {
            let [lo, hi] = bounds.as_slice() else {
                anyhow::bail!("--crop-scale-bounds takes two values, got {bounds:?}");
            };
            config.loader.transform.crop_scale_bounds = Some((*lo, *hi));
        }
        if self.greyscale {
            config.loader.transform.greyscale = true;
        }
        if let Some(n) = self.max_retries {
            config.fetch.retry.max_retries = n;
        }
        if let Some(f) = self.backoff_factor {
            config.fetch.retry.backoff_factor = f;
        }
        if let Some(acc) = &self.accelerator {
            config.runtime.accelerator = acc.clone();
        }
        if self.intra_threads.is_some() {
            config.runtime.intra_threads = self.intra_threads;
        }
        Ok(config)
    }
}

#[cfg(feature = "onnx")]
fn load_model(path: &Path, runtime: &RuntimeConfig) -> anyhow::Result<Box<dyn ConcentrationModel>> {
    let model = bajor_ai::OnnxModel::load(path, runtime)
        .with_context(|| format!("loading model {}", path.display()))?;
    Ok(Box::new(model))
}

#[cfg(not(feature = "onnx"))]
fn load_model(path: &Path, runtime: &RuntimeConfig) -> anyhow::Result<Box<dyn ConcentrationModel>> {
    runtime.validate()?;
    anyhow::bail!(
        "cannot load {}: bajor was built without ONNX Runtime (rebuild with `--features onnx`)",
        path.display()
    )
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    tracing::info!("bajor v{}", env!("CARGO_PKG_VERSION"));

    let cli = Cli::parse();
    let observer = Arc::new(TracingObserver);

    match cli.command {
        Command::Predict {
            catalog,
            output,
            run,
        } => {
            let config = run.pipeline_config()?;
            let model = load_model(&run.model, &config.runtime)?;
            let catalog = bajor_store::read_catalog(&catalog)
                .with_context(|| format!("loading catalog {}", catalog.display()))?;
            let pipeline = Pipeline::new(config, observer)?;
            let stats = pipeline.predict(Arc::new(catalog), model.as_ref(), &run.label_cols, &output)?;
            display::print_run_stats(&stats);
        }
        Command::Stats {
            predictions,
            answer,
            limit,
        } => {
            let saved = bajor_store::read_predictions(&predictions)
                .with_context(|| format!("reading {}", predictions.display()))?;
            let questions = QuestionSet::from_answer_columns(&saved.label_cols);
            let answers = if answer.is_empty() {
                saved.label_cols.clone()
            } else {
                answer
            };
            for name in &answers {
                let (index, question) = questions.locate(name)?;
                let summary = bajor_ai::summarise(saved.predictions.view(), question, index)?;
                display::print_answer_summary(name, question, &saved.ids, &summary, limit);
            }
        }
        Command::RunJob {
            job,
            output_dir,
            username,
            password,
            run,
        } => {
            let config = run.pipeline_config()?;
            let model = load_model(&run.model, &config.runtime)?;
            let pipeline = Pipeline::new(config, observer)?;
            let stats = job::run_job(
                &job,
                &BasicAuth::from_env(),
                &Credentials::new(username, password),
                &pipeline,
                model.as_ref(),
                &run.label_cols,
                &output_dir,
            )?;
            display::print_run_stats(&stats);
        }
    }

    Ok(())
}
