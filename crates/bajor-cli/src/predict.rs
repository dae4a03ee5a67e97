//! Prediction pipeline: catalog → batches → repeated model passes → saved tensor.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use bajor_ai::{ConcentrationModel, RuntimeConfig, SampleMode, StochasticSampler};
use bajor_core::{Catalog, Event, Observer};
use bajor_data::{DataModule, LoaderConfig, Stage};
use bajor_fetch::{FetchConfig, Fetcher};
use bajor_store::OutputFormat;
use serde::Deserialize;

/// Everything a run needs besides the catalog and the model.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub fetch: FetchConfig,
    pub loader: LoaderConfig,
    pub runtime: RuntimeConfig,
    pub sampling: SamplingConfig,
}

impl PipelineConfig {
    /// Read a JSON config file; missing sections keep their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub n_samples: usize,
    pub mode: SampleMode,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            n_samples: 5,
            mode: SampleMode::Independent,
        }
    }
}

#[derive(Debug)]
pub struct PredictStats {
    pub shape: [usize; 3],
    pub elapsed_secs: f64,
    pub format: OutputFormat,
    pub output: PathBuf,
}

/// One configured prediction run. The fetcher (and its connection pool) is
/// built once here and shared by every loader worker.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<Fetcher>,
    observer: Arc<dyn Observer>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, observer: Arc<dyn Observer>) -> anyhow::Result<Self> {
        let fetcher =
            Fetcher::new(&config.fetch, observer.clone()).context("building HTTP client")?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher), observer))
    }

    pub fn with_fetcher(
        config: PipelineConfig,
        fetcher: Arc<Fetcher>,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            config,
            fetcher,
            observer,
        }
    }

    /// Predict on every catalog row and save the `(galaxies, answers, samples)`
    /// tensor to `output`. Nothing is written unless every row succeeds.
    pub fn predict(
        &self,
        catalog: Arc<Catalog>,
        model: &dyn ConcentrationModel,
        label_cols: &[String],
        output: &Path,
    ) -> anyhow::Result<PredictStats> {
        // Row order of the output follows this list.
        let ids = catalog.subject_ids();
        anyhow::ensure!(!ids.is_empty(), "catalog has no rows to predict on");
        anyhow::ensure!(!label_cols.is_empty(), "no answer columns given");

        let mut datamodule = DataModule::new(
            &self.config.loader,
            self.fetcher.clone(),
            self.observer.clone(),
        )
        .context("building data module")?
        .with_predict_catalog(catalog);
        datamodule.setup(Stage::Predict)?;
        let loader = datamodule.predict_loader()?;

        let sampling = &self.config.sampling;
        let sampler =
            StochasticSampler::new(sampling.n_samples, sampling.mode, self.observer.clone())?
                .with_answers(label_cols.len());

        let start = Instant::now();
        self.observer.event(&Event::RunStarted {
            n_galaxies: ids.len(),
            n_samples: sampling.n_samples,
            started_at: chrono::Local::now().to_rfc3339(),
        });

        let predictions = sampler.run(model, &loader).context("running predictions")?;
        let (g, a, s) = predictions.dim();

        let elapsed = start.elapsed();
        self.observer.event(&Event::RunFinished {
            shape: [g, a, s],
            elapsed,
            finished_at: chrono::Local::now().to_rfc3339(),
        });

        let format = bajor_store::write_predictions(
            predictions.view(),
            &ids,
            label_cols,
            output,
            self.observer.as_ref(),
        )
        .with_context(|| format!("saving predictions to {}", output.display()))?;

        Ok(PredictStats {
            shape: [g, a, s],
            elapsed_secs: elapsed.as_secs_f64(),
            format,
            output: output.to_path_buf(),
        })
    }
}
