//! Stage-aware data module and the ordered, parallel batch loader.

use std::collections::HashSet;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use bajor_core::{Catalog, Observer};
use bajor_fetch::Fetcher;
use ndarray::{Array4, s};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Deserialize;

use crate::DataError;
use crate::dataset::{CatalogDataset, CatalogLabels, LabelStrategy, NoLabels, Sample};
use crate::decode::{DecodeConfig, Decoder};
use crate::transform::{ImageTransform, StandardTransform, TransformConfig};

/// What the data module is being prepared for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fit,
    Validate,
    Test,
    Predict,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fit => "fit",
            Self::Validate => "validate",
            Self::Test => "test",
            Self::Predict => "predict",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub batch_size: usize,
    /// Threads fetching samples concurrently. `0` means one.
    pub num_workers: usize,
    pub transform: TransformConfig,
    pub decode: DecodeConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 128,
            num_workers: 4,
            transform: TransformConfig::default(),
            decode: DecodeConfig::default(),
        }
    }
}

/// Holds the catalogs of every stage and hands out loaders for the stages
/// that were explicitly [`setup`](DataModule::setup).
pub struct DataModule {
    batch_size: usize,
    decoder: Decoder,
    transform: Arc<dyn ImageTransform>,
    fetcher: Arc<Fetcher>,
    observer: Arc<dyn Observer>,
    pool: Arc<ThreadPool>,
    train: Option<Arc<Catalog>>,
    val: Option<Arc<Catalog>>,
    test: Option<Arc<Catalog>>,
    predict: Option<Arc<Catalog>>,
    ready: HashSet<Stage>,
}

impl DataModule {
    pub fn new(
        config: &LoaderConfig,
        fetcher: Arc<Fetcher>,
        observer: Arc<dyn Observer>,
    ) -> Result<Self, DataError> {
        if config.batch_size == 0 {
            return Err(DataError::InvalidConfig("batch_size must be positive".into()));
        }
        let transform = StandardTransform::new(config.transform.clone())?;
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_workers.max(1))
            .thread_name(|i| format!("bajor-loader-{i}"))
            .build()?;

        Ok(Self {
            batch_size: config.batch_size,
            decoder: Decoder::new(&config.decode),
            transform: Arc::new(transform),
            fetcher,
            observer,
            pool: Arc::new(pool),
            train: None,
            val: None,
            test: None,
            predict: None,
            ready: HashSet::new(),
        })
    }

    /// Replace the standard transform, e.g. with one matching a model's input.
    pub fn with_transform(mut self, transform: Arc<dyn ImageTransform>) -> Self {
        self.transform = transform;
        self
    }

    pub fn with_train_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.train = Some(catalog);
        self
    }

    pub fn with_val_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.val = Some(catalog);
        self
    }

    pub fn with_test_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.test = Some(catalog);
        self
    }

    pub fn with_predict_catalog(mut self, catalog: Arc<Catalog>) -> Self {
        self.predict = Some(catalog);
        self
    }

    /// Check that `stage` has what it needs and unlock its loaders.
    ///
    /// Prediction is exclusive: a module carrying train, validation or test
    /// catalogs cannot be set up for it.
    pub fn setup(&mut self, stage: Stage) -> Result<(), DataError> {
        let missing = match stage {
            Stage::Fit => self.train.is_none() || self.val.is_none(),
            Stage::Validate => self.val.is_none(),
            Stage::Test => self.test.is_none(),
            Stage::Predict => self.predict.is_none(),
        };
        if missing {
            return Err(DataError::MissingCatalog { stage });
        }

        if stage == Stage::Predict {
            let unrelated = [
                (Stage::Fit, &self.train),
                (Stage::Validate, &self.val),
                (Stage::Test, &self.test),
            ];
            if let Some((other, _)) = unrelated.iter().find(|(_, c)| c.is_some()) {
                return Err(DataError::UnrelatedCatalog {
                    stage,
                    other: *other,
                });
            }
        }

        tracing::debug!(%stage, "data module ready");
        self.ready.insert(stage);
        Ok(())
    }

    pub fn train_loader(&self) -> Result<BatchLoader<CatalogLabels>, DataError> {
        self.require(Stage::Fit)?;
        self.loader(&self.train, Stage::Fit, CatalogLabels)
    }

    pub fn val_loader(&self) -> Result<BatchLoader<CatalogLabels>, DataError> {
        if !self.ready.contains(&Stage::Fit) {
            self.require(Stage::Validate)?;
        }
        self.loader(&self.val, Stage::Validate, CatalogLabels)
    }

    pub fn test_loader(&self) -> Result<BatchLoader<CatalogLabels>, DataError> {
        self.require(Stage::Test)?;
        self.loader(&self.test, Stage::Test, CatalogLabels)
    }

    pub fn predict_loader(&self) -> Result<BatchLoader<NoLabels>, DataError> {
        self.require(Stage::Predict)?;
        self.loader(&self.predict, Stage::Predict, NoLabels)
    }

    fn require(&self, stage: Stage) -> Result<(), DataError> {
        if self.ready.contains(&stage) {
            Ok(())
        } else {
            Err(DataError::NotSetUp { stage })
        }
    }

    fn loader<L: LabelStrategy>(
        &self,
        catalog: &Option<Arc<Catalog>>,
        stage: Stage,
        labels: L,
    ) -> Result<BatchLoader<L>, DataError> {
        let catalog = catalog.clone().ok_or(DataError::MissingCatalog { stage })?;
        let dataset = CatalogDataset::new(
            catalog,
            self.fetcher.clone(),
            self.decoder.clone(),
            labels,
            self.observer.clone(),
        )
        .with_transform(self.transform.clone());
        Ok(BatchLoader {
            dataset: Arc::new(dataset),
            batch_size: self.batch_size,
            pool: self.pool.clone(),
        })
    }
}

/// A contiguous run of samples stacked into one NCHW tensor.
#[derive(Debug, Clone)]
pub struct Batch {
    pub images: Array4<f32>,
    pub labels: Vec<Vec<f32>>,
    /// Dataset indices covered, in row order.
    pub indices: Range<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Walks a dataset in index order, `batch_size` rows at a time.
///
/// The rows of one batch are fetched concurrently on the module's worker
/// pool; batches themselves are produced one after another, in order.
pub struct BatchLoader<L> {
    dataset: Arc<CatalogDataset<L>>,
    batch_size: usize,
    pool: Arc<ThreadPool>,
}

impl<L: LabelStrategy> BatchLoader<L> {
    /// Number of batches.
    pub fn len(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Number of samples across all batches.
    pub fn n_samples(&self) -> usize {
        self.dataset.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn dataset(&self) -> &CatalogDataset<L> {
        &self.dataset
    }

    /// Load batch `b`.
    pub fn batch(&self, b: usize) -> Result<Batch, DataError> {
        let start = b * self.batch_size;
        let end = (start + self.batch_size).min(self.dataset.len());
        if start >= end {
            return Err(DataError::IndexOutOfRange {
                index: start,
                len: self.dataset.len(),
            });
        }

        let dataset = &self.dataset;
        // Indexed parallel collect keeps row order.
        let samples = self.pool.install(|| {
            (start..end)
                .into_par_iter()
                .map(|i| dataset.get(i))
                .collect::<Result<Vec<Sample>, DataError>>()
        })?;
        collate(samples, start..end)
    }

    /// Lazily yields every batch in order. A failed batch is yielded as an
    /// error; callers decide whether to stop.
    pub fn iter(&self) -> impl Iterator<Item = Result<Batch, DataError>> + '_ {
        (0..self.len()).map(move |b| self.batch(b))
    }
}

fn collate(samples: Vec<Sample>, indices: Range<usize>) -> Result<Batch, DataError> {
    let expected = match samples.first() {
        Some(first) => first.image.shape().to_vec(),
        None => {
            return Err(DataError::IndexOutOfRange {
                index: indices.start,
                len: indices.start,
            });
        }
    };
    let (c, h, w) = (expected[0], expected[1], expected[2]);

    let mut images = Array4::<f32>::zeros((samples.len(), c, h, w));
    let mut labels = Vec::with_capacity(samples.len());
    for (offset, sample) in samples.into_iter().enumerate() {
        if sample.image.shape() != expected.as_slice() {
            return Err(DataError::ShapeMismatch {
                index: indices.start + offset,
                expected,
                found: sample.image.shape().to_vec(),
            });
        }
        images.slice_mut(s![offset, .., .., ..]).assign(&sample.image);
        labels.push(sample.label);
    }

    Ok(Batch {
        images,
        labels,
        indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::{fetcher, fixture, url};
    use bajor_core::MemoryObserver;
    use bajor_fetch::{FetchError, MemoryTransport};
    use ndarray::Array3;

    fn config(batch_size: usize) -> LoaderConfig {
        LoaderConfig {
            batch_size,
            num_workers: 3,
            transform: TransformConfig {
                resize_size: 4,
                ..TransformConfig::default()
            },
            ..LoaderConfig::default()
        }
    }

    fn module(n: usize, batch_size: usize) -> DataModule {
        let (catalog, transport) = fixture(n);
        let observer = Arc::new(MemoryObserver::new());
        DataModule::new(&config(batch_size), fetcher(transport, observer.clone()), observer)
            .unwrap()
            .with_predict_catalog(catalog)
    }

    /// Rows `range` of the shared fixture, labelled `[i, 2i]`.
    fn labelled(range: Range<usize>) -> Arc<Catalog> {
        use arrow::array::{Float32Array, StringArray};
        use arrow::datatypes::{DataType, Field, Schema};
        use arrow::record_batch::RecordBatch;

        let schema = Schema::new(vec![
            Field::new("subject_id", DataType::Utf8, false),
            Field::new("image_url", DataType::Utf8, false),
            Field::new("q_yes", DataType::Float32, true),
            Field::new("q_no", DataType::Float32, true),
        ]);
        let ids: Vec<String> = range.clone().map(|i| format!("{}", 1000 + i)).collect();
        let urls: Vec<String> = range.clone().map(url).collect();
        let batch = RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(urls)),
                Arc::new(Float32Array::from_iter_values(range.clone().map(|i| i as f32))),
                Arc::new(Float32Array::from_iter_values(range.map(|i| 2.0 * i as f32))),
            ],
        )
        .unwrap();
        let cols = ["q_yes".to_string(), "q_no".to_string()];
        Arc::new(Catalog::from_batches_with_labels(&[batch], &cols).unwrap())
    }

    fn labelled_module(batch_size: usize) -> DataModule {
        let (_, transport) = fixture(7);
        let observer = Arc::new(MemoryObserver::new());
        DataModule::new(&config(batch_size), fetcher(transport, observer.clone()), observer)
            .unwrap()
    }

    fn labels_of(loader: &BatchLoader<CatalogLabels>) -> Vec<Vec<f32>> {
        loader
            .iter()
            .collect::<Result<Vec<Batch>, _>>()
            .unwrap()
            .into_iter()
            .flat_map(|b| b.labels)
            .collect()
    }

    #[test]
    fn fit_unlocks_train_and_val_loaders() {
        let mut dm = labelled_module(2)
            .with_train_catalog(labelled(0..5))
            .with_val_catalog(labelled(5..7));
        dm.setup(Stage::Fit).unwrap();

        let train = dm.train_loader().unwrap();
        assert_eq!(train.len(), 3);
        let expected: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32, 2.0 * i as f32]).collect();
        assert_eq!(labels_of(&train), expected);

        let val = dm.val_loader().unwrap();
        assert_eq!(val.n_samples(), 2);
        assert_eq!(labels_of(&val), vec![vec![5.0, 10.0], vec![6.0, 12.0]]);
        let first = val.batch(0).unwrap();
        assert_eq!(first.indices, 0..2);
        assert!((first.images[[1, 0, 0, 0]] - 60.0 / 255.0).abs() < 1e-6);

        assert!(matches!(
            dm.test_loader(),
            Err(DataError::NotSetUp { stage: Stage::Test })
        ));
    }

    #[test]
    fn validate_alone_does_not_unlock_training() {
        let mut dm = labelled_module(4).with_val_catalog(labelled(2..4));
        dm.setup(Stage::Validate).unwrap();

        assert_eq!(labels_of(&dm.val_loader().unwrap()).len(), 2);
        assert!(matches!(
            dm.train_loader(),
            Err(DataError::NotSetUp { stage: Stage::Fit })
        ));
    }

    #[test]
    fn test_stage_loader() {
        let mut dm = labelled_module(3).with_test_catalog(labelled(0..4));
        assert!(matches!(
            dm.test_loader(),
            Err(DataError::NotSetUp { stage: Stage::Test })
        ));
        dm.setup(Stage::Test).unwrap();
        let test = dm.test_loader().unwrap();
        assert_eq!(test.len(), 2);
        assert_eq!(labels_of(&test)[3], vec![3.0, 6.0]);
    }

    #[test]
    fn predict_batches_preserve_row_order() {
        let mut dm = module(7, 3);
        dm.setup(Stage::Predict).unwrap();
        let loader = dm.predict_loader().unwrap();
        assert_eq!(loader.len(), 3);
        assert_eq!(loader.n_samples(), 7);

        let batches: Vec<Batch> = loader.iter().collect::<Result<_, _>>().unwrap();
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let mut row = 0;
        for batch in &batches {
            assert_eq!(&batch.images.shape()[1..], &[3, 4, 4]);
            for k in 0..batch.len() {
                let expected = (row * 10) as f32 / 255.0;
                assert!((batch.images[[k, 0, 2, 2]] - expected).abs() < 1e-6, "row {row}");
                assert!(batch.labels[k].is_empty());
                row += 1;
            }
        }
        assert_eq!(row, 7);
    }

    #[test]
    fn loader_requires_setup() {
        let dm = module(2, 2);
        assert!(matches!(
            dm.predict_loader(),
            Err(DataError::NotSetUp {
                stage: Stage::Predict
            })
        ));
    }

    #[test]
    fn setup_requires_stage_catalog() {
        let mut dm = module(2, 2);
        assert!(matches!(
            dm.setup(Stage::Fit),
            Err(DataError::MissingCatalog { stage: Stage::Fit })
        ));
        assert!(matches!(
            dm.setup(Stage::Test),
            Err(DataError::MissingCatalog { stage: Stage::Test })
        ));
    }

    #[test]
    fn predict_rejects_unrelated_catalogs() {
        let (train, _) = fixture(1);
        let mut dm = module(2, 2).with_train_catalog(train);
        assert!(matches!(
            dm.setup(Stage::Predict),
            Err(DataError::UnrelatedCatalog {
                stage: Stage::Predict,
                other: Stage::Fit
            })
        ));
    }

    #[test]
    fn failed_row_fails_its_batch() {
        let (catalog, _) = fixture(3);
        let mut transport = MemoryTransport::new().with_status(&url(1), 500);
        for i in [0, 2] {
            transport = transport.with_body(
                &url(i),
                "image/png",
                crate::dataset::tests::png(4, 4, 0),
            );
        }
        let observer = Arc::new(MemoryObserver::new());
        let mut dm = DataModule::new(&config(3), fetcher(transport, observer.clone()), observer)
            .unwrap()
            .with_predict_catalog(catalog);
        dm.setup(Stage::Predict).unwrap();

        let err = dm.predict_loader().unwrap().batch(0).unwrap_err();
        assert!(matches!(
            err,
            DataError::Fetch(FetchError::Status { status: 500, .. })
        ));
    }

    #[test]
    fn collate_rejects_mixed_shapes() {
        let samples = vec![
            Sample {
                image: Array3::zeros((3, 4, 4)),
                label: vec![],
            },
            Sample {
                image: Array3::zeros((3, 5, 4)),
                label: vec![],
            },
        ];
        assert!(matches!(
            collate(samples, 10..12),
            Err(DataError::ShapeMismatch { index: 11, .. })
        ));
    }

    #[test]
    fn zero_batch_size_rejected() {
        let (_, transport) = fixture(1);
        let observer = Arc::new(MemoryObserver::new());
        assert!(matches!(
            DataModule::new(&config(0), fetcher(transport, observer.clone()), observer),
            Err(DataError::InvalidConfig(_))
        ));
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Predict.to_string(), "predict");
        assert_eq!(Stage::Fit.as_str(), "fit");
    }
}
