//! Index-addressable samples backed by a remote-image catalog.
//!
//! One generic dataset serves every stage; what differs between prediction
//! and training is only how a row's label is resolved ([`LabelStrategy`]).

use std::sync::Arc;

use bajor_core::{Catalog, Event, Observer};
use bajor_fetch::Fetcher;
use ndarray::Array3;

use crate::DataError;
use crate::decode::Decoder;
use crate::transform::{ImageTransform, to_chw};

/// Resolves the label of a catalog row.
pub trait LabelStrategy: Send + Sync {
    fn label(&self, catalog: &Catalog, index: usize) -> Vec<f32>;
}

/// Prediction: there is no ground truth, every label is empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLabels;

impl LabelStrategy for NoLabels {
    fn label(&self, _catalog: &Catalog, _index: usize) -> Vec<f32> {
        Vec::new()
    }
}

/// Training and validation: the catalog's numeric answer columns.
#[derive(Debug, Default, Clone, Copy)]
pub struct CatalogLabels;

impl LabelStrategy for CatalogLabels {
    fn label(&self, catalog: &Catalog, index: usize) -> Vec<f32> {
        catalog.labels(index).map(<[f32]>::to_vec).unwrap_or_default()
    }
}

pub type TargetTransform = Arc<dyn Fn(Vec<f32>) -> Vec<f32> + Send + Sync>;

/// One loaded sample: a CHW image tensor and its (possibly empty) label.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub label: Vec<f32>,
}

/// Fetch → decode → transform for each catalog row, on demand.
///
/// `get` only reads shared state and allocates its own image buffer, so it
/// can be called from many worker threads at once.
pub struct CatalogDataset<L> {
    catalog: Arc<Catalog>,
    fetcher: Arc<Fetcher>,
    decoder: Decoder,
    transform: Option<Arc<dyn ImageTransform>>,
    target_transform: Option<TargetTransform>,
    labels: L,
    observer: Arc<dyn Observer>,
}

impl<L: LabelStrategy> CatalogDataset<L> {
    pub fn new(
        catalog: Arc<Catalog>,
        fetcher: Arc<Fetcher>,
        decoder: Decoder,
        labels: L,
        observer: Arc<dyn Observer>,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            decoder,
            transform: None,
            target_transform: None,
            labels,
            observer,
        }
    }

    pub fn with_transform(mut self, transform: Arc<dyn ImageTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_target_transform(mut self, target_transform: TargetTransform) -> Self {
        self.target_transform = Some(target_transform);
        self
    }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Load sample `index`.
    ///
    /// Fetch and decode failures are reported with the row's URL and returned
    /// as-is; no placeholder image is ever substituted.
    pub fn get(&self, index: usize) -> Result<Sample, DataError> {
        let row = self
            .catalog
            .row(index)
            .ok_or(DataError::IndexOutOfRange {
                index,
                len: self.catalog.len(),
            })?;
        tracing::debug!(url = %row.image_url, index, "downloading");

        let response = self.fetcher.fetch(&row.image_url)?;
        let image = self.decoder.decode(response).map_err(|e| {
            self.observer.event(&Event::DecodeFailed {
                url: row.image_url.clone(),
                error: e.to_string(),
            });
            e
        })?;

        let image = match &self.transform {
            Some(t) => t.apply(image),
            None => to_chw(&image),
        };

        let mut label = self.labels.label(&self.catalog, index);
        if let Some(tt) = &self.target_transform {
            label = tt(label);
        }

        Ok(Sample { image, label })
    }
}
