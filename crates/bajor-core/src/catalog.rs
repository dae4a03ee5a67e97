//! Subject catalogs: the ordered list of images to run predictions over.
//!
//! Row order is significant. Row `i` of every downstream artifact (dataset
//! sample, prediction tensor row, output file row) belongs to catalog row `i`.

use std::collections::HashSet;

use arrow::array::{Array, Float32Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use thiserror::Error;

use crate::schema::catalog::{IMAGE_URL, SUBJECT_ID};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is missing required column '{0}'")]
    MissingColumn(String),
    #[error("null {column} at catalog row {row}")]
    NullValue { column: String, row: usize },
    #[error("duplicate subject_id '{0}'")]
    DuplicateId(String),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

/// One cataloged subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRow {
    pub subject_id: String,
    pub image_url: String,
}

impl CatalogRow {
    pub fn new(subject_id: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            image_url: image_url.into(),
        }
    }
}

/// An ordered, read-only catalog of subjects with optional numeric label columns.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    rows: Vec<CatalogRow>,
    label_cols: Vec<String>,
    /// Row-major `rows.len() × label_cols.len()` label values.
    labels: Vec<f32>,
}

impl Catalog {
    /// Build a catalog from rows, rejecting duplicate subject identifiers.
    pub fn from_rows(rows: Vec<CatalogRow>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !seen.insert(row.subject_id.as_str()) {
                return Err(CatalogError::DuplicateId(row.subject_id.clone()));
            }
        }
        Ok(Self {
            rows,
            label_cols: Vec::new(),
            labels: Vec::new(),
        })
    }

    /// Build a catalog from Arrow batches with `subject_id` and `image_url` columns.
    ///
    /// `subject_id` may be any type castable to text (Zooniverse exports use
    /// integers). Other columns are ignored.
    pub fn from_batches(batches: &[RecordBatch]) -> Result<Self, CatalogError> {
        let mut rows = Vec::new();
        for batch in batches {
            let ids = text_column(batch, SUBJECT_ID)?;
            let urls = text_column(batch, IMAGE_URL)?;
            for i in 0..batch.num_rows() {
                let row = rows.len();
                if ids.is_null(i) {
                    return Err(CatalogError::NullValue {
                        column: SUBJECT_ID.into(),
                        row,
                    });
                }
                if urls.is_null(i) {
                    return Err(CatalogError::NullValue {
                        column: IMAGE_URL.into(),
                        row,
                    });
                }
                rows.push(CatalogRow::new(ids.value(i), urls.value(i)));
            }
        }
        Self::from_rows(rows)
    }

    /// Like [`from_batches`](Self::from_batches), also reading numeric answer
    /// columns as labels for training and validation catalogs.
    pub fn from_batches_with_labels(
        batches: &[RecordBatch],
        label_cols: &[String],
    ) -> Result<Self, CatalogError> {
        let mut catalog = Self::from_batches(batches)?;
        let mut labels = Vec::with_capacity(catalog.len() * label_cols.len());

        for batch in batches {
            let columns = label_cols
                .iter()
                .map(|name| float_column(batch, name))
                .collect::<Result<Vec<_>, _>>()?;
            for i in 0..batch.num_rows() {
                for col in &columns {
                    // Missing vote counts are zero votes.
                    labels.push(if col.is_null(i) { 0.0 } else { col.value(i) });
                }
            }
        }

        catalog.label_cols = label_cols.to_vec();
        catalog.labels = labels;
        Ok(catalog)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> Option<&CatalogRow> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[CatalogRow] {
        &self.rows
    }

    /// Subject identifiers in catalog order.
    pub fn subject_ids(&self) -> Vec<String> {
        self.rows.iter().map(|r| r.subject_id.clone()).collect()
    }

    pub fn label_cols(&self) -> &[String] {
        &self.label_cols
    }

    /// Label values for one row, or `None` when the catalog carries no labels.
    pub fn labels(&self, index: usize) -> Option<&[f32]> {
        let n = self.label_cols.len();
        if n == 0 || index >= self.rows.len() {
            return None;
        }
        Some(&self.labels[index * n..(index + 1) * n])
    }
}

fn text_column(batch: &RecordBatch, name: &str) -> Result<StringArray, CatalogError> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| CatalogError::MissingColumn(name.into()))?;
    let as_text = cast(col.as_ref(), &DataType::Utf8)?;
    as_text
        .as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| CatalogError::MissingColumn(name.into()))
}

fn float_column(batch: &RecordBatch, name: &str) -> Result<Float32Array, CatalogError> {
    let col = batch
        .column_by_name(name)
        .ok_or_else(|| CatalogError::MissingColumn(name.into()))?;
    let as_float = cast(col.as_ref(), &DataType::Float32)?;
    as_float
        .as_any()
        .downcast_ref::<Float32Array>()
        .cloned()
        .ok_or_else(|| CatalogError::MissingColumn(name.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{Field, Schema};
    use std::sync::Arc;

    fn batch(ids: &[i64], urls: &[&str], votes: &[Option<i64>]) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("subject_id", DataType::Int64, false),
            Field::new("image_url", DataType::Utf8, false),
            Field::new("smooth-or-featured_smooth", DataType::Int64, true),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(urls.to_vec())),
                Arc::new(Int64Array::from(votes.to_vec())),
            ],
        )
        .unwrap()
    }

    #[test]
    fn integer_ids_are_read_as_text_in_order() {
        let b1 = batch(&[11, 12], &["http://a/1.jpg", "http://a/2.jpg"], &[None, None]);
        let b2 = batch(&[13], &["http://a/3.png"], &[None]);
        let catalog = Catalog::from_batches(&[b1, b2]).unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.subject_ids(), vec!["11", "12", "13"]);
        assert_eq!(catalog.row(2).unwrap().image_url, "http://a/3.png");
        assert!(catalog.labels(0).is_none());
    }

    #[test]
    fn duplicate_ids_rejected() {
        let rows = vec![
            CatalogRow::new("1", "http://a/1.jpg"),
            CatalogRow::new("1", "http://a/2.jpg"),
        ];
        let err = Catalog::from_rows(rows).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateId(id) if id == "1"));
    }

    #[test]
    fn missing_url_column_rejected() {
        let schema = Schema::new(vec![Field::new("subject_id", DataType::Utf8, false)]);
        let b = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(StringArray::from(vec!["1"]))],
        )
        .unwrap();
        let err = Catalog::from_batches(&[b]).unwrap_err();
        assert!(matches!(err, CatalogError::MissingColumn(c) if c == "image_url"));
    }

    #[test]
    fn label_columns_read_with_nulls_as_zero() {
        let b = batch(&[1, 2], &["u1", "u2"], &[Some(7), None]);
        let cols = vec!["smooth-or-featured_smooth".to_string()];
        let catalog = Catalog::from_batches_with_labels(&[b], &cols).unwrap();

        assert_eq!(catalog.label_cols(), cols.as_slice());
        assert_eq!(catalog.labels(0), Some(&[7.0][..]));
        assert_eq!(catalog.labels(1), Some(&[0.0][..]));
        assert_eq!(catalog.labels(2), None);
    }
}
