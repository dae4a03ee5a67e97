//! Catalog tables from CSV or Parquet files.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use bajor_core::Catalog;
use bajor_core::schema::catalog::{IMAGE_URL, SUBJECT_ID};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use tracing::info;

use crate::StoreError;

/// Read a prediction catalog. Only `subject_id` and `image_url` are kept.
pub fn read_catalog(path: &Path) -> Result<Catalog, StoreError> {
    let batches = read_batches(path)?;
    let catalog = Catalog::from_batches(&batches)?;
    info!(path = %path.display(), rows = catalog.len(), "loaded catalog");
    Ok(catalog)
}

/// Read a catalog together with numeric answer columns used as labels.
pub fn read_labelled_catalog(path: &Path, label_cols: &[String]) -> Result<Catalog, StoreError> {
    let batches = read_batches(path)?;
    let catalog = Catalog::from_batches_with_labels(&batches, label_cols)?;
    info!(
        path = %path.display(),
        rows = catalog.len(),
        labels = label_cols.len(),
        "loaded labelled catalog"
    );
    Ok(catalog)
}

fn read_batches(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    match extension(path).as_deref() {
        Some("csv") => read_csv(path),
        Some("parquet") | Some("pq") => read_parquet(path),
        _ => Err(StoreError::UnsupportedCatalog(path.to_path_buf())),
    }
}

pub(crate) fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Read a Parquet file into Arrow RecordBatches.
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

/// Read a headed CSV file, inferring column types from the data.
///
/// `subject_id` and `image_url` are always read as text so identifiers keep
/// their exact spelling (`007` stays `007`).
pub fn read_csv(path: &Path) -> Result<Vec<RecordBatch>, StoreError> {
    let mut file = File::open(path)?;
    let format = Format::default().with_header(true);
    let (inferred, _) = format.infer_schema(&mut file, None)?;
    file.seek(SeekFrom::Start(0))?;

    let schema = Schema::new(
        inferred
            .fields()
            .iter()
            .map(|f| match f.name().as_str() {
                SUBJECT_ID | IMAGE_URL => {
                    Arc::new(Field::new(f.name(), DataType::Utf8, f.is_nullable()))
                }
                _ => f.clone(),
            })
            .collect::<Vec<_>>(),
    );

    let reader = ReaderBuilder::new(Arc::new(schema))
        .with_format(format)
        .build(file)?;
    let batches: Result<Vec<RecordBatch>, _> = reader.collect();
    Ok(batches?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float32Array, StringArray};
    use bajor_core::CatalogError;
    use bajor_core::schema::catalog::{labelled_catalog_schema, prediction_catalog_schema};
    use parquet::arrow::ArrowWriter;
    use tempfile::TempDir;

    #[test]
    fn csv_catalog_with_numeric_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "subject_id,image_url,ra\n\
             101,https://example.org/a.jpeg,10.5\n\
             102,https://example.org/b.png,11.0\n",
        )
        .unwrap();

        let catalog = read_catalog(&path).unwrap();
        assert_eq!(catalog.subject_ids(), vec!["101", "102"]);
        assert_eq!(catalog.row(1).unwrap().image_url, "https://example.org/b.png");
    }

    #[test]
    fn csv_duplicate_ids_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "subject_id,image_url\n7,https://example.org/a.png\n7,https://example.org/b.png\n",
        )
        .unwrap();
        assert!(matches!(
            read_catalog(&path),
            Err(StoreError::Catalog(CatalogError::DuplicateId(id))) if id == "7"
        ));
    }

    #[test]
    fn csv_ids_keep_leading_zeros() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.csv");
        std::fs::write(
            &path,
            "subject_id,image_url\n\
             007,https://example.org/a.png\n\
             0123,https://example.org/b.png\n\
             7,https://example.org/c.png\n",
        )
        .unwrap();

        let catalog = read_catalog(&path).unwrap();
        assert_eq!(catalog.subject_ids(), vec!["007", "0123", "7"]);
    }

    #[test]
    fn parquet_labelled_catalog() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.parquet");
        let label_cols = vec!["smooth-or-featured_smooth".to_string()];
        let schema = Arc::new(labelled_catalog_schema(&label_cols));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["a", "b"])),
                Arc::new(StringArray::from(vec!["u/a.png", "u/b.png"])),
                Arc::new(Float32Array::from(vec![Some(12.0), None])),
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let catalog = read_labelled_catalog(&path, &label_cols).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.labels(0), Some(&[12.0f32][..]));
        assert_eq!(catalog.labels(1), Some(&[0.0f32][..]));

        let plain = read_catalog(&path).unwrap();
        assert!(plain.label_cols().is_empty());
    }

    #[test]
    fn parquet_prediction_schema_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog.parquet");
        let schema = Arc::new(prediction_catalog_schema());
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["x"])),
                Arc::new(StringArray::from(vec!["https://example.org/x.jpg"])),
            ],
        )
        .unwrap();
        let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let batches = read_parquet(&path).unwrap();
        assert_eq!(batches.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
        assert_eq!(read_catalog(&path).unwrap().subject_ids(), vec!["x"]);
    }

    #[test]
    fn missing_and_unsupported_files() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            read_catalog(&dir.path().join("nope.csv")),
            Err(StoreError::NotFound(_))
        ));
        let json = dir.path().join("catalog.json");
        std::fs::write(&json, "{}").unwrap();
        assert!(matches!(
            read_catalog(&json),
            Err(StoreError::UnsupportedCatalog(_))
        ));
    }
}
